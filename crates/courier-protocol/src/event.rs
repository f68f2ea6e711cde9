use async_trait::async_trait;
use serde_json::Value;

use crate::message::{extract_tool_result_text, AgentMessage, AssistantBlock, ResultPayload};

/// Flat event classified from one agent stream message.
///
/// Classification happens here and nowhere else; downstream consumers switch
/// on the variant instead of walking message block structures.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Text {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolUse {
        name: String,
        input: Value,
        partial: bool,
    },
    ToolResult {
        content: String,
    },
    Result {
        content: Option<String>,
        session_id: Option<String>,
        cost_usd: Option<f64>,
        num_turns: Option<u32>,
        duration_ms: Option<u64>,
        is_error: bool,
    },
    Unknown,
}

pub fn classify(message: &AgentMessage) -> StreamEvent {
    match message {
        AgentMessage::Result(payload) => result_event(payload),
        AgentMessage::Assistant { content } => assistant_event(content),
        AgentMessage::User { content } => {
            let text = extract_tool_result_text(content);
            if text.is_empty() {
                StreamEvent::Unknown
            } else {
                StreamEvent::ToolResult { content: text }
            }
        }
        AgentMessage::Partial { event } => partial_event(event),
        _ => StreamEvent::Unknown,
    }
}

fn result_event(payload: &ResultPayload) -> StreamEvent {
    StreamEvent::Result {
        content: payload.result.clone(),
        session_id: payload.session_id.clone(),
        cost_usd: payload.total_cost_usd,
        num_turns: payload.num_turns,
        duration_ms: payload.duration_ms,
        is_error: payload.is_error,
    }
}

fn assistant_event(blocks: &[AssistantBlock]) -> StreamEvent {
    // A lone thinking or tool_use block marks a pure thinking / tool turn.
    if let [block] = blocks {
        match block {
            AssistantBlock::Thinking { thinking } => {
                return StreamEvent::Thinking {
                    content: thinking.clone(),
                }
            }
            AssistantBlock::ToolUse { name, input } => {
                return StreamEvent::ToolUse {
                    name: name.clone(),
                    input: input.clone(),
                    partial: false,
                }
            }
            _ => {}
        }
    }

    let mut text = String::new();
    for block in blocks {
        if let AssistantBlock::Text { text: part } = block {
            text.push_str(part);
        }
    }
    StreamEvent::Text { content: text }
}

fn partial_event(event: &Value) -> StreamEvent {
    match event.get("type").and_then(Value::as_str) {
        Some("content_block_start") => {
            let block = event.get("content_block");
            match block.and_then(|block| block.get("type")).and_then(Value::as_str) {
                Some("tool_use") => StreamEvent::ToolUse {
                    name: block
                        .and_then(|block| block.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                    input: Value::Null,
                    partial: true,
                },
                Some("thinking") => StreamEvent::Thinking {
                    content: String::new(),
                },
                _ => StreamEvent::Unknown,
            }
        }
        Some("content_block_delta") => {
            let delta = event.get("delta");
            match delta.and_then(|delta| delta.get("type")).and_then(Value::as_str) {
                Some("text_delta") => StreamEvent::Text {
                    content: delta
                        .and_then(|delta| delta.get("text"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                },
                Some("thinking_delta") => StreamEvent::Thinking {
                    content: delta
                        .and_then(|delta| delta.get("thinking"))
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_owned(),
                },
                // input_json_delta: the complete input arrives with the full
                // tool_use message later.
                _ => StreamEvent::Unknown,
            }
        }
        _ => StreamEvent::Unknown,
    }
}

/// Receiver for classified stream events during one query.
///
/// Invoked only from the actor's worker task, in stream order.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn on_event(&self, event: StreamEvent);
}

/// Sink that drops everything; used where the caller has no progress surface.
pub struct NullSink;

#[async_trait]
impl StreamSink for NullSink {
    async fn on_event(&self, _event: StreamEvent) {}
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn assistant(blocks: Vec<AssistantBlock>) -> AgentMessage {
        AgentMessage::Assistant { content: blocks }
    }

    #[test]
    fn lone_thinking_block_classifies_as_thinking() {
        let event = classify(&assistant(vec![AssistantBlock::Thinking {
            thinking: "hmm".to_owned(),
        }]));
        assert_eq!(
            event,
            StreamEvent::Thinking {
                content: "hmm".to_owned()
            }
        );
    }

    #[test]
    fn lone_tool_use_block_classifies_as_tool_use() {
        let event = classify(&assistant(vec![AssistantBlock::ToolUse {
            name: "Read".to_owned(),
            input: json!({"file_path": "/x/foo.rs"}),
        }]));
        assert_eq!(
            event,
            StreamEvent::ToolUse {
                name: "Read".to_owned(),
                input: json!({"file_path": "/x/foo.rs"}),
                partial: false,
            }
        );
    }

    #[test]
    fn mixed_blocks_concatenate_text_in_order() {
        let event = classify(&assistant(vec![
            AssistantBlock::Text {
                text: "one ".to_owned(),
            },
            AssistantBlock::ToolUse {
                name: "Read".to_owned(),
                input: Value::Null,
            },
            AssistantBlock::Text {
                text: "two".to_owned(),
            },
        ]));
        assert_eq!(
            event,
            StreamEvent::Text {
                content: "one two".to_owned()
            }
        );
    }

    #[test]
    fn assistant_without_text_blocks_yields_empty_text() {
        let event = classify(&assistant(vec![
            AssistantBlock::Unknown,
            AssistantBlock::Unknown,
        ]));
        assert_eq!(
            event,
            StreamEvent::Text {
                content: String::new()
            }
        );
    }

    #[test]
    fn user_message_with_content_classifies_as_tool_result() {
        let message = AgentMessage::User {
            content: json!("def main():\n    pass\n"),
        };
        assert_eq!(
            classify(&message),
            StreamEvent::ToolResult {
                content: "def main():\n    pass\n".to_owned()
            }
        );
    }

    #[test]
    fn empty_user_message_is_unknown() {
        let message = AgentMessage::User {
            content: json!([]),
        };
        assert_eq!(classify(&message), StreamEvent::Unknown);
    }

    #[test]
    fn result_message_carries_session_and_cost() {
        let message = AgentMessage::Result(ResultPayload {
            result: Some("hi".to_owned()),
            session_id: Some("sess-1".to_owned()),
            total_cost_usd: Some(0.01),
            num_turns: Some(1),
            duration_ms: Some(40),
            is_error: false,
        });
        let StreamEvent::Result {
            content,
            session_id,
            cost_usd,
            ..
        } = classify(&message)
        else {
            panic!("expected result event");
        };
        assert_eq!(content.as_deref(), Some("hi"));
        assert_eq!(session_id.as_deref(), Some("sess-1"));
        assert_eq!(cost_usd, Some(0.01));
    }

    #[test]
    fn partial_tool_use_start_is_marked_partial() {
        let message = AgentMessage::Partial {
            event: json!({
                "type": "content_block_start",
                "content_block": {"type": "tool_use", "name": "Bash"},
            }),
        };
        assert_eq!(
            classify(&message),
            StreamEvent::ToolUse {
                name: "Bash".to_owned(),
                input: Value::Null,
                partial: true,
            }
        );
    }

    #[test]
    fn partial_text_delta_classifies_as_text() {
        let message = AgentMessage::Partial {
            event: json!({
                "type": "content_block_delta",
                "delta": {"type": "text_delta", "text": "chunk"},
            }),
        };
        assert_eq!(
            classify(&message),
            StreamEvent::Text {
                content: "chunk".to_owned()
            }
        );
    }

    #[test]
    fn partial_input_json_delta_is_ignored() {
        let message = AgentMessage::Partial {
            event: json!({
                "type": "content_block_delta",
                "delta": {"type": "input_json_delta", "partial_json": "{\"f"},
            }),
        };
        assert_eq!(classify(&message), StreamEvent::Unknown);
    }

    #[test]
    fn control_messages_are_unknown_to_consumers() {
        let message = AgentMessage::ControlResponse {
            response: json!({"subtype": "success"}),
        };
        assert_eq!(classify(&message), StreamEvent::Unknown);
    }
}
