use serde_json::Value;

use crate::error::{AgentError, AgentResult};

/// One content block inside an assistant turn, as delivered by the agent CLI.
///
/// Unknown block kinds are preserved as [`AssistantBlock::Unknown`] instead of
/// failing the whole message; the CLI adds block types faster than we track
/// them.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBlock {
    Text { text: String },
    Thinking { thinking: String },
    ToolUse { name: String, input: Value },
    Unknown,
}

impl AssistantBlock {
    fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("text") => Self::Text {
                text: value
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            Some("thinking") => Self::Thinking {
                thinking: value
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            },
            Some("tool_use") => Self::ToolUse {
                name: value
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                input: value.get("input").cloned().unwrap_or(Value::Null),
            },
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultPayload {
    pub result: Option<String>,
    pub session_id: Option<String>,
    pub total_cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
    pub duration_ms: Option<u64>,
    pub is_error: bool,
}

/// One typed message from the agent's stream-json output.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentMessage {
    Assistant { content: Vec<AssistantBlock> },
    User { content: Value },
    Result(ResultPayload),
    System { subtype: String, payload: Value },
    Partial { event: Value },
    ControlRequest { request_id: Value, request: Value },
    ControlResponse { response: Value },
    Unknown,
}

impl AgentMessage {
    /// Parse one stream-json line. Invalid JSON is a protocol error; valid
    /// JSON with an unrecognized shape degrades to [`AgentMessage::Unknown`].
    pub fn parse_line(line: &str) -> AgentResult<Self> {
        let value: Value = serde_json::from_str(line)
            .map_err(|err| AgentError::Protocol(format!("invalid stream-json line: {err}")))?;
        Ok(Self::from_value(&value))
    }

    pub fn from_value(value: &Value) -> Self {
        match value.get("type").and_then(Value::as_str) {
            Some("assistant") => {
                let blocks = value
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .and_then(Value::as_array)
                    .map(|blocks| blocks.iter().map(AssistantBlock::from_value).collect())
                    .unwrap_or_default();
                Self::Assistant { content: blocks }
            }
            Some("user") => Self::User {
                content: value
                    .get("message")
                    .and_then(|message| message.get("content"))
                    .cloned()
                    .unwrap_or(Value::Null),
            },
            Some("result") => Self::Result(ResultPayload {
                result: value
                    .get("result")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                session_id: value
                    .get("session_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                total_cost_usd: value.get("total_cost_usd").and_then(Value::as_f64),
                num_turns: value
                    .get("num_turns")
                    .and_then(Value::as_u64)
                    .and_then(|turns| u32::try_from(turns).ok()),
                duration_ms: value.get("duration_ms").and_then(Value::as_u64),
                is_error: value
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            }),
            Some("system") => Self::System {
                subtype: value
                    .get("subtype")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                payload: value.clone(),
            },
            Some("stream_event") => Self::Partial {
                event: value.get("event").cloned().unwrap_or(Value::Null),
            },
            Some("control_request") => Self::ControlRequest {
                request_id: value.get("request_id").cloned().unwrap_or(Value::Null),
                request: value.get("request").cloned().unwrap_or(Value::Null),
            },
            Some("control_response") => Self::ControlResponse {
                response: value.get("response").cloned().unwrap_or(Value::Null),
            },
            _ => Self::Unknown,
        }
    }
}

/// Flatten a user-message content payload into plain text.
///
/// Tool results arrive either as a bare string or as a list of blocks whose
/// `content` is itself a string or a nested list of text blocks.
pub fn extract_tool_result_text(content: &Value) -> String {
    if let Some(text) = content.as_str() {
        return text.to_owned();
    }

    let mut parts = Vec::new();
    if let Some(blocks) = content.as_array() {
        for block in blocks {
            match block.get("content") {
                Some(Value::String(inner)) => parts.push(inner.clone()),
                Some(Value::Array(inner_blocks)) => {
                    for inner in inner_blocks {
                        if let Some(text) = inner.get("text").and_then(Value::as_str) {
                            parts.push(text.to_owned());
                        }
                    }
                }
                _ => {
                    if let Some(text) = block.get("text").and_then(Value::as_str) {
                        parts.push(text.to_owned());
                    }
                }
            }
        }
    }
    parts.join("\n")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_assistant_message_with_mixed_blocks() {
        let line = json!({
            "type": "assistant",
            "message": {
                "role": "assistant",
                "content": [
                    {"type": "text", "text": "hello"},
                    {"type": "tool_use", "name": "Read", "input": {"file_path": "/x"}},
                    {"type": "shiny_new_block", "payload": 1},
                ],
            },
        })
        .to_string();

        let message = AgentMessage::parse_line(&line).expect("parse assistant line");
        let AgentMessage::Assistant { content } = message else {
            panic!("expected assistant message");
        };
        assert_eq!(content.len(), 3);
        assert_eq!(
            content[0],
            AssistantBlock::Text {
                text: "hello".to_owned()
            }
        );
        assert!(matches!(content[1], AssistantBlock::ToolUse { .. }));
        assert_eq!(content[2], AssistantBlock::Unknown);
    }

    #[test]
    fn parses_result_message_fields() {
        let line = json!({
            "type": "result",
            "result": "done",
            "session_id": "sess-1",
            "total_cost_usd": 0.021,
            "num_turns": 3,
            "duration_ms": 1800,
        })
        .to_string();

        let message = AgentMessage::parse_line(&line).expect("parse result line");
        let AgentMessage::Result(payload) = message else {
            panic!("expected result message");
        };
        assert_eq!(payload.result.as_deref(), Some("done"));
        assert_eq!(payload.session_id.as_deref(), Some("sess-1"));
        assert_eq!(payload.total_cost_usd, Some(0.021));
        assert_eq!(payload.num_turns, Some(3));
        assert_eq!(payload.duration_ms, Some(1800));
        assert!(!payload.is_error);
    }

    #[test]
    fn unknown_type_degrades_instead_of_failing() {
        let message = AgentMessage::parse_line(r#"{"type":"telemetry","n":1}"#)
            .expect("valid JSON parses");
        assert_eq!(message, AgentMessage::Unknown);
    }

    #[test]
    fn invalid_json_is_a_protocol_error() {
        let error = AgentMessage::parse_line("{nope").expect_err("broken JSON must error");
        assert!(matches!(error, AgentError::Protocol(_)));
    }

    #[test]
    fn tool_result_text_handles_string_content() {
        assert_eq!(extract_tool_result_text(&json!("raw output")), "raw output");
    }

    #[test]
    fn tool_result_text_flattens_nested_blocks() {
        let content = json!([
            {"type": "tool_result", "content": "line one"},
            {"type": "tool_result", "content": [
                {"type": "text", "text": "line two"},
                {"type": "text", "text": "line three"},
            ]},
            {"type": "text", "text": "line four"},
        ]);

        assert_eq!(
            extract_tool_result_text(&content),
            "line one\nline two\nline three\nline four"
        );
    }

    #[test]
    fn tool_result_text_for_unexpected_shape_is_empty() {
        assert_eq!(extract_tool_result_text(&json!({"weird": true})), "");
    }
}
