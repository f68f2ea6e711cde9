use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use courier_chat::{CallbackQuery, IncomingDocument, IncomingMessage, MessageHandle};
use serde_json::Value;

use crate::orchestrator::Orchestrator;

/// One parsed webhook update.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundUpdate {
    Message(IncomingMessage),
    Callback(CallbackQuery),
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/webhook", post(handle_update))
        .with_state(orchestrator)
}

/// Deserialize, dispatch on a fresh task, answer 200. Signature verification
/// is a deployment concern handled in front of this endpoint.
async fn handle_update(
    State(orchestrator): State<Arc<Orchestrator>>,
    Json(update): Json<Value>,
) -> StatusCode {
    match parse_update(&update) {
        Some(InboundUpdate::Message(message)) => {
            tokio::spawn(async move {
                orchestrator.dispatch(message).await;
            });
            StatusCode::OK
        }
        Some(InboundUpdate::Callback(callback)) => {
            tokio::spawn(async move {
                orchestrator.handle_callback(callback).await;
            });
            StatusCode::OK
        }
        None => {
            tracing::debug!("unhandled webhook update shape");
            StatusCode::OK
        }
    }
}

pub fn parse_update(update: &Value) -> Option<InboundUpdate> {
    if let Some(message) = update.get("message") {
        return parse_message(message).map(InboundUpdate::Message);
    }
    if let Some(callback) = update.get("callback_query") {
        return parse_callback(callback).map(InboundUpdate::Callback);
    }
    None
}

fn parse_message(message: &Value) -> Option<IncomingMessage> {
    let chat_id = message.pointer("/chat/id")?.as_i64()?;
    let message_id = message.get("message_id")?.as_i64()?;
    let user_id = message.pointer("/from/id")?.as_i64()?;

    // The photo array is ordered smallest to largest; keep the largest.
    let photo_file_id = message
        .get("photo")
        .and_then(Value::as_array)
        .and_then(|sizes| sizes.last())
        .and_then(|size| size.get("file_id"))
        .and_then(Value::as_str)
        .map(str::to_owned);

    let document = message.get("document").map(|document| IncomingDocument {
        file_id: document
            .get("file_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        filename: document
            .get("file_name")
            .and_then(Value::as_str)
            .map(str::to_owned),
        mime_type: document
            .get("mime_type")
            .and_then(Value::as_str)
            .map(str::to_owned),
    });

    Some(IncomingMessage {
        chat_id,
        message_id,
        user_id,
        text: message.get("text").and_then(Value::as_str).map(str::to_owned),
        caption: message
            .get("caption")
            .and_then(Value::as_str)
            .map(str::to_owned),
        photo_file_id,
        document,
        media_group_id: message
            .get("media_group_id")
            .and_then(Value::as_str)
            .map(str::to_owned),
    })
}

fn parse_callback(callback: &Value) -> Option<CallbackQuery> {
    Some(CallbackQuery {
        id: callback.get("id")?.as_str()?.to_owned(),
        user_id: callback.pointer("/from/id")?.as_i64()?,
        message: MessageHandle {
            chat_id: callback.pointer("/message/chat/id")?.as_i64()?,
            message_id: callback.pointer("/message/message_id")?.as_i64()?,
        },
        data: callback.get("data")?.as_str()?.to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn text_message_parses_with_ids() {
        let update = json!({
            "update_id": 1,
            "message": {
                "message_id": 10,
                "chat": {"id": 500},
                "from": {"id": 42},
                "text": "hello",
            },
        });

        let Some(InboundUpdate::Message(message)) = parse_update(&update) else {
            panic!("expected a message update");
        };
        assert_eq!(message.chat_id, 500);
        assert_eq!(message.message_id, 10);
        assert_eq!(message.user_id, 42);
        assert_eq!(message.text.as_deref(), Some("hello"));
        assert!(!message.has_attachment());
    }

    #[test]
    fn photo_message_keeps_the_largest_size() {
        let update = json!({
            "message": {
                "message_id": 10,
                "chat": {"id": 500},
                "from": {"id": 42},
                "caption": "look",
                "media_group_id": "album-1",
                "photo": [
                    {"file_id": "small", "width": 90},
                    {"file_id": "large", "width": 1280},
                ],
            },
        });

        let Some(InboundUpdate::Message(message)) = parse_update(&update) else {
            panic!("expected a message update");
        };
        assert_eq!(message.photo_file_id.as_deref(), Some("large"));
        assert_eq!(message.caption.as_deref(), Some("look"));
        assert_eq!(message.media_group_id.as_deref(), Some("album-1"));
    }

    #[test]
    fn document_message_carries_name_and_mime() {
        let update = json!({
            "message": {
                "message_id": 10,
                "chat": {"id": 500},
                "from": {"id": 42},
                "document": {
                    "file_id": "f-1",
                    "file_name": "report.pdf",
                    "mime_type": "application/pdf",
                },
            },
        });

        let Some(InboundUpdate::Message(message)) = parse_update(&update) else {
            panic!("expected a message update");
        };
        let document = message.document.expect("document present");
        assert_eq!(document.file_id, "f-1");
        assert_eq!(document.filename.as_deref(), Some("report.pdf"));
        assert_eq!(document.mime_type.as_deref(), Some("application/pdf"));
    }

    #[test]
    fn callback_query_parses_into_handle_and_payload() {
        let update = json!({
            "callback_query": {
                "id": "cb-9",
                "from": {"id": 42},
                "message": {"message_id": 77, "chat": {"id": 500}},
                "data": "session:sess-1",
            },
        });

        let Some(InboundUpdate::Callback(callback)) = parse_update(&update) else {
            panic!("expected a callback update");
        };
        assert_eq!(callback.id, "cb-9");
        assert_eq!(callback.user_id, 42);
        assert_eq!(callback.message.chat_id, 500);
        assert_eq!(callback.message.message_id, 77);
        assert_eq!(callback.data, "session:sess-1");
    }

    #[test]
    fn unknown_update_shapes_are_ignored() {
        assert_eq!(parse_update(&json!({"edited_message": {}})), None);
        assert_eq!(parse_update(&json!({})), None);
    }
}
