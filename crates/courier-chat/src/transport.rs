use std::fmt;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::api::{
    ChatAction, ChatApi, ChatError, ChatResult, InlineKeyboard, MessageHandle,
};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Bot-API transport over HTTPS. Only the handful of methods the core uses;
/// everything else about the platform API stays out of scope.
#[derive(Clone)]
pub struct BotApiTransport {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl fmt::Debug for BotApiTransport {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("BotApiTransport")
            .field("base_url", &self.base_url)
            .field("token", &"<redacted>")
            .finish()
    }
}

impl BotApiTransport {
    pub fn new(token: impl Into<String>) -> ChatResult<Self> {
        Self::with_base_url(DEFAULT_API_BASE, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> ChatResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("courier/chat-transport")
            .build()
            .map_err(|err| {
                ChatError::Transport(format!("failed to initialize chat HTTP client: {err}"))
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: token.into(),
            client,
        })
    }

    async fn call(&self, method: &str, payload: Value) -> ChatResult<Value> {
        let url = format!("{}/bot{}/{method}", self.base_url, self.token);
        let response = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("chat call '{method}' failed: {err}")))?;

        let status = response.status();
        let body = response.text().await.map_err(|err| {
            ChatError::Transport(format!("failed to read chat response for '{method}': {err}"))
        })?;

        let envelope: Value = serde_json::from_str(&body).map_err(|err| {
            ChatError::Decode(format!("chat response for '{method}' is not JSON: {err}"))
        })?;

        let ok = envelope.get("ok").and_then(Value::as_bool).unwrap_or(false);
        if !status.is_success() || !ok {
            let description = envelope
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("no description");
            return Err(ChatError::Api(format!(
                "chat method '{method}' returned HTTP {status}: {description}"
            )));
        }

        Ok(envelope.get("result").cloned().unwrap_or(Value::Null))
    }

    fn message_handle(result: &Value) -> ChatResult<MessageHandle> {
        let chat_id = result
            .pointer("/chat/id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChatError::Decode("sent message is missing chat id".to_owned()))?;
        let message_id = result
            .get("message_id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ChatError::Decode("sent message is missing message id".to_owned()))?;
        Ok(MessageHandle {
            chat_id,
            message_id,
        })
    }

    fn keyboard_markup(keyboard: &InlineKeyboard) -> Value {
        let rows: Vec<Vec<Value>> = keyboard
            .iter()
            .map(|row| {
                row.iter()
                    .map(|button| json!({"text": button.label, "callback_data": button.callback_data}))
                    .collect()
            })
            .collect();
        json!({"inline_keyboard": rows})
    }
}

#[async_trait]
impl ChatApi for BotApiTransport {
    async fn send_message(&self, chat_id: i64, text: &str) -> ChatResult<MessageHandle> {
        let result = self
            .call("sendMessage", json!({"chat_id": chat_id, "text": text}))
            .await?;
        Self::message_handle(&result)
    }

    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<MessageHandle> {
        let result = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "reply_markup": Self::keyboard_markup(keyboard),
                }),
            )
            .await?;
        Self::message_handle(&result)
    }

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> ChatResult<()> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": handle.chat_id,
                "message_id": handle.message_id,
                "text": text,
            }),
        )
        .await
        .map(|_| ())
    }

    async fn edit_message_with_keyboard(
        &self,
        handle: &MessageHandle,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<()> {
        self.call(
            "editMessageText",
            json!({
                "chat_id": handle.chat_id,
                "message_id": handle.message_id,
                "text": text,
                "reply_markup": Self::keyboard_markup(keyboard),
            }),
        )
        .await
        .map(|_| ())
    }

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> ChatResult<()> {
        self.call(
            "sendChatAction",
            json!({"chat_id": chat_id, "action": action.as_api_value()}),
        )
        .await
        .map(|_| ())
    }

    async fn answer_callback(&self, callback_id: &str) -> ChatResult<()> {
        self.call("answerCallbackQuery", json!({"callback_query_id": callback_id}))
            .await
            .map(|_| ())
    }

    async fn download_file(&self, file_id: &str) -> ChatResult<Vec<u8>> {
        let info = self.call("getFile", json!({"file_id": file_id})).await?;
        let file_path = info
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::Decode("getFile result has no file_path".to_owned()))?;

        let url = format!("{}/file/bot{}/{file_path}", self.base_url, self.token);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| ChatError::Transport(format!("file download failed: {err}")))?;
        if !response.status().is_success() {
            return Err(ChatError::Api(format!(
                "file download returned HTTP {}",
                response.status()
            )));
        }
        response
            .bytes()
            .await
            .map(|bytes| bytes.to_vec())
            .map_err(|err| ChatError::Transport(format!("failed to read file body: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::InlineButton;

    #[test]
    fn debug_output_redacts_the_token() {
        let transport =
            BotApiTransport::new("123456:very-secret-token").expect("build transport");
        let debug = format!("{transport:?}");
        assert!(!debug.contains("very-secret-token"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn keyboard_markup_preserves_rows_and_payloads() {
        let keyboard = vec![
            vec![
                InlineButton::new("Sonnet", "model:sonnet"),
                InlineButton::new("Opus", "model:opus"),
            ],
            vec![InlineButton::new("New Session", "session:__new__")],
        ];

        let markup = BotApiTransport::keyboard_markup(&keyboard);
        assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], "model:opus");
        assert_eq!(markup["inline_keyboard"][1][0]["text"], "New Session");
    }
}
