use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat transport error: {0}")]
    Transport(String),
    #[error("chat api error: {0}")]
    Api(String),
    #[error("chat decode error: {0}")]
    Decode(String),
    #[error("can't process '{filename}' ({mime_type}); try sending it as PDF or pasting the content as text")]
    UnsupportedAttachment { filename: String, mime_type: String },
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Opaque reference to one posted chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
}

impl ChatAction {
    pub fn as_api_value(&self) -> &'static str {
        match self {
            Self::Typing => "typing",
            Self::UploadDocument => "upload_document",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub label: String,
    pub callback_data: String,
}

impl InlineButton {
    pub fn new(label: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            callback_data: callback_data.into(),
        }
    }
}

pub type InlineKeyboard = Vec<Vec<InlineButton>>;

/// One attached document as the platform describes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingDocument {
    pub file_id: String,
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

/// One inbound chat message, already reduced to the fields the bridge needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IncomingMessage {
    pub chat_id: i64,
    pub message_id: i64,
    pub user_id: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    /// File id of the largest available photo size, when the message is a photo.
    pub photo_file_id: Option<String>,
    pub document: Option<IncomingDocument>,
    pub media_group_id: Option<String>,
}

impl IncomingMessage {
    pub fn has_attachment(&self) -> bool {
        self.photo_file_id.is_some() || self.document.is_some()
    }
}

/// One inline-keyboard callback press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub user_id: i64,
    pub message: MessageHandle,
    pub data: String,
}

/// The chat platform, reduced to the operations the core needs. The renderer
/// never calls a delete operation; none is offered here.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> ChatResult<MessageHandle>;

    async fn send_message_with_keyboard(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<MessageHandle>;

    async fn edit_message(&self, handle: &MessageHandle, text: &str) -> ChatResult<()>;

    async fn edit_message_with_keyboard(
        &self,
        handle: &MessageHandle,
        text: &str,
        keyboard: &InlineKeyboard,
    ) -> ChatResult<()>;

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> ChatResult<()>;

    async fn answer_callback(&self, callback_id: &str) -> ChatResult<()>;

    async fn download_file(&self, file_id: &str) -> ChatResult<Vec<u8>>;
}
