//! Chat-platform surface of the bridge: the platform trait and its HTTP
//! transport, the rolling progress renderer, secret redaction, and the
//! attachment pipeline.

mod api;
mod attachments;
mod collector;
mod progress;
mod redact;
pub mod test_support;
mod transport;

pub use api::{
    CallbackQuery, ChatAction, ChatApi, ChatError, ChatResult, IncomingDocument,
    IncomingMessage, InlineButton, InlineKeyboard, MessageHandle,
};
pub use attachments::{detect_image_media_type, AttachmentProcessor};
pub use collector::{MediaGroupCollector, DEFAULT_GROUP_TIMEOUT};
pub use progress::{
    summarize_tool_input, summarize_tool_result, tool_icon, ActivityEntry, ActivityKind,
    ProgressRenderer, RendererConfig, DEFAULT_EDIT_INTERVAL, DEFAULT_MAX_MESSAGE_LEN,
};
pub use redact::redact_secrets;
pub use transport::BotApiTransport;
