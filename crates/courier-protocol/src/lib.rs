//! Shared protocol types for the courier bridge.
//!
//! Everything that crosses a crate boundary lives here: the content blocks
//! the agent SDK accepts, the typed messages it emits, the one-place stream
//! classification, and the errors the agent layer speaks.

pub mod command;
pub mod content;
pub mod error;
pub mod event;
pub mod message;

pub use command::{ServerInfo, SlashCommand};
pub use content::{Attachment, ContentBlock, MediaSource, Query, QueryResult};
pub use error::{AgentError, AgentResult};
pub use event::{classify, NullSink, StreamEvent, StreamSink};
pub use message::{extract_tool_result_text, AgentMessage, AssistantBlock, ResultPayload};
