//! Agent option assembly and tool-permission enforcement.
//!
//! The builder merges explicit per-query overrides over the CLI user's own
//! settings file over SDK defaults, and always surfaces the CLI's native
//! preset untouched — the bridge adds a display hint, never a replacement
//! prompt.

mod builder;
mod guard;

pub use builder::{AgentOptions, OptionsBuilder, OptionsRequest, PermissionMode, SystemPrompt};
pub use guard::{PermissionDecision, PermissionGuard};
