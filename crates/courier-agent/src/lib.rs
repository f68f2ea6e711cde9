//! Per-user agent actors and their manager.
//!
//! The agent SDK binds internal cancellation scopes to the task that called
//! `connect`, so one long-lived worker task per user owns the whole client
//! lifecycle; everything else talks to it through a bounded work queue.

mod actor;
mod client;
mod manager;
mod subprocess;
pub mod test_support;

pub use actor::{ExitCallback, UserAgent, UserAgentSpec};
pub use client::{AgentClient, AgentClientFactory, SubprocessClientFactory};
pub use manager::{AgentManager, ConnectRequest};
pub use subprocess::SubprocessAgentClient;
