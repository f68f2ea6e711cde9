use std::sync::Arc;

use async_trait::async_trait;
use courier_options::AgentOptions;
use courier_protocol::{AgentMessage, AgentResult, ContentBlock, ServerInfo};

/// One connection to the agent SDK subprocess.
///
/// All methods take `&self` so an [`interrupt`](AgentClient::interrupt) can be
/// issued from any task, but the serialization discipline still holds: the
/// owning actor is the only caller of `connect`, `send_query`, `next_message`
/// and `disconnect`, and it runs them all on its single worker task.
#[async_trait]
pub trait AgentClient: Send + Sync {
    /// Establish the subprocess channel. May only be called once.
    async fn connect(&self) -> AgentResult<()>;

    /// Feed one user turn into the agent as structured content blocks.
    async fn send_query(&self, blocks: Vec<ContentBlock>) -> AgentResult<()>;

    /// Next message from the agent's output stream; `None` when the stream
    /// has ended. The stream is a finite, non-resumable producer.
    async fn next_message(&self) -> AgentResult<Option<AgentMessage>>;

    /// Ask the agent to abandon the in-flight turn.
    async fn interrupt(&self) -> AgentResult<()>;

    /// Tear the subprocess down. Idempotent.
    async fn disconnect(&self) -> AgentResult<()>;

    /// Initialize-time metadata (slash commands and friends).
    async fn server_info(&self) -> AgentResult<ServerInfo>;
}

/// Creates clients for new actors; tests swap in scripted fakes.
pub trait AgentClientFactory: Send + Sync {
    fn create(&self, options: &AgentOptions) -> AgentResult<Arc<dyn AgentClient>>;
}

pub struct SubprocessClientFactory;

impl AgentClientFactory for SubprocessClientFactory {
    fn create(&self, options: &AgentOptions) -> AgentResult<Arc<dyn AgentClient>> {
        Ok(Arc::new(crate::subprocess::SubprocessAgentClient::new(
            options.clone(),
        )))
    }
}
