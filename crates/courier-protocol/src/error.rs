use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    #[error("agent configuration error: {0}")]
    Configuration(String),
    #[error("agent dependency unavailable: {0}")]
    DependencyUnavailable(String),
    #[error("agent client not running: {0}")]
    NotRunning(String),
    #[error("agent process error: {0}")]
    Process(String),
    #[error("agent protocol error: {0}")]
    Protocol(String),
    #[error("agent internal error: {0}")]
    Internal(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
