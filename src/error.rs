use thiserror::Error;

use crate::dom::DomError;

/// Failures of a single tool invocation. Never fatal to a session.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid input for {tool}: {reason}")]
    Validation { tool: &'static str, reason: String },

    #[error("no element matches {0}")]
    NotFound(String),

    #[error("document not ready: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Dom(#[from] DomError),
}

/// Errors surfaced by the page controller, the collaborator and the runner.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("frame window is not ready")]
    NotReady,

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("a session is already running")]
    Busy,
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        AgentError::Transport(err.to_string())
    }
}
