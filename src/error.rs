// error.rs - Runtime Error Types

use crate::aid::Aid;
use crate::cluster::{ChannelError, CodecError};

/// Errors surfaced by runtime operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum AgentError {
    #[error("Agent already registered: {0}")]
    NameConflict(Aid),

    #[error("Agent not found: {0}")]
    NotFound(Aid),

    #[error("Unknown receiver: {0}")]
    UnknownReceiver(Aid),

    #[error("Agent stopped: {0}")]
    AgentStopped(Aid),

    #[error("Handler failure in {aid}: {reason}")]
    HandlerFailure { aid: Aid, reason: String },

    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("Unknown agent class: {module}/{class_name}")]
    UnknownAgentClass { module: String, class_name: String },

    #[error("Agent initialization failed: {0}")]
    InitFailed(String),

    #[error("Message has no receivers")]
    EmptyReceivers,

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Runtime is shutting down")]
    RuntimeUnavailable,

    #[error("Timeout")]
    Timeout,
}
