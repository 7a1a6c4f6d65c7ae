// actor/messages.rs - Inter-actor message types

use actix::prelude::*;
use serde::Serialize;

use crate::acl_message::AclMessage;
use crate::actor::AgentState;
use crate::aid::Aid;

/// Deliver an ACL message to an agent's mailbox
#[derive(Message, Clone, Debug)]
#[rtype(result = "()")]
pub struct Deliver {
    pub message: AclMessage,
}

/// Request shutdown of an agent
#[derive(Message, Debug)]
#[rtype(result = "()")]
pub struct Shutdown {
    pub reason: ShutdownReason,
}

/// Shutdown reasons
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Explicit stop request
    Requested,
    /// Node is shutting down
    NodeShutdown,
    /// Another node won the claim on this identity
    Conflict,
}

impl ShutdownReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownReason::Requested => "requested",
            ShutdownReason::NodeShutdown => "node_shutdown",
            ShutdownReason::Conflict => "conflict",
        }
    }
}

/// Agent runtime status
#[derive(Clone, Debug, Serialize)]
pub struct AgentStatus {
    pub aid: Aid,
    pub state: AgentState,
    pub messages_processed: u64,
    pub handler_failures: u64,
    pub messages_dropped: u64,
    pub uptime_secs: u64,
}
