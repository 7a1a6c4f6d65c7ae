// lib.rs - FIPA Distributed Agent Runtime
//
// Location-transparent FIPA-ACL messaging between actor-backed agents
// spread over the nodes of one or more clusters.

//! Distributed FIPA agent runtime.
//!
//! Agents are addressed by [`Aid`] (name plus module) and exchange
//! [`AclMessage`]s. Each agent runs as an actix actor that handles one
//! message at a time. A replicated [`Registry`] maps every identity to its
//! owning node, and the [`Router`] delivers locally or forwards over the
//! [`ClusterBridge`]. A [`Node`] is the entry point.

pub mod acl_message;
pub mod actor;
pub mod aid;
pub mod cluster;
pub mod config;
pub mod error;
pub mod manager;
pub mod node;
pub mod observability;
pub mod registry;
pub mod router;

// Re-export commonly used types
pub use acl_message::{AclMessage, MessageContent, ParsePerformativeError, Performative};

pub use actor::{
    Agent, AgentActor, AgentCatalog, AgentClass, AgentContext, AgentState, AgentStatus,
    InitArgs, ShutdownReason, BUILTIN_MODULE,
};

pub use aid::{Aid, NodeId};

pub use cluster::{
    ChannelError, ChannelListener, ClusterBridge, CodecError, GroupChannel, LocalHub, TcpChannel,
    WireFrame,
};

pub use config::{ConfigError, NodeConfig};

pub use error::AgentError;

pub use manager::AgentManager;

pub use node::{Node, NodeBuilder};

pub use registry::{AgentLocation, MemoryStore, Registry, RegistryEntry, RegistryStore};

pub use router::{DeliveryOutcome, DeliveryReport, Router};

pub use observability::{
    init_metrics, init_tracing, MetricsConfig, MetricsHandle, TracingConfig, TracingFormat,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::acl_message::{AclMessage, MessageContent, Performative};
    pub use crate::actor::{Agent, AgentCatalog, AgentContext, AgentState, InitArgs, BUILTIN_MODULE};
    pub use crate::aid::{Aid, NodeId};
    pub use crate::cluster::{GroupChannel, LocalHub, TcpChannel};
    pub use crate::error::AgentError;
    pub use crate::node::{Node, NodeBuilder};
    pub use crate::router::{DeliveryOutcome, DeliveryReport};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
