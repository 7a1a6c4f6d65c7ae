// actor/mod.rs - Actor Module

//! Actor-based agent execution using Actix.
//!
//! - `Agent` - user logic, called one message at a time
//! - `AgentActor` - wraps a behaviour; its actix mailbox is the agent mailbox
//! - `AgentCell` - lifecycle state shared between actor, manager and router
//! - `AgentCatalog` - maps (module, class) to behaviour factories
//! - `WorkerPool` - arbiters agents are spread over
//!
//! # Example
//!
//! ```ignore
//! use fipa_cluster_agents::actor::*;
//! use fipa_cluster_agents::AclMessage;
//!
//! struct Counter(u64);
//!
//! impl Agent for Counter {
//!     fn on_message(&mut self, _ctx: &AgentContext, _msg: AclMessage) -> anyhow::Result<()> {
//!         self.0 += 1;
//!         Ok(())
//!     }
//! }
//!
//! let catalog = AgentCatalog::new();
//! catalog.register("demo", "Counter", |_args| Ok(Box::new(Counter(0)) as Box<dyn Agent>));
//! ```

mod agent_actor;
mod behaviour;
pub mod builtin;
mod catalog;
mod messages;
mod pool;
mod state;

pub use agent_actor::AgentActor;
pub use behaviour::{Agent, AgentContext, InitArgs};
pub use builtin::{EchoAgent, LogAgent, BUILTIN_MODULE};
pub use catalog::{AgentCatalog, AgentClass, AgentFactory};
pub use messages::*;
pub use pool::WorkerPool;
pub use state::{AgentCell, AgentState};
