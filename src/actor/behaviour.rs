// actor/behaviour.rs - Agent Behaviour Trait

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use crate::acl_message::{AclMessage, MessageContent, Performative};
use crate::aid::{Aid, NodeId};
use crate::error::AgentError;
use crate::router::{DeliveryReport, Router};

/// Arguments handed to an agent factory at start
pub type InitArgs = BTreeMap<String, String>;

/// User-supplied agent logic.
///
/// The runtime calls these methods one at a time per agent. Errors and
/// panics from any of them are caught at the actor boundary; the agent keeps
/// running.
pub trait Agent: Send + 'static {
    /// Called once after the agent is registered
    fn on_start(&mut self, _ctx: &AgentContext) {}

    /// Handle one message
    fn on_message(&mut self, ctx: &AgentContext, msg: AclMessage) -> anyhow::Result<()>;

    /// Called once when the agent stops
    fn on_stop(&mut self, _ctx: &AgentContext) {}
}

/// What a running agent can see of the runtime
#[derive(Clone)]
pub struct AgentContext {
    aid: Aid,
    node_id: NodeId,
    router: Weak<Router>,
}

impl AgentContext {
    pub fn new(aid: Aid, node_id: NodeId, router: Weak<Router>) -> Self {
        Self { aid, node_id, router }
    }

    pub fn aid(&self) -> &Aid {
        &self.aid
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    fn router(&self) -> Result<Arc<Router>, AgentError> {
        self.router.upgrade().ok_or(AgentError::RuntimeUnavailable)
    }

    /// Post a message through the router
    pub fn post(&self, msg: AclMessage) -> Result<DeliveryReport, AgentError> {
        self.router()?.deliver(msg)
    }

    /// Answer `original` with the given performative and content
    pub fn reply(
        &self,
        original: &AclMessage,
        performative: Performative,
        content: impl Into<MessageContent>,
    ) -> Result<DeliveryReport, AgentError> {
        // in a multicast the replying agent need not be the first receiver
        let reply = original
            .make_reply(performative)
            .with_content(content)
            .with_sender(self.aid.clone());
        self.post(reply)
    }
}
