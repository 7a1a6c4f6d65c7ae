// router.rs - Message Router

//! Location-transparent delivery.
//!
//! The router resolves every receiver against the local registry copy and
//! then either enqueues into a local mailbox, forwards one frame per owning
//! node over the cluster bridge, or hands the message to the relay when the
//! receiver is pinned to a node outside this cluster. Each receiver gets its
//! own outcome; a failure never stops the others.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::acl_message::{AclMessage, MessageContent, Performative};
use crate::actor::Deliver;
use crate::aid::{Aid, NodeId};
use crate::cluster::ClusterBridge;
use crate::error::AgentError;
use crate::observability::{record_delivery_failure, record_message_delivered};
use crate::registry::{AgentHandle, Registry, Resolution};

/// Per-receiver delivery result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Enqueued in a local mailbox
    Delivered,
    /// Handed to the bridge for the owning node
    Forwarded(NodeId),
    /// Handed to the inter-cluster relay
    Relayed(NodeId),
    UnknownReceiver,
    AgentStopped,
    BridgeUnavailable(String),
}

impl DeliveryOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            DeliveryOutcome::Delivered | DeliveryOutcome::Forwarded(_) | DeliveryOutcome::Relayed(_)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryOutcome::Delivered => "delivered",
            DeliveryOutcome::Forwarded(_) => "forwarded",
            DeliveryOutcome::Relayed(_) => "relayed",
            DeliveryOutcome::UnknownReceiver => "unknown_receiver",
            DeliveryOutcome::AgentStopped => "agent_stopped",
            DeliveryOutcome::BridgeUnavailable(_) => "bridge_unavailable",
        }
    }

    /// The matching error, for failures
    pub fn to_error(&self, aid: &Aid) -> Option<AgentError> {
        match self {
            DeliveryOutcome::UnknownReceiver => Some(AgentError::UnknownReceiver(aid.clone())),
            DeliveryOutcome::AgentStopped => Some(AgentError::AgentStopped(aid.clone())),
            DeliveryOutcome::BridgeUnavailable(reason) => Some(AgentError::BridgeUnavailable(reason.clone())),
            _ => None,
        }
    }
}

/// Outcomes of one `deliver` call, in receiver order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub outcomes: Vec<(Aid, DeliveryOutcome)>,
}

impl DeliveryReport {
    pub fn outcome(&self, aid: &Aid) -> Option<&DeliveryOutcome> {
        self.outcomes.iter().find(|(a, _)| a == aid).map(|(_, o)| o)
    }

    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(|(_, o)| o.is_success())
    }

    pub fn failures(&self) -> Vec<(&Aid, &DeliveryOutcome)> {
        self.outcomes
            .iter()
            .filter(|(_, o)| !o.is_success())
            .map(|(a, o)| (a, o))
            .collect()
    }

    pub fn delivered_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }
}

/// Where one receiver is headed
enum Route {
    Local(AgentHandle),
    Remote(NodeId),
    Relay(NodeId),
    Unknown,
}

/// Message router
pub struct Router {
    node_id: NodeId,
    registry: Arc<Registry>,
    bridge: Arc<ClusterBridge>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, bridge: Arc<ClusterBridge>) -> Self {
        Self {
            node_id: registry.node_id().clone(),
            registry,
            bridge,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Route a message to all of its receivers
    pub fn deliver(&self, msg: AclMessage) -> Result<DeliveryReport, AgentError> {
        self.route(&msg, msg.receivers(), true)
    }

    /// Build and route a single-receiver text message
    pub fn post_text(
        &self,
        sender: Aid,
        receiver: Aid,
        performative: Performative,
        content: impl Into<MessageContent>,
    ) -> Result<DeliveryReport, AgentError> {
        let msg = AclMessage::new(performative)
            .with_sender(sender)
            .with_receiver(receiver)
            .with_content(content);
        self.deliver(msg)
    }

    /// Deliver a frame forwarded by a cluster peer; never forwards again
    pub fn deliver_local(&self, msg: &AclMessage, receivers: &[Aid]) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for aid in dedup(receivers) {
            let outcome = match self.registry.local_handle(&aid) {
                Some(handle) => self.enqueue(&handle, msg),
                None => {
                    warn!(receiver = %aid, "Forwarded message for agent not running here");
                    DeliveryOutcome::UnknownReceiver
                }
            };
            self.account(&aid, &outcome);
            report.outcomes.push((aid, outcome));
        }

        report
    }

    /// Deliver a message arriving from another cluster. Routes inside this
    /// cluster but never back out over the relay.
    pub fn deliver_relayed(&self, msg: &AclMessage, receivers: &[Aid]) -> Result<DeliveryReport, AgentError> {
        let receivers = if receivers.is_empty() { msg.receivers() } else { receivers };
        self.route(msg, receivers, false)
    }

    fn route(&self, msg: &AclMessage, receivers: &[Aid], allow_relay: bool) -> Result<DeliveryReport, AgentError> {
        if receivers.is_empty() {
            record_delivery_failure("empty_receivers");
            return Err(AgentError::EmptyReceivers);
        }

        if msg.is_expired() {
            debug!(message_id = msg.message_id(), "Delivering message past its reply-by deadline");
        }

        let receivers = dedup(receivers);
        let routes: Vec<Route> = receivers
            .iter()
            .map(|aid| self.resolve(aid, allow_relay))
            .collect();

        let mut outcomes: Vec<Option<DeliveryOutcome>> = vec![None; receivers.len()];

        // local first; one frame per remote node, in first-seen order
        let mut remote: Vec<(NodeId, Vec<usize>)> = Vec::new();
        let mut relayed: Vec<(NodeId, Vec<usize>)> = Vec::new();

        for (idx, route) in routes.into_iter().enumerate() {
            match route {
                Route::Local(handle) => outcomes[idx] = Some(self.enqueue(&handle, msg)),
                Route::Unknown => outcomes[idx] = Some(DeliveryOutcome::UnknownReceiver),
                Route::Remote(node) => group(&mut remote, node, idx),
                Route::Relay(node) => group(&mut relayed, node, idx),
            }
        }

        for (node, indices) in remote {
            let aids: Vec<Aid> = indices.iter().map(|&i| receivers[i].clone()).collect();
            let outcome = match self.bridge.forward(&node, msg, aids) {
                Ok(()) => DeliveryOutcome::Forwarded(node),
                Err(e) => DeliveryOutcome::BridgeUnavailable(e.to_string()),
            };
            for i in indices {
                outcomes[i] = Some(outcome.clone());
            }
        }

        for (node, indices) in relayed {
            let aids: Vec<Aid> = indices.iter().map(|&i| receivers[i].clone()).collect();
            let outcome = match self.bridge.relay(&node, msg, aids) {
                Ok(()) => DeliveryOutcome::Relayed(node),
                Err(e) => DeliveryOutcome::BridgeUnavailable(e.to_string()),
            };
            for i in indices {
                outcomes[i] = Some(outcome.clone());
            }
        }

        let mut report = DeliveryReport::default();
        for (aid, outcome) in receivers.into_iter().zip(outcomes) {
            let outcome = outcome.unwrap_or(DeliveryOutcome::UnknownReceiver);
            self.account(&aid, &outcome);
            report.outcomes.push((aid, outcome));
        }

        debug!(
            message_id = msg.message_id(),
            performative = %msg.performative(),
            receivers = report.len(),
            delivered = report.delivered_count(),
            "Message routed"
        );
        Ok(report)
    }

    fn resolve(&self, aid: &Aid, allow_relay: bool) -> Route {
        match self.registry.resolve(aid) {
            Resolution::Local(handle) => Route::Local(handle),
            Resolution::Remote(node) => Route::Remote(node),
            Resolution::Unknown => match aid.node() {
                Some(node)
                    if allow_relay
                        && node != &self.node_id
                        && self.bridge.has_relay()
                        && !self.bridge.is_member(node) =>
                {
                    Route::Relay(node.clone())
                }
                _ => Route::Unknown,
            },
        }
    }

    fn enqueue(&self, handle: &AgentHandle, msg: &AclMessage) -> DeliveryOutcome {
        if handle.cell.is_stopped() || !handle.addr.connected() {
            return DeliveryOutcome::AgentStopped;
        }

        handle.addr.do_send(Deliver { message: msg.clone() });
        DeliveryOutcome::Delivered
    }

    fn account(&self, aid: &Aid, outcome: &DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered => record_message_delivered("local"),
            DeliveryOutcome::Forwarded(_) => record_message_delivered("remote"),
            DeliveryOutcome::Relayed(_) => record_message_delivered("relay"),
            failure => {
                debug!(receiver = %aid, outcome = failure.as_str(), "Delivery failed");
                record_delivery_failure(failure.as_str());
            }
        }
    }
}

/// Drop repeated receivers, keeping first occurrences in order
fn dedup(receivers: &[Aid]) -> Vec<Aid> {
    let mut seen = HashSet::new();
    receivers
        .iter()
        .filter(|aid| seen.insert((*aid).clone()))
        .cloned()
        .collect()
}

fn group(groups: &mut Vec<(NodeId, Vec<usize>)>, node: NodeId, idx: usize) {
    match groups.iter_mut().find(|(n, _)| *n == node) {
        Some((_, indices)) => indices.push(idx),
        None => groups.push((node, vec![idx])),
    }
}
