// cluster/bridge.rs - Cluster Bridge

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::channel::{ChannelListener, GroupChannel};
use super::wire::{CodecError, WireFrame};
use crate::acl_message::AclMessage;
use crate::aid::{Aid, NodeId};
use crate::error::AgentError;
use crate::observability::{record_bridge_frame_received, record_bridge_frame_sent};
use crate::registry::RegistryUpdate;

/// Frame counters
#[derive(Debug, Default)]
struct BridgeCounters {
    sent: AtomicU64,
    received: AtomicU64,
    send_failures: AtomicU64,
}

/// Bridge statistics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeStats {
    pub frames_sent: u64,
    pub frames_received: u64,
    pub send_failures: u64,
}

/// Links this node to the rest of its cluster and, optionally, to peer
/// clusters through a relay group.
///
/// All sends are enqueue-only: they return once the channel accepted the
/// frame.
pub struct ClusterBridge {
    cluster: Arc<dyn GroupChannel>,
    relay: Option<Arc<dyn GroupChannel>>,
    counters: BridgeCounters,
}

impl ClusterBridge {
    pub fn new(cluster: Arc<dyn GroupChannel>, relay: Option<Arc<dyn GroupChannel>>) -> Self {
        match &relay {
            Some(relay) => info!(
                cluster = cluster.group_name(),
                relay = relay.group_name(),
                "Relay enabled, remote clusters reachable"
            ),
            None => info!("Relay not specified, support for remote clusters disabled"),
        }

        Self {
            cluster,
            relay,
            counters: BridgeCounters::default(),
        }
    }

    /// Install the frame receivers. Join callbacks may fire from inside this
    /// call.
    pub fn attach(
        &self,
        cluster_listener: Weak<dyn ChannelListener>,
        relay_listener: Option<Weak<dyn ChannelListener>>,
    ) {
        self.cluster.set_listener(cluster_listener);
        if let (Some(relay), Some(listener)) = (&self.relay, relay_listener) {
            relay.set_listener(listener);
        }
    }

    pub fn local_node(&self) -> &NodeId {
        self.cluster.local_node()
    }

    pub fn cluster_name(&self) -> &str {
        self.cluster.group_name()
    }

    /// Reachable cluster members, including this node
    pub fn members(&self) -> Vec<NodeId> {
        self.cluster.members()
    }

    pub fn is_member(&self, node: &NodeId) -> bool {
        self.cluster.is_member(node)
    }

    pub fn has_relay(&self) -> bool {
        self.relay.is_some()
    }

    pub fn stats(&self) -> BridgeStats {
        BridgeStats {
            frames_sent: self.counters.sent.load(Ordering::Relaxed),
            frames_received: self.counters.received.load(Ordering::Relaxed),
            send_failures: self.counters.send_failures.load(Ordering::Relaxed),
        }
    }

    // =========================================================================
    // Outbound
    // =========================================================================

    fn send_on(&self, channel: &dyn GroupChannel, to: &NodeId, frame: &WireFrame) -> Result<(), AgentError> {
        let bytes = frame.encode()?;
        match channel.send(to, bytes) {
            Ok(()) => {
                self.counters.sent.fetch_add(1, Ordering::Relaxed);
                record_bridge_frame_sent(frame.kind());
                debug!(to = %to, kind = frame.kind(), "Frame sent");
                Ok(())
            }
            Err(e) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(to = %to, kind = frame.kind(), error = %e, "Frame send failed");
                Err(AgentError::BridgeUnavailable(format!("{to}: {e}")))
            }
        }
    }

    /// Hand a message to the node owning `receivers`
    pub fn forward(&self, node: &NodeId, message: &AclMessage, receivers: Vec<Aid>) -> Result<(), AgentError> {
        let frame = WireFrame::Deliver {
            message: message.clone(),
            receivers,
        };
        self.send_on(self.cluster.as_ref(), node, &frame)
    }

    /// Hand a message to another cluster.
    ///
    /// Goes straight to `node` when it is in the relay group, otherwise to
    /// the first other relay member, which routes it inside its cluster.
    pub fn relay(&self, node: &NodeId, message: &AclMessage, receivers: Vec<Aid>) -> Result<(), AgentError> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| AgentError::BridgeUnavailable("relay not configured".into()))?;

        let target = if relay.is_member(node) {
            node.clone()
        } else {
            relay
                .members()
                .into_iter()
                .find(|m| m != relay.local_node())
                .ok_or_else(|| AgentError::BridgeUnavailable("no relay peer reachable".into()))?
        };

        let frame = WireFrame::Relay {
            origin_cluster: self.cluster.group_name().to_string(),
            message: message.clone(),
            receivers,
        };
        self.send_on(relay.as_ref(), &target, &frame)
    }

    /// Broadcast a registry change to the cluster
    pub fn publish(&self, update: RegistryUpdate) -> Result<(), AgentError> {
        let frame = WireFrame::Registry(update);
        let bytes = frame.encode()?;
        let peers = self.cluster.members().len().saturating_sub(1);

        self.cluster.broadcast(bytes).map_err(|e| {
            self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
            AgentError::BridgeUnavailable(e.to_string())
        })?;

        self.counters.sent.fetch_add(peers as u64, Ordering::Relaxed);
        if peers > 0 {
            record_bridge_frame_sent(frame.kind());
        }
        Ok(())
    }

    pub fn send_update_to(&self, node: &NodeId, update: RegistryUpdate) -> Result<(), AgentError> {
        self.send_on(self.cluster.as_ref(), node, &WireFrame::Registry(update))
    }

    /// Ask a peer to send its registry snapshot back
    pub fn request_sync(&self, node: &NodeId) -> Result<(), AgentError> {
        self.send_on(self.cluster.as_ref(), node, &WireFrame::SyncRequest)
    }

    /// Ask the owning node to stop an agent
    pub fn request_stop(&self, node: &NodeId, aid: &Aid) -> Result<(), AgentError> {
        self.send_on(self.cluster.as_ref(), node, &WireFrame::Stop { aid: aid.clone() })
    }

    pub fn ping(&self, node: &NodeId, nonce: u64) -> Result<(), AgentError> {
        self.send_on(self.cluster.as_ref(), node, &WireFrame::Ping { nonce })
    }

    pub fn pong(&self, node: &NodeId, nonce: u64) -> Result<(), AgentError> {
        self.send_on(self.cluster.as_ref(), node, &WireFrame::Pong { nonce })
    }

    // =========================================================================
    // Inbound
    // =========================================================================

    /// Decode an inbound frame and count it
    pub fn decode(&self, from: &NodeId, bytes: &[u8]) -> Result<WireFrame, CodecError> {
        let frame = WireFrame::decode(bytes).inspect_err(|e| {
            warn!(from = %from, error = %e, "Undecodable frame");
        })?;
        self.counters.received.fetch_add(1, Ordering::Relaxed);
        record_bridge_frame_received(frame.kind());
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::Performative;
    use crate::cluster::LocalHub;
    use bytes::Bytes;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Inbox {
        frames: Mutex<Vec<Bytes>>,
    }

    impl ChannelListener for Inbox {
        fn on_frame(&self, _from: &NodeId, frame: Bytes) {
            self.frames.lock().push(frame);
        }
    }

    fn listen(inbox: &Arc<Inbox>) -> Weak<dyn ChannelListener> {
        Arc::downgrade(inbox) as Weak<dyn ChannelListener>
    }

    #[test]
    fn test_forward_reaches_owner() {
        let hub = LocalHub::new("cluster");
        let a = ClusterBridge::new(hub.join("a"), None);
        let b = ClusterBridge::new(hub.join("b"), None);
        let inbox_a = Arc::new(Inbox::default());
        let inbox_b = Arc::new(Inbox::default());
        a.attach(listen(&inbox_a), None);
        b.attach(listen(&inbox_b), None);

        let msg = AclMessage::new(Performative::Inform).with_receiver(Aid::new("x", "m"));
        a.forward(&"b".into(), &msg, vec![Aid::new("x", "m")]).unwrap();

        let frames = inbox_b.frames.lock();
        let frame = b.decode(&"a".into(), &frames[0]).unwrap();
        assert!(matches!(frame, WireFrame::Deliver { receivers, .. } if receivers.len() == 1));
        assert_eq!(a.stats().frames_sent, 1);
        assert_eq!(b.stats().frames_received, 1);
    }

    #[test]
    fn test_relay_absent() {
        let hub = LocalHub::new("cluster");
        let a = ClusterBridge::new(hub.join("a"), None);
        assert!(!a.has_relay());

        let msg = AclMessage::new(Performative::Inform);
        assert!(matches!(
            a.relay(&"far".into(), &msg, vec![]),
            Err(AgentError::BridgeUnavailable(_))
        ));
    }

    #[test]
    fn test_forward_to_missing_node() {
        let hub = LocalHub::new("cluster");
        let a = ClusterBridge::new(hub.join("a"), None);
        let inbox = Arc::new(Inbox::default());
        a.attach(listen(&inbox), None);

        let msg = AclMessage::new(Performative::Inform);
        assert!(matches!(
            a.forward(&"gone".into(), &msg, vec![]),
            Err(AgentError::BridgeUnavailable(_))
        ));
        assert_eq!(a.stats().send_failures, 1);
    }
}
