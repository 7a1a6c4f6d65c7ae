// cluster/hub.rs - In-Process Group Channel

//! A [`GroupChannel`] whose members live in the same process.
//!
//! Frames are handed to the receiving listener synchronously on the sender's
//! thread. Used for single-process multi-node setups and tests; partitions
//! are simulated with [`LocalHub::disconnect`] and [`LocalHub::reconnect`].

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

use super::channel::{ChannelError, ChannelListener, GroupChannel};
use crate::aid::NodeId;

struct HubMember {
    listener: Option<Weak<dyn ChannelListener>>,
    connected: bool,
}

struct HubInner {
    name: String,
    members: DashMap<NodeId, HubMember>,
}

impl HubInner {
    fn listener_of(&self, node: &NodeId) -> Option<Arc<dyn ChannelListener>> {
        self.members
            .get(node)
            .filter(|m| m.connected)
            .and_then(|m| m.listener.clone())
            .and_then(|weak| weak.upgrade())
    }

    fn reachable(&self) -> Vec<NodeId> {
        self.members
            .iter()
            .filter(|m| m.connected && m.listener.is_some())
            .map(|m| m.key().clone())
            .collect()
    }

    fn is_connected(&self, node: &NodeId) -> bool {
        self.members.get(node).is_some_and(|m| m.connected)
    }

    /// Tell `node` and every reachable peer about each other
    fn announce(&self, node: &NodeId, joined: bool) {
        let peers: Vec<NodeId> = self.reachable().into_iter().filter(|p| p != node).collect();
        let own = self
            .members
            .get(node)
            .and_then(|m| m.listener.clone())
            .and_then(|weak| weak.upgrade());

        for peer in &peers {
            if let Some(listener) = self.listener_of(peer) {
                if joined {
                    listener.on_member_joined(node);
                } else {
                    listener.on_member_left(node);
                }
            }
            if let Some(own) = &own {
                if joined {
                    own.on_member_joined(peer);
                } else {
                    own.on_member_left(peer);
                }
            }
        }
    }
}

/// In-process group
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                name: name.into(),
                members: DashMap::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Channel endpoint for `node`; it becomes visible to the others once
    /// its listener is installed
    pub fn join(&self, node: impl Into<NodeId>) -> Arc<HubChannel> {
        let node = node.into();
        self.inner.members.entry(node.clone()).or_insert(HubMember {
            listener: None,
            connected: true,
        });
        Arc::new(HubChannel {
            node,
            hub: self.inner.clone(),
        })
    }

    /// Cut `node` off from every other member
    pub fn disconnect(&self, node: &NodeId) {
        // announce before the flag flips so both sides still see each other
        self.inner.announce(node, false);
        if let Some(mut member) = self.inner.members.get_mut(node) {
            member.connected = false;
        }
        info!(hub = %self.inner.name, node = %node, "Node disconnected");
    }

    /// Undo [`LocalHub::disconnect`]
    pub fn reconnect(&self, node: &NodeId) {
        if let Some(mut member) = self.inner.members.get_mut(node) {
            member.connected = true;
        }
        info!(hub = %self.inner.name, node = %node, "Node reconnected");
        self.inner.announce(node, true);
    }
}

/// One node's endpoint on a [`LocalHub`]
pub struct HubChannel {
    node: NodeId,
    hub: Arc<HubInner>,
}

impl GroupChannel for HubChannel {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    fn group_name(&self) -> &str {
        &self.hub.name
    }

    fn members(&self) -> Vec<NodeId> {
        if !self.hub.is_connected(&self.node) {
            return vec![self.node.clone()];
        }

        let mut members = self.hub.reachable();
        if !members.contains(&self.node) {
            members.push(self.node.clone());
        }
        members.sort();
        members
    }

    fn send(&self, to: &NodeId, frame: Bytes) -> Result<(), ChannelError> {
        if to != &self.node && !self.hub.is_connected(&self.node) {
            return Err(ChannelError::Unreachable(to.clone()));
        }

        let listener = self
            .hub
            .listener_of(to)
            .ok_or_else(|| ChannelError::Unreachable(to.clone()))?;

        debug!(hub = %self.hub.name, from = %self.node, to = %to, bytes = frame.len(), "Hub frame");
        listener.on_frame(&self.node, frame);
        Ok(())
    }

    fn set_listener(&self, listener: Weak<dyn ChannelListener>) {
        if let Some(mut member) = self.hub.members.get_mut(&self.node) {
            member.listener = Some(listener);
        }
        if self.hub.is_connected(&self.node) {
            self.hub.announce(&self.node, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(NodeId, Bytes)>>,
        joined: Mutex<Vec<NodeId>>,
        left: Mutex<Vec<NodeId>>,
    }

    impl ChannelListener for Recorder {
        fn on_frame(&self, from: &NodeId, frame: Bytes) {
            self.frames.lock().push((from.clone(), frame));
        }

        fn on_member_joined(&self, node: &NodeId) {
            self.joined.lock().push(node.clone());
        }

        fn on_member_left(&self, node: &NodeId) {
            self.left.lock().push(node.clone());
        }
    }

    fn attach(channel: &HubChannel) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        let weak: Weak<dyn ChannelListener> = Arc::downgrade(&recorder) as Weak<dyn ChannelListener>;
        channel.set_listener(weak);
        recorder
    }

    #[test]
    fn test_membership_and_send() {
        let hub = LocalHub::new("test");
        let a = hub.join("a");
        let b = hub.join("b");
        let rec_a = attach(&a);
        let rec_b = attach(&b);

        assert_eq!(a.members(), vec![NodeId::from("a"), NodeId::from("b")]);
        assert_eq!(rec_a.joined.lock().as_slice(), &[NodeId::from("b")]);
        assert_eq!(rec_b.joined.lock().as_slice(), &[NodeId::from("a")]);

        a.send(&"b".into(), Bytes::from_static(b"hi")).unwrap();
        let frames = rec_b.frames.lock();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].0, NodeId::from("a"));
    }

    #[test]
    fn test_unknown_peer_is_unreachable() {
        let hub = LocalHub::new("test");
        let a = hub.join("a");
        let _rec = attach(&a);
        assert!(matches!(
            a.send(&"ghost".into(), Bytes::new()),
            Err(ChannelError::Unreachable(_))
        ));
    }

    #[test]
    fn test_partition() {
        let hub = LocalHub::new("test");
        let a = hub.join("a");
        let b = hub.join("b");
        let rec_a = attach(&a);
        let _rec_b = attach(&b);

        hub.disconnect(&"b".into());
        assert_eq!(rec_a.left.lock().as_slice(), &[NodeId::from("b")]);
        assert_eq!(a.members(), vec![NodeId::from("a")]);
        assert_eq!(b.members(), vec![NodeId::from("b")]);
        assert!(a.send(&"b".into(), Bytes::new()).is_err());
        assert!(b.send(&"a".into(), Bytes::new()).is_err());

        hub.reconnect(&"b".into());
        assert_eq!(rec_a.joined.lock().len(), 2);
        assert!(a.send(&"b".into(), Bytes::new()).is_ok());
    }
}
