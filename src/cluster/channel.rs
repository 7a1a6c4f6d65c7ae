// cluster/channel.rs - Group Communication Channel

use bytes::Bytes;
use std::sync::Weak;
use thiserror::Error;
use tracing::warn;

use crate::aid::NodeId;

/// Group channel errors
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("Node not reachable: {0}")]
    Unreachable(NodeId),

    #[error("Channel closed")]
    Closed,

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChannelError {
    fn from(err: std::io::Error) -> Self {
        ChannelError::Io(err.to_string())
    }
}

/// Receiver side of a group channel
pub trait ChannelListener: Send + Sync {
    /// A frame arrived from `from`
    fn on_frame(&self, from: &NodeId, frame: Bytes);

    /// `node` became reachable
    fn on_member_joined(&self, _node: &NodeId) {}

    /// `node` is no longer reachable
    fn on_member_left(&self, _node: &NodeId) {}
}

/// Membership plus point-to-point and broadcast delivery among the nodes of
/// one group.
///
/// `send` only queues the frame: it returns once the channel has accepted
/// it and never waits for the peer to process it. A frame accepted for a
/// peer that then fails is lost.
pub trait GroupChannel: Send + Sync {
    fn local_node(&self) -> &NodeId;

    /// Group name (cluster or relay name)
    fn group_name(&self) -> &str;

    /// Reachable nodes, including this one
    fn members(&self) -> Vec<NodeId>;

    fn is_member(&self, node: &NodeId) -> bool {
        self.members().iter().any(|m| m == node)
    }

    fn send(&self, to: &NodeId, frame: Bytes) -> Result<(), ChannelError>;

    /// Send to every member but this one. Attempts all peers and reports the
    /// first failure.
    fn broadcast(&self, frame: Bytes) -> Result<(), ChannelError> {
        let mut first_error = None;
        for member in self.members() {
            if &member == self.local_node() {
                continue;
            }
            if let Err(e) = self.send(&member, frame.clone()) {
                warn!(peer = %member, error = %e, "Broadcast to peer failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Install the receiver; membership callbacks start flowing from here
    fn set_listener(&self, listener: Weak<dyn ChannelListener>);
}
