// cluster/mod.rs - Cluster Bridge and Group Channels

//! Node-to-node plumbing.
//!
//! - `GroupChannel` - membership plus point-to-point and broadcast frames
//! - `LocalHub` - in-process channel, with partition simulation
//! - `TcpChannel` - length-prefixed frames over TCP
//! - `WireFrame` - bincode-encoded frames carried by any channel
//! - `ClusterBridge` - typed sends on the cluster channel and optional relay

mod bridge;
mod channel;
mod hub;
mod tcp;
mod wire;

pub use bridge::{BridgeStats, ClusterBridge};
pub use channel::{ChannelError, ChannelListener, GroupChannel};
pub use hub::{HubChannel, LocalHub};
pub use tcp::{TcpChannel, MAX_FRAME_SIZE};
pub use wire::{CodecError, WireFrame};
