// cluster/wire.rs - Bridge Wire Frames

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::acl_message::AclMessage;
use crate::aid::Aid;
use crate::registry::RegistryUpdate;

/// Wire codec errors
#[derive(Debug, Clone, Error)]
pub enum CodecError {
    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}

/// Frames exchanged between nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireFrame {
    /// Deliver `message` to the listed receivers, all owned by the target node
    Deliver {
        message: AclMessage,
        receivers: Vec<Aid>,
    },

    /// Message arriving from a peer cluster
    Relay {
        origin_cluster: String,
        message: AclMessage,
        receivers: Vec<Aid>,
    },

    /// Registry replication
    Registry(RegistryUpdate),

    /// Stop an agent owned by the target node
    Stop { aid: Aid },

    /// Ask the target node for a snapshot of the entries it owns
    SyncRequest,

    Ping { nonce: u64 },

    Pong { nonce: u64 },
}

impl WireFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            WireFrame::Deliver { .. } => "deliver",
            WireFrame::Relay { .. } => "relay",
            WireFrame::Registry(_) => "registry",
            WireFrame::Stop { .. } => "stop",
            WireFrame::SyncRequest => "sync-request",
            WireFrame::Ping { .. } => "ping",
            WireFrame::Pong { .. } => "pong",
        }
    }

    pub fn encode(&self) -> Result<Bytes, CodecError> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(frame, _)| frame)
            .map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::{MessageContent, Performative};
    use crate::registry::RegistryEntry;

    #[test]
    fn test_deliver_frame_keeps_envelope() {
        let message = AclMessage::new(Performative::Propose)
            .with_sender(Aid::new("seller", "market").on_node("n1"))
            .with_receiver(Aid::new("buyer", "market"))
            .with_content(MessageContent::json(&serde_json::json!({"price": 12})).unwrap())
            .with_reply_with("r-1")
            .with_user_arg("round", "2")
            .with_reply_by(chrono::Utc::now());

        let frame = WireFrame::Deliver {
            message: message.clone(),
            receivers: vec![Aid::new("buyer", "market").on_node("n2")],
        };

        let decoded = WireFrame::decode(&frame.encode().unwrap()).unwrap();
        match decoded {
            WireFrame::Deliver { message: m, receivers } => {
                assert_eq!(m, message);
                assert_eq!(m.sender().unwrap().node().map(|n| n.as_str()), Some("n1"));
                assert_eq!(receivers[0].node().map(|n| n.as_str()), Some("n2"));
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_registry_frame() {
        let frame = WireFrame::Registry(RegistryUpdate::Snapshot {
            node: "n1".into(),
            entries: vec![RegistryEntry::new(&Aid::new("a", "m"), "n1".into())],
        });
        assert_eq!(WireFrame::decode(&frame.encode().unwrap()).unwrap(), frame);
        assert_eq!(frame.kind(), "registry");
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(matches!(WireFrame::decode(&[0xff, 0xff, 0xff]), Err(CodecError::Decode(_))));
    }
}
