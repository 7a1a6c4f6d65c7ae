// cluster/tcp.rs - TCP Group Channel

//! [`GroupChannel`] over plain TCP.
//!
//! Every node dials each configured peer and keeps one outbound connection
//! per peer; frames to a peer go out on that connection only, and a peer is
//! a member while its outbound connection is up. Inbound connections are
//! read-only. A node that dials in without being configured here is dialed
//! back at the listen address it announces.
//!
//! Framing: a 4-byte big-endian length followed by the payload. The first
//! frame on a connection is a bincode `Hello`; zero-length frames are
//! heartbeats.

use bytes::{Bytes, BytesMut};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::channel::{ChannelError, ChannelListener, GroupChannel};
use crate::aid::NodeId;
use crate::config::ClusterConfig;

/// Largest accepted frame payload
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    node: NodeId,
    group: String,
    /// Where the sender accepts connections
    listen: SocketAddr,
}

impl Hello {
    /// Address to dial back; an unspecified listen ip is taken from the
    /// connection's remote end
    fn dial_back_addr(&self, remote: SocketAddr) -> SocketAddr {
        if self.listen.ip().is_unspecified() {
            SocketAddr::new(remote.ip(), self.listen.port())
        } else {
            self.listen
        }
    }
}

struct PeerLink {
    addr: String,
    queue: mpsc::UnboundedSender<Bytes>,
    connected: Arc<AtomicBool>,
}

struct TcpInner {
    node: NodeId,
    group: String,
    local_addr: SocketAddr,
    heartbeat: Duration,
    reconnect: Duration,
    peers: DashMap<NodeId, PeerLink>,
    listener: RwLock<Option<Weak<dyn ChannelListener>>>,
}

impl TcpInner {
    fn listener(&self) -> Option<Arc<dyn ChannelListener>> {
        self.listener.read().as_ref().and_then(Weak::upgrade)
    }

    fn hello(&self) -> Result<Bytes, ChannelError> {
        let hello = Hello {
            node: self.node.clone(),
            group: self.group.clone(),
            listen: self.local_addr,
        };
        bincode::serde::encode_to_vec(&hello, bincode::config::standard())
            .map(Bytes::from)
            .map_err(|e| ChannelError::Handshake(e.to_string()))
    }

    /// Register a peer and spawn its outbound link; false if already known
    fn add_peer(self: &Arc<Self>, node: NodeId, addr: String) -> bool {
        if node == self.node {
            return false;
        }

        let (queue, rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));

        match self.peers.entry(node.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(PeerLink {
                    addr: addr.clone(),
                    queue,
                    connected: connected.clone(),
                });
            }
        }
        debug!(peer = %node, addr = %addr, "Adding peer");

        tokio::spawn(peer_link(Arc::downgrade(self), node, addr, rx, connected));
        true
    }
}

/// TCP-backed group channel
pub struct TcpChannel {
    inner: Arc<TcpInner>,
}

impl TcpChannel {
    /// Bind the listen address and dial the configured peers.
    ///
    /// Must run inside a Tokio runtime.
    pub async fn bind(node: NodeId, config: &ClusterConfig) -> Result<Arc<Self>, ChannelError> {
        let socket = TcpListener::bind(&config.listen).await?;
        let local_addr = socket.local_addr()?;

        let inner = Arc::new(TcpInner {
            node,
            group: config.name.clone(),
            local_addr,
            heartbeat: Duration::from_millis(config.heartbeat_ms.max(1)),
            reconnect: Duration::from_millis(config.reconnect_ms.max(1)),
            peers: DashMap::new(),
            listener: RwLock::new(None),
        });

        info!(
            node = %inner.node,
            group = %inner.group,
            addr = %local_addr,
            "Group channel listening"
        );
        tokio::spawn(accept_loop(Arc::downgrade(&inner), socket));

        let channel = Arc::new(Self { inner });
        for peer in &config.peers {
            channel.add_peer(NodeId::new(peer.node_id.clone()), peer.addr.clone());
        }
        Ok(channel)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Start dialing a peer. Must run inside a Tokio runtime.
    pub fn add_peer(&self, node: NodeId, addr: impl Into<String>) {
        self.inner.add_peer(node, addr.into());
    }

    /// Configured peers and their addresses
    pub fn peers(&self) -> Vec<(NodeId, String)> {
        self.inner
            .peers
            .iter()
            .map(|p| (p.key().clone(), p.addr.clone()))
            .collect()
    }
}

impl GroupChannel for TcpChannel {
    fn local_node(&self) -> &NodeId {
        &self.inner.node
    }

    fn group_name(&self) -> &str {
        &self.inner.group
    }

    fn members(&self) -> Vec<NodeId> {
        let mut members: Vec<NodeId> = self
            .inner
            .peers
            .iter()
            .filter(|p| p.connected.load(Ordering::Acquire))
            .map(|p| p.key().clone())
            .collect();
        members.push(self.inner.node.clone());
        members.sort();
        members
    }

    fn send(&self, to: &NodeId, frame: Bytes) -> Result<(), ChannelError> {
        if frame.len() > MAX_FRAME_SIZE {
            return Err(ChannelError::FrameTooLarge(frame.len()));
        }

        if to == &self.inner.node {
            let listener = self.inner.listener().ok_or(ChannelError::Closed)?;
            listener.on_frame(to, frame);
            return Ok(());
        }

        let link = self
            .inner
            .peers
            .get(to)
            .ok_or_else(|| ChannelError::Unreachable(to.clone()))?;
        if !link.connected.load(Ordering::Acquire) {
            return Err(ChannelError::Unreachable(to.clone()));
        }
        link.queue.send(frame).map_err(|_| ChannelError::Closed)
    }

    fn set_listener(&self, listener: Weak<dyn ChannelListener>) {
        *self.inner.listener.write() = Some(listener.clone());

        if let Some(listener) = listener.upgrade() {
            for member in self.members() {
                if member != self.inner.node {
                    listener.on_member_joined(&member);
                }
            }
        }
    }
}

// =============================================================================
// Connection tasks
// =============================================================================

async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<(), ChannelError> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    stream.write_all(&buf).await?;
    stream.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Bytes, ChannelError> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ChannelError::FrameTooLarge(len));
    }

    let mut buf = BytesMut::zeroed(len);
    stream.read_exact(&mut buf).await?;
    Ok(buf.freeze())
}

/// Outbound connection to one peer, redialed until the channel is dropped
async fn peer_link(
    inner: Weak<TcpInner>,
    peer: NodeId,
    addr: String,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    connected: Arc<AtomicBool>,
) {
    loop {
        let Some(channel) = inner.upgrade() else { return };
        let hello = match channel.hello() {
            Ok(hello) => hello,
            Err(e) => {
                warn!(error = %e, "Cannot encode handshake");
                return;
            }
        };
        let heartbeat = channel.heartbeat;
        let reconnect = channel.reconnect;
        drop(channel);

        match TcpStream::connect(&addr).await {
            Ok(mut stream) => {
                let _ = stream.set_nodelay(true);

                if let Err(e) = write_frame(&mut stream, &hello).await {
                    debug!(peer = %peer, error = %e, "Handshake failed");
                } else {
                    connected.store(true, Ordering::Release);
                    info!(peer = %peer, addr = %addr, "Peer connected");
                    if let Some(listener) = inner.upgrade().and_then(|c| c.listener()) {
                        listener.on_member_joined(&peer);
                    }

                    let result = pump(&mut stream, &mut rx, heartbeat).await;

                    connected.store(false, Ordering::Release);
                    if let Some(listener) = inner.upgrade().and_then(|c| c.listener()) {
                        listener.on_member_left(&peer);
                    }

                    match result {
                        Ok(()) => return,
                        Err(e) => warn!(peer = %peer, error = %e, "Peer connection lost"),
                    }
                }
            }
            Err(e) => debug!(peer = %peer, addr = %addr, error = %e, "Dial failed"),
        }

        tokio::time::sleep(reconnect).await;
    }
}

/// Drain the peer queue onto the socket; `Ok` means the queue closed
async fn pump(
    stream: &mut TcpStream,
    rx: &mut mpsc::UnboundedReceiver<Bytes>,
    heartbeat: Duration,
) -> Result<(), ChannelError> {
    let mut ticker = tokio::time::interval(heartbeat);
    ticker.tick().await;

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(frame) => write_frame(stream, &frame).await?,
                None => return Ok(()),
            },
            _ = ticker.tick() => write_frame(stream, &[]).await?,
        }
    }
}

/// Pause after a failed accept; `None` once the channel is gone
fn accept_backoff(inner: &Weak<TcpInner>) -> Option<Duration> {
    inner.upgrade().map(|channel| channel.reconnect)
}

async fn accept_loop(inner: Weak<TcpInner>, socket: TcpListener) {
    loop {
        let (stream, remote) = match socket.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                // EMFILE and friends fail again right away
                let Some(backoff) = accept_backoff(&inner) else { return };
                tokio::time::sleep(backoff).await;
                continue;
            }
        };
        if inner.strong_count() == 0 {
            return;
        }

        debug!(remote = %remote, "Inbound connection");
        tokio::spawn(inbound(inner.clone(), stream, remote));
    }
}

async fn inbound(inner: Weak<TcpInner>, mut stream: TcpStream, remote: SocketAddr) {
    let Some(channel) = inner.upgrade() else { return };
    let idle = channel.heartbeat * 3;
    let group = channel.group.clone();
    drop(channel);

    let hello: Hello = match tokio::time::timeout(idle, read_frame(&mut stream)).await {
        Ok(Ok(frame)) => {
            match bincode::serde::decode_from_slice(&frame, bincode::config::standard()) {
                Ok((hello, _)) => hello,
                Err(e) => {
                    warn!(remote = %remote, error = %e, "Bad handshake");
                    return;
                }
            }
        }
        _ => {
            debug!(remote = %remote, "No handshake");
            return;
        }
    };

    if hello.group != group {
        warn!(
            remote = %remote,
            peer = %hello.node,
            group = %hello.group,
            "Rejecting peer from another group"
        );
        return;
    }

    if let Some(channel) = inner.upgrade() {
        let addr = hello.dial_back_addr(remote);
        if channel.add_peer(hello.node.clone(), addr.to_string()) {
            info!(peer = %hello.node, addr = %addr, "Dialing back unconfigured peer");
        }
    }

    loop {
        let frame = match tokio::time::timeout(idle, read_frame(&mut stream)).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                debug!(peer = %hello.node, error = %e, "Inbound connection closed");
                return;
            }
            Err(_) => {
                warn!(peer = %hello.node, "Inbound connection idle, closing");
                return;
            }
        };

        if frame.is_empty() {
            continue;
        }

        let Some(channel) = inner.upgrade() else { return };
        match channel.listener() {
            Some(listener) => listener.on_frame(&hello.node, frame),
            None => debug!(peer = %hello.node, "Frame before listener installed, dropped"),
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
    }

    impl ChannelListener for Recorder {
        fn on_frame(&self, from: &NodeId, frame: Bytes) {
            self.frames.lock().push((from.clone(), frame));
        }
    }

    fn config() -> ClusterConfig {
        ClusterConfig {
            name: "tcp-test".to_string(),
            listen: "127.0.0.1:0".to_string(),
            heartbeat_ms: 200,
            reconnect_ms: 50,
            ..Default::default()
        }
    }

    async fn wait_for<F: Fn() -> bool>(check: F) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_frames_flow_between_peers() {
        let a = TcpChannel::bind("a".into(), &config()).await.unwrap();
        let b = TcpChannel::bind("b".into(), &config()).await.unwrap();

        let rec_b = Arc::new(Recorder::default());
        let weak: Weak<dyn ChannelListener> = Arc::downgrade(&rec_b) as Weak<dyn ChannelListener>;
        b.set_listener(weak);

        a.add_peer("b".into(), b.local_addr().to_string());
        assert!(wait_for(|| a.is_member(&"b".into())).await);

        a.send(&"b".into(), Bytes::from_static(b"frame")).unwrap();
        assert!(wait_for(|| !rec_b.frames.lock().is_empty()).await);

        let frames = rec_b.frames.lock();
        assert_eq!(frames[0].0, NodeId::from("a"));
        assert_eq!(&frames[0].1[..], b"frame");
    }

    #[tokio::test]
    async fn test_inbound_peer_is_dialed_back() {
        let a = TcpChannel::bind("a".into(), &config()).await.unwrap();
        let b = TcpChannel::bind("b".into(), &config()).await.unwrap();

        let rec_a = Arc::new(Recorder::default());
        a.set_listener(Arc::downgrade(&rec_a) as Weak<dyn ChannelListener>);

        // only a knows about b
        a.add_peer("b".into(), b.local_addr().to_string());
        assert!(wait_for(|| b.is_member(&"a".into())).await);
        assert_eq!(b.members(), vec![NodeId::from("a"), NodeId::from("b")]);

        b.send(&"a".into(), Bytes::from_static(b"back")).unwrap();
        assert!(wait_for(|| !rec_a.frames.lock().is_empty()).await);

        let frames = rec_a.frames.lock();
        assert_eq!(frames[0].0, NodeId::from("b"));
        assert_eq!(&frames[0].1[..], b"back");
    }

    #[test]
    fn test_dial_back_addr_fills_unspecified_ip() {
        let hello = Hello {
            node: "a".into(),
            group: "g".to_string(),
            listen: "0.0.0.0:7600".parse().unwrap(),
        };
        let remote: SocketAddr = "10.0.0.5:51234".parse().unwrap();
        assert_eq!(hello.dial_back_addr(remote), "10.0.0.5:7600".parse::<SocketAddr>().unwrap());

        let pinned = Hello {
            listen: "10.0.0.9:7601".parse().unwrap(),
            ..hello
        };
        assert_eq!(pinned.dial_back_addr(remote), "10.0.0.9:7601".parse::<SocketAddr>().unwrap());
    }

    #[tokio::test]
    async fn test_accept_backoff_follows_reconnect_interval() {
        let a = TcpChannel::bind("a".into(), &config()).await.unwrap();
        let weak = Arc::downgrade(&a.inner);
        assert_eq!(accept_backoff(&weak), Some(Duration::from_millis(50)));

        drop(a);
        assert_eq!(accept_backoff(&weak), None);
    }

    #[tokio::test]
    async fn test_unconnected_peer_is_unreachable() {
        let a = TcpChannel::bind("a".into(), &config()).await.unwrap();
        assert!(matches!(
            a.send(&"nobody".into(), Bytes::new()),
            Err(ChannelError::Unreachable(_))
        ));
        assert_eq!(a.members(), vec![NodeId::from("a")]);
    }

    #[tokio::test]
    async fn test_frame_codec() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, b"abc").await.unwrap();
        write_frame(&mut client, &[]).await.unwrap();

        assert_eq!(&read_frame(&mut server).await.unwrap()[..], b"abc");
        assert!(read_frame(&mut server).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let len = (MAX_FRAME_SIZE as u32 + 1).to_be_bytes();
        let mut stream = tokio_test::io::Builder::new().read(&len).build();
        assert!(matches!(
            read_frame(&mut stream).await,
            Err(ChannelError::FrameTooLarge(_))
        ));
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let mut stream = tokio_test::io::Builder::new()
            .read(&[0, 0, 0, 8])
            .read(b"abc")
            .build();
        assert!(matches!(read_frame(&mut stream).await, Err(ChannelError::Io(_))));
    }
}
