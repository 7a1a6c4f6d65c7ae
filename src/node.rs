// node.rs - Agent Node

//! The front door of the runtime.
//!
//! A [`Node`] wires the registry, router, manager and cluster bridge
//! together and reacts to frames and membership changes from the group
//! channels. Build one with [`NodeBuilder`] inside a running actix system.
//!
//! # Example
//!
//! ```ignore
//! use fipa_cluster_agents::prelude::*;
//!
//! let hub = LocalHub::new("demo");
//! let node = NodeBuilder::new(hub.join("node-1")).build();
//!
//! let echo = node.start_agent(BUILTIN_MODULE, "Echo", "echo", InitArgs::new())?;
//! node.post_text(Aid::new("client", "demo"), echo, Performative::Request, "hello")?;
//! ```

use bytes::Bytes;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::acl_message::{AclMessage, MessageContent, Performative};
use crate::actor::{AgentCatalog, AgentStatus, InitArgs, WorkerPool};
use crate::aid::{Aid, NodeId};
use crate::cluster::{BridgeStats, ChannelListener, ClusterBridge, GroupChannel, WireFrame};
use crate::error::AgentError;
use crate::manager::AgentManager;
use crate::observability::record_cluster_members;
use crate::registry::{AgentLocation, MemoryStore, Registry, RegistryEntry, RegistryStore};
use crate::router::{DeliveryReport, Router};

/// Assembles a [`Node`]
pub struct NodeBuilder {
    cluster: Arc<dyn GroupChannel>,
    relay: Option<Arc<dyn GroupChannel>>,
    store: Option<Arc<dyn RegistryStore>>,
    catalog: Option<Arc<AgentCatalog>>,
    workers: usize,
}

impl NodeBuilder {
    /// The node takes its id from the cluster channel
    pub fn new(cluster: Arc<dyn GroupChannel>) -> Self {
        Self {
            cluster,
            relay: None,
            store: None,
            catalog: None,
            workers: 0,
        }
    }

    /// Group linking this node to peer clusters
    pub fn with_relay(mut self, relay: Arc<dyn GroupChannel>) -> Self {
        self.relay = Some(relay);
        self
    }

    /// Registry storage; defaults to [`MemoryStore`]
    pub fn with_store(mut self, store: Arc<dyn RegistryStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Agent classes this node can start; defaults to the built-ins
    pub fn with_catalog(mut self, catalog: impl Into<Arc<AgentCatalog>>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Worker arbiters for agents; 0 (default) uses the caller's arbiter
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Wire the node and attach it to its channels. Must run inside an
    /// actix system.
    pub fn build(self) -> Node {
        let node_id = self.cluster.local_node().clone();
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(AgentCatalog::with_builtins()));

        let registry = Arc::new(Registry::new(node_id.clone(), store));
        let bridge = Arc::new(ClusterBridge::new(self.cluster, self.relay));
        let router = Arc::new(Router::new(registry.clone(), bridge.clone()));
        let manager = AgentManager::new(
            registry.clone(),
            bridge.clone(),
            catalog,
            Arc::downgrade(&router),
            WorkerPool::new(self.workers),
        );

        let inner = Arc::new(NodeInner {
            node_id: node_id.clone(),
            registry,
            bridge: bridge.clone(),
            router,
            manager,
            pending_pings: DashMap::new(),
            next_nonce: AtomicU64::new(1),
        });

        let relay_listener = bridge.has_relay().then(|| {
            Arc::new(RelayListener {
                inner: Arc::downgrade(&inner),
            })
        });

        bridge.attach(
            Arc::downgrade(&inner) as Weak<dyn ChannelListener>,
            relay_listener
                .as_ref()
                .map(|l| Arc::downgrade(l) as Weak<dyn ChannelListener>),
        );

        info!(
            node = %node_id,
            cluster = bridge.cluster_name(),
            members = bridge.members().len(),
            "Node ready"
        );

        Node {
            inner,
            _relay_listener: relay_listener,
        }
    }
}

struct NodeInner {
    node_id: NodeId,
    registry: Arc<Registry>,
    bridge: Arc<ClusterBridge>,
    router: Arc<Router>,
    manager: AgentManager,
    pending_pings: DashMap<u64, oneshot::Sender<()>>,
    next_nonce: AtomicU64,
}

impl NodeInner {
    fn report_failures(&self, context: &str, report: &DeliveryReport) {
        for (aid, outcome) in report.failures() {
            warn!(receiver = %aid, outcome = outcome.as_str(), "{} delivery failed", context);
        }
    }

    fn handle_frame(&self, from: &NodeId, frame: WireFrame) {
        match frame {
            WireFrame::Deliver { message, receivers } => {
                let report = self.router.deliver_local(&message, &receivers);
                self.report_failures("Forwarded", &report);
            }
            WireFrame::Relay {
                origin_cluster,
                message,
                receivers,
            } => self.handle_relay(&origin_cluster, message, receivers),
            WireFrame::Registry(update) => {
                let outcome = self.registry.apply(update);
                for aid in &outcome.evicted {
                    self.manager.evict(aid);
                }
            }
            WireFrame::Stop { aid } => {
                if let Err(e) = self.manager.stop_local(&aid) {
                    debug!(agent = %aid, from = %from, error = %e, "Remote stop ignored");
                }
            }
            WireFrame::SyncRequest => {
                if let Err(e) = self.bridge.send_update_to(from, self.registry.snapshot()) {
                    warn!(peer = %from, error = %e, "Registry snapshot not sent");
                }
            }
            WireFrame::Ping { nonce } => {
                if let Err(e) = self.bridge.pong(from, nonce) {
                    debug!(peer = %from, error = %e, "Pong not sent");
                }
            }
            WireFrame::Pong { nonce } => {
                if let Some((_, waiter)) = self.pending_pings.remove(&nonce) {
                    let _ = waiter.send(());
                }
            }
        }
    }

    fn handle_relay(&self, origin_cluster: &str, message: AclMessage, receivers: Vec<Aid>) {
        debug!(
            origin = origin_cluster,
            message_id = message.message_id(),
            "Relayed message from remote cluster"
        );
        match self.router.deliver_relayed(&message, &receivers) {
            Ok(report) => self.report_failures("Relayed", &report),
            Err(e) => warn!(origin = origin_cluster, error = %e, "Relayed message dropped"),
        }
    }
}

impl ChannelListener for NodeInner {
    fn on_frame(&self, from: &NodeId, frame: Bytes) {
        if let Ok(frame) = self.bridge.decode(from, &frame) {
            self.handle_frame(from, frame);
        }
    }

    fn on_member_joined(&self, node: &NodeId) {
        info!(node = %self.node_id, peer = %node, "Cluster member joined");
        record_cluster_members(self.bridge.members().len());

        if let Err(e) = self.bridge.send_update_to(node, self.registry.snapshot()) {
            warn!(peer = %node, error = %e, "Registry snapshot not sent");
        }
        // pull too: a one-sided link drop may have purged its entries here
        if let Err(e) = self.bridge.request_sync(node) {
            warn!(peer = %node, error = %e, "Registry sync not requested");
        }
    }

    fn on_member_left(&self, node: &NodeId) {
        info!(node = %self.node_id, peer = %node, "Cluster member left");
        record_cluster_members(self.bridge.members().len());
        self.registry.purge_node(node);
    }
}

/// Receives frames from the relay group
struct RelayListener {
    inner: Weak<NodeInner>,
}

impl ChannelListener for RelayListener {
    fn on_frame(&self, from: &NodeId, frame: Bytes) {
        let Some(inner) = self.inner.upgrade() else { return };

        match inner.bridge.decode(from, &frame) {
            Ok(WireFrame::Relay {
                origin_cluster,
                message,
                receivers,
            }) => inner.handle_relay(&origin_cluster, message, receivers),
            Ok(other) => debug!(from = %from, kind = other.kind(), "Ignoring non-relay frame on relay"),
            Err(_) => {}
        }
    }

    fn on_member_joined(&self, node: &NodeId) {
        info!(peer = %node, "Relay peer joined");
    }

    fn on_member_left(&self, node: &NodeId) {
        info!(peer = %node, "Relay peer left");
    }
}

/// A running node
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
    _relay_listener: Option<Arc<RelayListener>>,
}

impl Node {
    pub fn node_id(&self) -> &NodeId {
        &self.inner.node_id
    }

    /// Classes this node can start; more can be registered at any time
    pub fn catalog(&self) -> &AgentCatalog {
        self.inner.manager.catalog()
    }

    pub fn start_agent(
        &self,
        module: &str,
        class_name: &str,
        name: &str,
        args: InitArgs,
    ) -> Result<Aid, AgentError> {
        self.inner.manager.start_agent(module, class_name, name, args)
    }

    pub fn stop_agent(&self, aid: &Aid) -> Result<(), AgentError> {
        self.inner.manager.stop_agent(aid)
    }

    pub fn lookup(&self, aid: &Aid) -> Result<AgentLocation, AgentError> {
        self.inner.manager.lookup(aid)
    }

    pub fn post(&self, msg: AclMessage) -> Result<DeliveryReport, AgentError> {
        self.inner.router.deliver(msg)
    }

    pub fn post_text(
        &self,
        sender: Aid,
        receiver: Aid,
        performative: Performative,
        content: impl Into<MessageContent>,
    ) -> Result<DeliveryReport, AgentError> {
        self.inner.router.post_text(sender, receiver, performative, content)
    }

    /// Local liveness check
    pub fn ping(&self) -> String {
        format!("Pong from {}", self.inner.node_id)
    }

    /// Round trip to a cluster peer
    pub async fn ping_peer(&self, node: &NodeId, timeout: Duration) -> Result<Duration, AgentError> {
        let nonce = self.inner.next_nonce.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending_pings.insert(nonce, tx);

        let started = Instant::now();
        if let Err(e) = self.inner.bridge.ping(node, nonce) {
            self.inner.pending_pings.remove(&nonce);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(())) => Ok(started.elapsed()),
            _ => {
                self.inner.pending_pings.remove(&nonce);
                Err(AgentError::Timeout)
            }
        }
    }

    pub fn running_agents(&self) -> Vec<Aid> {
        self.inner.manager.running_agents()
    }

    /// Cluster-wide registry view
    pub fn registry_entries(&self) -> Vec<RegistryEntry> {
        let mut entries = self.inner.registry.entries();
        entries.sort_by_key(|e| e.aid.to_string());
        entries
    }

    pub fn members(&self) -> Vec<NodeId> {
        self.inner.bridge.members()
    }

    pub fn status(&self, aid: &Aid) -> Result<AgentStatus, AgentError> {
        self.inner.manager.status(aid)
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.inner.bridge.stats()
    }

    /// Stop every local agent and the worker arbiters
    pub fn shutdown(&self) {
        let stopped = self.inner.manager.shutdown_all();
        self.inner.manager.shutdown_workers();
        info!(node = %self.inner.node_id, stopped, "Node shut down");
    }
}
