// manager.rs - Agent Manager

//! Starts and stops agents on this node.
//!
//! The manager is the only writer of the registry. Starting an agent
//! reserves its identity first, so two concurrent starts of the same name
//! on this node cannot both succeed; the claim is then replicated to the
//! cluster.

use actix::Addr;
use std::sync::{Arc, Weak};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::actor::{
    AgentActor, AgentCatalog, AgentCell, AgentContext, AgentStatus, InitArgs, Shutdown,
    ShutdownReason, WorkerPool,
};
use crate::aid::{Aid, NodeId};
use crate::cluster::ClusterBridge;
use crate::error::AgentError;
use crate::observability::{record_agent_started, record_agent_stopped};
use crate::registry::{AgentHandle, AgentLocation, Registry, RegistryUpdate};
use crate::router::Router;

/// Agent lifecycle on one node
pub struct AgentManager {
    node_id: NodeId,
    registry: Arc<Registry>,
    bridge: Arc<ClusterBridge>,
    catalog: Arc<AgentCatalog>,
    router: Weak<Router>,
    pool: WorkerPool,
}

impl AgentManager {
    pub fn new(
        registry: Arc<Registry>,
        bridge: Arc<ClusterBridge>,
        catalog: Arc<AgentCatalog>,
        router: Weak<Router>,
        pool: WorkerPool,
    ) -> Self {
        Self {
            node_id: registry.node_id().clone(),
            registry,
            bridge,
            catalog,
            router,
            pool,
        }
    }

    pub fn catalog(&self) -> &AgentCatalog {
        &self.catalog
    }

    /// Start an agent of a catalog class under `name`.
    ///
    /// Fails with `NameConflict` when (name, module) is already registered
    /// anywhere this node knows of; the existing agent is left untouched.
    pub fn start_agent(
        &self,
        module: &str,
        class_name: &str,
        name: &str,
        args: InitArgs,
    ) -> Result<Aid, AgentError> {
        let aid = Aid::new(name, module)
            .with_class(class_name)
            .on_node(self.node_id.clone());

        let entry = self.registry.reserve(&aid)?;

        let behaviour = match self.catalog.create(module, class_name, &args) {
            Ok(behaviour) => behaviour,
            Err(e) => {
                self.registry.release(&aid);
                return Err(e);
            }
        };

        let cell = Arc::new(AgentCell::new());
        let context = AgentContext::new(aid.clone(), self.node_id.clone(), self.router.clone());
        let (attached, attach_signal) = oneshot::channel();
        let actor = AgentActor::new(context, behaviour, cell.clone()).wait_for_attach(attach_signal);
        let addr: Addr<AgentActor> = self.pool.spawn(actor);
        cell.activate();

        self.registry.attach(AgentHandle {
            aid: aid.clone(),
            addr,
            cell,
        });
        let _ = attached.send(());

        if let Err(e) = self.bridge.publish(RegistryUpdate::Register(entry)) {
            // peers pick the entry up from the next snapshot
            warn!(agent = %aid, error = %e, "Registration not replicated");
        }

        record_agent_started(class_name);
        info!(agent = %aid, class = class_name, "Agent started");
        Ok(aid)
    }

    /// Stop an agent, wherever it runs.
    ///
    /// Local agents go to `Stopped` at once; mail already queued is dropped.
    /// Agents owned by another node are stopped by a request to that node.
    pub fn stop_agent(&self, aid: &Aid) -> Result<(), AgentError> {
        match self.stop_local(aid) {
            Err(AgentError::NotFound(_)) => {}
            done => return done,
        }

        match self.registry.lookup(aid) {
            Some(location) if !location.is_local => {
                debug!(agent = %aid, owner = %location.node, "Forwarding stop to owner");
                self.bridge.request_stop(&location.node, aid)
            }
            _ => Err(AgentError::NotFound(aid.clone())),
        }
    }

    /// Stop an agent running on this node; never forwards
    pub fn stop_local(&self, aid: &Aid) -> Result<(), AgentError> {
        let handle = self
            .registry
            .take_local(aid)
            .ok_or_else(|| AgentError::NotFound(aid.clone()))?;

        self.halt(&handle, ShutdownReason::Requested);
        self.registry.release(aid);

        if let Err(e) = self.bridge.publish(RegistryUpdate::Deregister {
            aid: handle.aid.logical(),
            node: self.node_id.clone(),
        }) {
            warn!(agent = %aid, error = %e, "Deregistration not replicated");
        }
        Ok(())
    }

    /// Stop a local agent whose identity was won by another node. The
    /// registry already points at the winner.
    pub fn evict(&self, aid: &Aid) -> bool {
        match self.registry.take_local(aid) {
            Some(handle) => {
                warn!(agent = %aid, "Evicting agent after losing duplicate claim");
                self.halt(&handle, ShutdownReason::Conflict);
                // withdraw the losing claim peers keep aside
                if let Err(e) = self.bridge.publish(RegistryUpdate::Deregister {
                    aid: handle.aid.logical(),
                    node: self.node_id.clone(),
                }) {
                    debug!(agent = %aid, error = %e, "Withdrawal not replicated");
                }
                true
            }
            None => false,
        }
    }

    fn halt(&self, handle: &AgentHandle, reason: ShutdownReason) {
        handle.cell.stop();
        handle.addr.do_send(Shutdown {
            reason: reason.clone(),
        });
        record_agent_stopped(handle.aid.class_name(), reason.as_str());
        info!(agent = %handle.aid, reason = reason.as_str(), "Agent stopped");
    }

    pub fn lookup(&self, aid: &Aid) -> Result<AgentLocation, AgentError> {
        self.registry
            .lookup(aid)
            .ok_or_else(|| AgentError::NotFound(aid.clone()))
    }

    /// Agents running on this node, sorted by address
    pub fn running_agents(&self) -> Vec<Aid> {
        let mut agents: Vec<Aid> = self
            .registry
            .local_handles()
            .into_iter()
            .map(|h| h.aid)
            .collect();
        agents.sort_by_key(|a| a.to_string());
        agents
    }

    /// State and counters of a local agent
    pub fn status(&self, aid: &Aid) -> Result<AgentStatus, AgentError> {
        let handle = self
            .registry
            .local_handle(aid)
            .ok_or_else(|| AgentError::NotFound(aid.clone()))?;

        Ok(AgentStatus {
            aid: handle.aid.clone(),
            state: handle.cell.state(),
            messages_processed: handle.cell.messages_processed(),
            handler_failures: handle.cell.handler_failures(),
            messages_dropped: handle.cell.messages_dropped(),
            uptime_secs: handle.cell.uptime_secs(),
        })
    }

    /// Stop every local agent and withdraw their registrations
    pub fn shutdown_all(&self) -> usize {
        let handles = self.registry.local_handles();
        let mut stopped = 0;

        for handle in handles {
            if self.registry.take_local(&handle.aid).is_none() {
                continue;
            }
            self.halt(&handle, ShutdownReason::NodeShutdown);
            self.registry.release(&handle.aid);
            let _ = self.bridge.publish(RegistryUpdate::Deregister {
                aid: handle.aid.logical(),
                node: self.node_id.clone(),
            });
            stopped += 1;
        }

        if stopped > 0 {
            info!(node = %self.node_id, stopped, "All local agents stopped");
        }
        stopped
    }

    /// Stop the worker arbiters
    pub fn shutdown_workers(&self) {
        self.pool.shutdown();
    }
}
