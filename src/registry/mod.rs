// registry/mod.rs - Distributed Agent Registry

//! Cluster-wide agent registry.
//!
//! Every node holds a full copy of the `Aid -> node` mapping in a
//! [`RegistryStore`], so resolving an address never needs a network round
//! trip. Actor handles are kept in a separate node-local table and never
//! leave the node that owns them.
//!
//! Replication is eventual: the owning node publishes a [`RegistryUpdate`]
//! after each local change, and members exchange snapshots of the entries
//! they own when they (re)join. Two nodes can therefore both claim the same
//! identity while partitioned. When the claims meet, the entry owned by the
//! lowest node id wins everywhere and the losing node is told to evict its
//! actor. Losing claims from other nodes are kept aside, and the lowest one
//! takes over when the winner is withdrawn, so an update that arrives out of
//! order cannot hide a live agent.

mod store;

pub use store::{MemoryStore, RegistryEntry, RegistryStore};

use actix::Addr;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::actor::{AgentActor, AgentCell};
use crate::aid::{Aid, NodeId};
use crate::error::AgentError;
use crate::observability::record_registry_conflict;

/// Node-local handle to a running agent
#[derive(Clone)]
pub struct AgentHandle {
    pub aid: Aid,
    pub addr: Addr<AgentActor>,
    pub cell: Arc<AgentCell>,
}

/// Where an agent lives, as seen from this node
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentLocation {
    pub aid: Aid,
    pub node: NodeId,
    pub is_local: bool,
    pub registered_at: i64,
}

/// Result of resolving an address
pub enum Resolution {
    /// Running on this node
    Local(AgentHandle),
    /// Owned by another node
    Remote(NodeId),
    /// No entry anywhere this node knows of
    Unknown,
}

/// Replicated registry change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RegistryUpdate {
    Register(RegistryEntry),
    Deregister { aid: Aid, node: NodeId },
    /// Full set of entries owned by `node`
    Snapshot { node: NodeId, entries: Vec<RegistryEntry> },
}

/// What applying a remote update means for this node
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Local agents whose claim lost to another node
    pub evicted: Vec<Aid>,
    /// Number of duplicate claims resolved
    pub conflicts: usize,
}

/// Distributed agent registry
pub struct Registry {
    /// This node's ID
    node_id: NodeId,

    /// Replicated location map
    store: Arc<dyn RegistryStore>,

    /// Handles of agents running here
    local: DashMap<Aid, AgentHandle>,

    /// Claims by other nodes that lost to the stored entry
    contenders: DashMap<Aid, Vec<RegistryEntry>>,
}

impl Registry {
    pub fn new(node_id: NodeId, store: Arc<dyn RegistryStore>) -> Self {
        info!("Registry started for node: {}", node_id);
        Self {
            node_id,
            store,
            local: DashMap::new(),
            contenders: DashMap::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    // =========================================================================
    // Write path (agent manager only)
    // =========================================================================

    /// Claim an identity for this node: atomic check-then-insert
    pub fn reserve(&self, aid: &Aid) -> Result<RegistryEntry, AgentError> {
        let entry = RegistryEntry::new(aid, self.node_id.clone());
        match self.store.insert_if_absent(entry.clone()) {
            Ok(()) => {
                debug!("Reserved {}", entry.aid);
                Ok(entry)
            }
            Err(existing) => {
                debug!("Name conflict for {}: owned by {}", aid, existing.node);
                Err(AgentError::NameConflict(existing.aid))
            }
        }
    }

    /// Attach the actor handle once the agent is running
    pub fn attach(&self, handle: AgentHandle) {
        self.local.insert(handle.aid.logical(), handle);
    }

    /// Detach a local handle; the first caller wins
    pub fn take_local(&self, aid: &Aid) -> Option<AgentHandle> {
        self.local.remove(aid).map(|(_, handle)| handle)
    }

    /// Drop this node's claim on an identity
    pub fn release(&self, aid: &Aid) -> Option<RegistryEntry> {
        let released = self.store.remove(aid, &self.node_id)?;
        self.promote(aid, &mut ApplyOutcome::default());
        Some(released)
    }

    // =========================================================================
    // Read path
    // =========================================================================

    pub fn lookup(&self, aid: &Aid) -> Option<AgentLocation> {
        self.store.get(aid).map(|entry| AgentLocation {
            is_local: entry.node == self.node_id,
            aid: entry.aid,
            node: entry.node,
            registered_at: entry.registered_at,
        })
    }

    pub fn resolve(&self, aid: &Aid) -> Resolution {
        if let Some(handle) = self.local.get(aid) {
            return Resolution::Local(handle.value().clone());
        }

        match self.store.get(aid) {
            Some(entry) if entry.node != self.node_id => Resolution::Remote(entry.node),
            // reserved here but not yet attached, or mid-stop
            _ => Resolution::Unknown,
        }
    }

    pub fn local_handle(&self, aid: &Aid) -> Option<AgentHandle> {
        self.local.get(aid).map(|h| h.value().clone())
    }

    pub fn local_handles(&self) -> Vec<AgentHandle> {
        self.local.iter().map(|h| h.value().clone()).collect()
    }

    /// Cluster-wide view
    pub fn entries(&self) -> Vec<RegistryEntry> {
        self.store.entries()
    }

    /// Entries this node owns
    pub fn owned_entries(&self) -> Vec<RegistryEntry> {
        self.store
            .entries()
            .into_iter()
            .filter(|e| e.node == self.node_id)
            .collect()
    }

    pub fn snapshot(&self) -> RegistryUpdate {
        RegistryUpdate::Snapshot {
            node: self.node_id.clone(),
            entries: self.owned_entries(),
        }
    }

    // =========================================================================
    // Replication
    // =========================================================================

    /// Apply an update received from another node
    pub fn apply(&self, update: RegistryUpdate) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();

        match update {
            RegistryUpdate::Register(entry) => self.apply_register(entry, &mut outcome),
            RegistryUpdate::Deregister { aid, node } => {
                if node == self.node_id {
                    return outcome;
                }

                self.drop_contender(&aid, &node);
                if self.store.remove(&aid, &node).is_some() {
                    debug!("Replicated deregistration of {} from {}", aid, node);
                    self.promote(&aid, &mut outcome);
                }
            }
            RegistryUpdate::Snapshot { node, entries } => {
                if node == self.node_id {
                    return outcome;
                }

                let claimed: HashSet<Aid> = entries.iter().map(|e| e.aid.logical()).collect();
                self.contenders.retain(|aid, claims| {
                    claims.retain(|c| c.node != node || claimed.contains(aid));
                    !claims.is_empty()
                });
                for stale in self
                    .store
                    .entries()
                    .into_iter()
                    .filter(|e| e.node == node && !claimed.contains(&e.aid))
                {
                    if self.store.remove(&stale.aid, &node).is_some() {
                        self.promote(&stale.aid, &mut outcome);
                    }
                }

                for entry in entries.into_iter().filter(|e| e.node == node) {
                    self.apply_register(entry, &mut outcome);
                }
            }
        }

        outcome
    }

    fn apply_register(&self, entry: RegistryEntry, outcome: &mut ApplyOutcome) {
        if entry.node == self.node_id {
            return;
        }
        self.drop_contender(&entry.aid, &entry.node);

        let existing = match self.store.insert_if_absent(entry.clone()) {
            Ok(()) => {
                debug!("Replicated registration of {} on {}", entry.aid, entry.node);
                return;
            }
            Err(existing) => existing,
        };

        if existing.node == entry.node {
            self.store.put(entry);
            return;
        }

        outcome.conflicts += 1;
        record_registry_conflict();

        if entry.node < existing.node {
            warn!(
                agent = %entry.aid,
                winner = %entry.node,
                loser = %existing.node,
                "Duplicate agent claim resolved"
            );
            self.store.put(entry.clone());
            if existing.node == self.node_id {
                outcome.evicted.push(existing.aid);
            } else {
                self.add_contender(existing);
            }
        } else {
            warn!(
                agent = %existing.aid,
                winner = %existing.node,
                loser = %entry.node,
                "Duplicate agent claim resolved"
            );
            self.add_contender(entry);
        }
    }

    fn add_contender(&self, entry: RegistryEntry) {
        let mut claims = self.contenders.entry(entry.aid.logical()).or_default();
        claims.retain(|c| c.node != entry.node);
        claims.push(entry);
    }

    fn drop_contender(&self, aid: &Aid, node: &NodeId) {
        if let Some(mut claims) = self.contenders.get_mut(aid) {
            claims.retain(|c| &c.node != node);
        }
        self.contenders.remove_if(aid, |_, claims| claims.is_empty());
    }

    /// Put the lowest losing claim in place of a withdrawn winner
    fn promote(&self, aid: &Aid, outcome: &mut ApplyOutcome) {
        let next = self.contenders.remove(aid).and_then(|(_, mut claims)| {
            claims.sort_by(|a, b| a.node.cmp(&b.node));
            let next = (!claims.is_empty()).then(|| claims.remove(0));
            if !claims.is_empty() {
                self.contenders.insert(aid.logical(), claims);
            }
            next
        });

        if let Some(entry) = next {
            info!(agent = %entry.aid, node = %entry.node, "Promoting standing claim");
            self.apply_register(entry, outcome);
        }
    }

    /// Number of losing claims held aside
    pub fn contender_count(&self) -> usize {
        self.contenders.iter().map(|c| c.value().len()).sum()
    }

    /// Forget every entry owned by a departed node
    pub fn purge_node(&self, node: &NodeId) -> usize {
        if node == &self.node_id {
            return 0;
        }

        let stale: Vec<RegistryEntry> = self
            .store
            .entries()
            .into_iter()
            .filter(|e| &e.node == node)
            .collect();

        self.contenders.retain(|_, claims| {
            claims.retain(|c| &c.node != node);
            !claims.is_empty()
        });

        let mut outcome = ApplyOutcome::default();
        let mut removed = 0;
        for entry in &stale {
            if self.store.remove(&entry.aid, node).is_some() {
                removed += 1;
                self.promote(&entry.aid, &mut outcome);
            }
        }

        if removed > 0 {
            info!(node = %node, removed, "Purged registry entries of departed node");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry(node: &str) -> Registry {
        Registry::new(node.into(), Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_reserve_conflict() {
        let registry = registry("n1");
        let aid = Aid::new("buyer", "market");

        let entry = registry.reserve(&aid).unwrap();
        assert_eq!(entry.aid.node(), Some(&NodeId::from("n1")));

        assert!(matches!(registry.reserve(&aid), Err(AgentError::NameConflict(_))));

        let location = registry.lookup(&aid).unwrap();
        assert!(location.is_local);
        assert_eq!(location.node, NodeId::from("n1"));
    }

    #[test]
    fn test_remote_entries_resolve_remote() {
        let registry = registry("n1");
        let aid = Aid::new("buyer", "market");

        let outcome = registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n2".into())));
        assert_eq!(outcome, ApplyOutcome::default());

        assert!(matches!(registry.resolve(&aid), Resolution::Remote(n) if n == NodeId::from("n2")));
        assert!(matches!(registry.reserve(&aid), Err(AgentError::NameConflict(_))));

        registry.apply(RegistryUpdate::Deregister {
            aid: aid.clone(),
            node: "n2".into(),
        });
        assert!(registry.lookup(&aid).is_none());
    }

    #[test]
    fn test_lowest_node_wins() {
        let registry = registry("n2");
        let aid = Aid::new("contested", "market");
        registry.reserve(&aid).unwrap();

        // a higher id loses against our claim
        let outcome = registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n3".into())));
        assert_eq!(outcome.conflicts, 1);
        assert!(outcome.evicted.is_empty());
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n2"));

        // a lower id beats it and evicts the local agent
        let outcome = registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n1".into())));
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(outcome.evicted, vec![aid.clone()]);
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n1"));
    }

    #[test]
    fn test_snapshot_replaces_node_entries() {
        let registry = registry("n1");
        let kept = Aid::new("kept", "m");
        let gone = Aid::new("gone", "m");
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&kept, "n2".into())));
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&gone, "n2".into())));

        let added = Aid::new("added", "m");
        registry.apply(RegistryUpdate::Snapshot {
            node: "n2".into(),
            entries: vec![
                RegistryEntry::new(&kept, "n2".into()),
                RegistryEntry::new(&added, "n2".into()),
            ],
        });

        assert!(registry.lookup(&kept).is_some());
        assert!(registry.lookup(&added).is_some());
        assert!(registry.lookup(&gone).is_none());
    }

    #[test]
    fn test_reordered_withdrawal_keeps_live_claim() {
        let registry = registry("n1");
        let aid = Aid::new("x", "m");

        // n2 stops x and n3 starts it, but n3's claim arrives first
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n2".into())));
        let outcome = registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n3".into())));
        assert_eq!(outcome.conflicts, 1);
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n2"));
        assert_eq!(registry.contender_count(), 1);

        registry.apply(RegistryUpdate::Deregister {
            aid: aid.clone(),
            node: "n2".into(),
        });
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n3"));
        assert!(matches!(registry.resolve(&aid), Resolution::Remote(n) if n == NodeId::from("n3")));
        assert_eq!(registry.contender_count(), 0);
    }

    #[test]
    fn test_withdrawn_loser_is_not_promoted() {
        let registry = registry("n1");
        let aid = Aid::new("x", "m");
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n2".into())));
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, "n3".into())));

        // the loser evicted its agent and said so
        registry.apply(RegistryUpdate::Deregister {
            aid: aid.clone(),
            node: "n3".into(),
        });
        assert_eq!(registry.contender_count(), 0);

        registry.apply(RegistryUpdate::Deregister {
            aid: aid.clone(),
            node: "n2".into(),
        });
        assert!(registry.lookup(&aid).is_none());
    }

    #[test]
    fn test_purge_promotes_lowest_remaining_claim() {
        let registry = registry("n1");
        let aid = Aid::new("x", "m");
        for node in ["n2", "n4", "n3"] {
            registry.apply(RegistryUpdate::Register(RegistryEntry::new(&aid, node.into())));
        }
        assert_eq!(registry.contender_count(), 2);

        registry.purge_node(&"n2".into());
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n3"));

        registry.purge_node(&"n3".into());
        assert_eq!(registry.lookup(&aid).unwrap().node, NodeId::from("n4"));
        assert_eq!(registry.contender_count(), 0);
    }

    #[test]
    fn test_purge_node() {
        let registry = registry("n1");
        registry.reserve(&Aid::new("mine", "m")).unwrap();
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&Aid::new("a", "m"), "n2".into())));
        registry.apply(RegistryUpdate::Register(RegistryEntry::new(&Aid::new("b", "m"), "n2".into())));

        assert_eq!(registry.purge_node(&"n2".into()), 2);
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(registry.owned_entries().len(), 1);
        assert_eq!(registry.purge_node(&"n1".into()), 0);
    }
}
