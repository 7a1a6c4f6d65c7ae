// registry/store.rs - Registry Storage

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::aid::{Aid, NodeId};

/// Location record for one agent identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Agent address, pinned to its owning node
    pub aid: Aid,
    /// Node hosting the agent
    pub node: NodeId,
    /// Registration time, milliseconds since the Unix epoch
    pub registered_at: i64,
}

impl RegistryEntry {
    pub fn new(aid: &Aid, node: NodeId) -> Self {
        Self {
            aid: aid.logical().on_node(node.clone()),
            node,
            registered_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Key-value storage behind the registry.
///
/// Consistency contract: a write is visible to reads on the writing node as
/// soon as the call returns (read-your-writes). `insert_if_absent` must be
/// atomic on that node. Cross-node visibility may be eventual; the registry
/// layer replicates updates and resolves duplicate claims on its own.
pub trait RegistryStore: Send + Sync {
    /// Insert unless an entry for the same identity exists; returns the
    /// existing entry on conflict
    fn insert_if_absent(&self, entry: RegistryEntry) -> Result<(), RegistryEntry>;

    /// Unconditional write, returns the previous entry
    fn put(&self, entry: RegistryEntry) -> Option<RegistryEntry>;

    fn get(&self, aid: &Aid) -> Option<RegistryEntry>;

    /// Remove the entry only if it is owned by `node`
    fn remove(&self, aid: &Aid, node: &NodeId) -> Option<RegistryEntry>;

    fn entries(&self) -> Vec<RegistryEntry>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store on a sharded concurrent map.
///
/// Without replication this is a complete single-node registry.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<Aid, RegistryEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RegistryStore for MemoryStore {
    fn insert_if_absent(&self, entry: RegistryEntry) -> Result<(), RegistryEntry> {
        match self.entries.entry(entry.aid.logical()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    fn put(&self, entry: RegistryEntry) -> Option<RegistryEntry> {
        self.entries.insert(entry.aid.logical(), entry)
    }

    fn get(&self, aid: &Aid) -> Option<RegistryEntry> {
        self.entries.get(aid).map(|e| e.value().clone())
    }

    fn remove(&self, aid: &Aid, node: &NodeId) -> Option<RegistryEntry> {
        self.entries
            .remove_if(aid, |_, entry| &entry.node == node)
            .map(|(_, entry)| entry)
    }

    fn entries(&self) -> Vec<RegistryEntry> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
