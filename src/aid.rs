// aid.rs - Agent and Node Identifiers

//! Agent addressing.
//!
//! An [`Aid`] names an agent cluster-wide. Its logical identity is the pair
//! `(name, module)`: the class name and the owning node travel with the
//! identifier as metadata but never take part in equality or hashing, so an
//! address built without a node resolves to the same registry entry as the
//! one handed out by the node that started the agent.

use derive_more::{Display, From, Into};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Identifier of a node taking part in a cluster
///
/// Ordering is lexicographic and is what decides the winner when two nodes
/// claim the same agent identity.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, From, Into,
)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Agent identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aid {
    name: String,
    module: String,
    class_name: String,
    node: Option<NodeId>,
}

impl Aid {
    /// Create an address with no owning node ("resolve anywhere")
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            class_name: String::new(),
            node: None,
        }
    }

    /// Attach the implementation class name
    pub fn with_class(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    /// Pin the address to a node
    pub fn on_node(mut self, node: impl Into<NodeId>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn node(&self) -> Option<&NodeId> {
        self.node.as_ref()
    }

    /// Logical equivalence: same name and module, whatever the node
    pub fn is_equivalent(&self, other: &Aid) -> bool {
        self.name == other.name && self.module == other.module
    }

    /// Copy of this address with routing metadata removed
    pub fn logical(&self) -> Aid {
        Aid {
            name: self.name.clone(),
            module: self.module.clone(),
            class_name: self.class_name.clone(),
            node: None,
        }
    }
}

impl PartialEq for Aid {
    fn eq(&self, other: &Self) -> bool {
        self.is_equivalent(other)
    }
}

impl Eq for Aid {}

impl Hash for Aid {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.module.hash(state);
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.module)?;
        if let Some(node) = &self.node {
            write!(f, "/{}", node)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_node_is_not_identity() {
        let a = Aid::new("pinger", "demo").on_node("node-1");
        let b = Aid::new("pinger", "demo").on_node("node-2");
        let c = Aid::new("pinger", "demo");

        assert_eq!(a, b);
        assert_eq!(a, c);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&c));
    }

    #[test]
    fn test_class_is_metadata() {
        let a = Aid::new("worker", "demo").with_class("Echo");
        let b = Aid::new("worker", "demo").with_class("Log");
        assert_eq!(a, b);
        assert_ne!(a, Aid::new("worker", "other"));
    }

    #[test]
    fn test_display() {
        let aid = Aid::new("ams", "core");
        assert_eq!(aid.to_string(), "ams@core");
        assert_eq!(aid.on_node("n1").to_string(), "ams@core/n1");
    }

    #[test]
    fn test_node_ordering() {
        assert!(NodeId::from("node-1") < NodeId::from("node-2"));
        assert_eq!(NodeId::new("a").as_str(), "a");
    }

    proptest! {
        #[test]
        fn equivalence_ignores_node(
            name_a in "[a-z]{1,6}",
            name_b in "[a-z]{1,6}",
            module_a in "[a-z]{1,4}",
            module_b in "[a-z]{1,4}",
            node_a in proptest::option::of("[a-z0-9]{1,4}"),
            node_b in proptest::option::of("[a-z0-9]{1,4}"),
        ) {
            let mut a = Aid::new(name_a.clone(), module_a.clone());
            if let Some(n) = node_a {
                a = a.on_node(n.as_str());
            }
            let mut b = Aid::new(name_b.clone(), module_b.clone());
            if let Some(n) = node_b {
                b = b.on_node(n.as_str());
            }

            let expected = name_a == name_b && module_a == module_b;
            prop_assert_eq!(a.is_equivalent(&b), expected);
            prop_assert_eq!(a == b, expected);
        }
    }
}
