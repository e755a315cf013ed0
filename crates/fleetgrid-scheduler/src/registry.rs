//! Node registry: the engine's read-only view of the fleet.
//!
//! The registry and its health detection are owned elsewhere; the engine
//! only asks for the current snapshot. [`StaticNodeRegistry`] is the
//! in-memory implementation used by the daemon's standalone mode and by
//! tests.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use fleetgrid_core::{NodeId, NodeRef};

/// Source of known nodes. Implementations hand out copies; the engine
/// never mutates what it receives.
pub trait NodeRegistry: Send + Sync {
    /// Every node the registry knows about, healthy or not.
    fn list_known_nodes(&self) -> Vec<NodeRef>;

    fn lookup(&self, id: &str) -> Option<NodeRef>;
}

/// In-memory registry seeded from configuration.
#[derive(Debug, Default)]
pub struct StaticNodeRegistry {
    nodes: RwLock<BTreeMap<NodeId, NodeRef>>,
}

impl StaticNodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes(nodes: impl IntoIterator<Item = NodeRef>) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.id.clone(), n)).collect();
        Self {
            nodes: RwLock::new(nodes),
        }
    }

    /// Add a node, replacing any node with the same id.
    pub fn upsert(&self, node: NodeRef) {
        debug!(node = %node.id, region = node.region(), healthy = node.healthy, "node registered");
        self.write().insert(node.id.clone(), node);
    }

    pub fn remove(&self, id: &str) -> Option<NodeRef> {
        let removed = self.write().remove(id);
        if removed.is_some() {
            info!(node = %id, "node deregistered");
        }
        removed
    }

    /// Returns `false` if the node is unknown.
    pub fn set_healthy(&self, id: &str, healthy: bool) -> bool {
        match self.write().get_mut(id) {
            Some(node) => {
                if node.healthy != healthy {
                    info!(node = %id, healthy, "node health changed");
                }
                node.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// Returns `false` if the node is unknown.
    pub fn set_label(&self, id: &str, key: impl Into<String>, value: impl Into<String>) -> bool {
        match self.write().get_mut(id) {
            Some(node) => {
                node.labels.insert(key.into(), value.into());
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<NodeId, NodeRef>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<NodeId, NodeRef>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeRegistry for StaticNodeRegistry {
    fn list_known_nodes(&self) -> Vec<NodeRef> {
        self.read().values().cloned().collect()
    }

    fn lookup(&self, id: &str) -> Option<NodeRef> {
        self.read().get(id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_nodes_in_id_order() {
        let registry = StaticNodeRegistry::from_nodes([
            NodeRef::new("n2"),
            NodeRef::new("n1").unhealthy(),
        ]);
        let ids: Vec<String> = registry.list_known_nodes().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, ["n1", "n2"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn lookup_and_remove() {
        let registry = StaticNodeRegistry::new();
        assert!(registry.is_empty());
        registry.upsert(NodeRef::new("n1").in_region("eu"));

        assert_eq!(registry.lookup("n1").map(|n| n.region().to_string()), Some("eu".to_string()));
        assert!(registry.remove("n1").is_some());
        assert!(registry.lookup("n1").is_none());
        assert!(registry.remove("n1").is_none());
    }

    #[test]
    fn health_and_labels_update_in_place() {
        let registry = StaticNodeRegistry::from_nodes([NodeRef::new("n1")]);

        assert!(registry.set_healthy("n1", false));
        assert!(!registry.set_healthy("ghost", false));
        assert!(registry.set_label("n1", "gpu", "true"));

        let node = registry.lookup("n1").unwrap();
        assert!(!node.healthy);
        assert_eq!(node.labels.get("gpu").map(String::as_str), Some("true"));
    }

    #[test]
    fn snapshots_are_copies() {
        let registry = StaticNodeRegistry::from_nodes([NodeRef::new("n1")]);
        let mut snapshot = registry.list_known_nodes();
        snapshot[0].healthy = false;
        assert!(registry.lookup("n1").unwrap().healthy);
    }
}
