//! Cluster membership view consumed by the engine.
//!
//! Discovery itself is an external collaborator; the engine only reads
//! versioned snapshots from the registry. Versions increase monotonically
//! on every membership change and old versions stay addressable for
//! historical lookups.

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

pub type NodeId = u64;

/// Immutable view of cluster membership at a given version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    pub version: u64,
    pub nodes: Vec<NodeId>,
}

impl TopologySnapshot {
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains(&node_id)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Registry of cluster nodes with monotonically versioned history.
#[derive(Debug, Default)]
pub struct TopologyRegistry {
    inner: Mutex<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    version: u64,
    nodes: Vec<NodeId>,
    history: BTreeMap<u64, Vec<NodeId>>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node to the topology, bumping the version. Re-registering an
    /// existing node is a no-op.
    pub fn register(&self, node_id: NodeId) {
        let mut inner = self.inner.lock().expect("topology lock poisoned");
        if inner.nodes.contains(&node_id) {
            return;
        }
        inner.nodes.push(node_id);
        inner.version += 1;
        let version = inner.version;
        let nodes = inner.nodes.clone();
        inner.history.insert(version, nodes);
        tracing::info!(node_id, version, "Node joined topology");
    }

    /// Remove a node from the topology, bumping the version.
    pub fn remove(&self, node_id: NodeId) {
        let mut inner = self.inner.lock().expect("topology lock poisoned");
        let before = inner.nodes.len();
        inner.nodes.retain(|&n| n != node_id);
        if inner.nodes.len() == before {
            return;
        }
        inner.version += 1;
        let version = inner.version;
        let nodes = inner.nodes.clone();
        inner.history.insert(version, nodes);
        tracing::info!(node_id, version, "Node left topology");
    }

    /// Current membership snapshot.
    pub fn snapshot(&self) -> TopologySnapshot {
        let inner = self.inner.lock().expect("topology lock poisoned");
        TopologySnapshot {
            version: inner.version,
            nodes: inner.nodes.clone(),
        }
    }

    /// Current topology version.
    pub fn version(&self) -> u64 {
        self.inner.lock().expect("topology lock poisoned").version
    }

    /// Membership as of a historical version, if still known.
    pub fn nodes_at(&self, version: u64) -> Option<Vec<NodeId>> {
        let inner = self.inner.lock().expect("topology lock poisoned");
        inner.history.get(&version).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_bumps_version() {
        let reg = TopologyRegistry::new();
        assert_eq!(reg.version(), 0);
        reg.register(1);
        reg.register(2);
        assert_eq!(reg.version(), 2);
        assert_eq!(reg.snapshot().nodes, vec![1, 2]);
    }

    #[test]
    fn reregister_is_noop() {
        let reg = TopologyRegistry::new();
        reg.register(1);
        reg.register(1);
        assert_eq!(reg.version(), 1);
        assert_eq!(reg.snapshot().nodes, vec![1]);
    }

    #[test]
    fn remove_bumps_version_and_keeps_history() {
        let reg = TopologyRegistry::new();
        reg.register(1);
        reg.register(2);
        reg.remove(1);
        assert_eq!(reg.version(), 3);
        assert_eq!(reg.snapshot().nodes, vec![2]);
        assert_eq!(reg.nodes_at(2), Some(vec![1, 2]));
        assert_eq!(reg.nodes_at(3), Some(vec![2]));
        assert_eq!(reg.nodes_at(99), None);
    }

    #[test]
    fn remove_unknown_is_noop() {
        let reg = TopologyRegistry::new();
        reg.register(1);
        reg.remove(7);
        assert_eq!(reg.version(), 1);
    }

    #[test]
    fn snapshot_contains() {
        let reg = TopologyRegistry::new();
        reg.register(4);
        let snap = reg.snapshot();
        assert!(snap.contains(4));
        assert!(!snap.contains(5));
        assert!(!snap.is_empty());
    }
}
