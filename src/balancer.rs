//! Load balancing for mapper sends without an explicit target node.

use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::topology::NodeId;

/// Picks a target node among candidates.
pub trait LoadBalancer: Send + Sync + 'static {
    fn pick(&self, candidates: &[NodeId]) -> Option<NodeId>;
}

/// Cycles through candidates in order.
#[derive(Debug, Default)]
pub struct RoundRobinBalancer {
    next: AtomicUsize,
}

impl RoundRobinBalancer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobinBalancer {
    fn pick(&self, candidates: &[NodeId]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[idx])
    }
}

/// Picks a uniformly random candidate.
#[derive(Debug, Default)]
pub struct RandomBalancer;

impl LoadBalancer for RandomBalancer {
    fn pick(&self, candidates: &[NodeId]) -> Option<NodeId> {
        if candidates.is_empty() {
            return None;
        }
        let idx = rand::thread_rng().gen_range(0..candidates.len());
        Some(candidates[idx])
    }
}
