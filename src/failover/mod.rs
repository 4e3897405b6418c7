//! Failover: picking a replacement node for a failed or stolen job.
//!
//! The task loop builds a [`FailoverContext`] from the failed job's
//! descriptor and asks the pluggable [`FailoverSpi`] for a new target
//! among the candidate nodes (the current topology view, already
//! filtered by the task's projection). `None` means the job cannot be
//! failed over further and the task fails with the job's cause.

pub mod always;
pub mod stealing;

pub use always::AlwaysFailover;
pub use stealing::JobStealingFailover;

use crate::session::{JobId, TaskId};
use crate::topology::NodeId;

/// Context of one failover decision.
#[derive(Debug)]
pub struct FailoverContext<'a> {
    pub job_id: JobId,
    pub task_id: TaskId,
    /// Failover attempts so far (stealing hops excluded).
    pub attempts: u32,
    /// Nodes the job already failed on.
    pub attempted: &'a [NodeId],
    /// The node the job just failed (or was queued) on.
    pub failed_node: NodeId,
    /// Set when a thief node requested this job; stealing is routed, not
    /// failed over.
    pub thief: Option<NodeId>,
    /// Why the job left its previous node.
    pub cause: &'a str,
}

impl FailoverContext<'_> {
    /// True when `node` must not be picked again.
    pub fn is_excluded(&self, node: NodeId) -> bool {
        node == self.failed_node || self.attempted.contains(&node)
    }
}

/// Pluggable failover policy.
pub trait FailoverSpi: Send + Sync + 'static {
    fn failover(&self, ctx: &FailoverContext<'_>, candidates: &[NodeId]) -> Option<NodeId>;
}
