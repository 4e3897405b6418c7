//! Collision resolution: which locally queued jobs become active.
//!
//! Whenever a node's local job set changes (a job arrives, finishes or is
//! added by a peer), the runtime builds a [`CollisionContext`] over its
//! active and waiting jobs and invokes the pluggable [`CollisionSpi`].
//! The policy records a decision per waiting slot — activate, keep
//! waiting, reject, or hand to a thief node — and the runtime applies
//! the decisions after the call returns.

pub mod fifo;
pub mod stealing;

pub use fifo::FifoQueueCollision;
pub use stealing::JobStealingCollision;

use crate::session::{JobId, TaskId};
use crate::topology::NodeId;

/// Decision recorded for one waiting job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDecision {
    /// Stay in the wait queue.
    Keep,
    /// Promote to active.
    Activate,
    /// Reject (execution-rejected, never failed over).
    Reject,
    /// Hand off to the thief node.
    Steal(NodeId),
}

/// View of one waiting job, in queue order.
#[derive(Debug)]
pub struct WaitingSlot {
    job_id: JobId,
    task_id: TaskId,
    steal_count: u32,
    decision: SlotDecision,
}

impl WaitingSlot {
    pub fn new(job_id: JobId, task_id: TaskId, steal_count: u32) -> Self {
        Self {
            job_id,
            task_id,
            steal_count,
            decision: SlotDecision::Keep,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// How many times this job has already been stolen.
    pub fn steal_count(&self) -> u32 {
        self.steal_count
    }

    pub fn decision(&self) -> SlotDecision {
        self.decision
    }

    pub fn activate(&mut self) {
        self.decision = SlotDecision::Activate;
    }

    pub fn reject(&mut self) {
        self.decision = SlotDecision::Reject;
    }

    pub fn steal_to(&mut self, thief: NodeId) {
        self.decision = SlotDecision::Steal(thief);
    }
}

/// Collision state for one resolution pass on one node.
#[derive(Debug)]
pub struct CollisionContext {
    node_id: NodeId,
    active: Vec<JobId>,
    waiting: Vec<WaitingSlot>,
    steal_requests: Vec<NodeId>,
}

impl CollisionContext {
    pub fn new(
        node_id: NodeId,
        active: Vec<JobId>,
        waiting: Vec<WaitingSlot>,
        steal_requests: Vec<NodeId>,
    ) -> Self {
        Self {
            node_id,
            active,
            waiting,
            steal_requests,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Ids of jobs currently running on this node.
    pub fn active_jobs(&self) -> &[JobId] {
        &self.active
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Waiting jobs in queue order.
    pub fn waiting(&self) -> &[WaitingSlot] {
        &self.waiting
    }

    pub fn waiting_mut(&mut self) -> &mut [WaitingSlot] {
        &mut self.waiting
    }

    /// Count of slots still kept waiting.
    pub fn kept_count(&self) -> usize {
        self.waiting
            .iter()
            .filter(|s| s.decision == SlotDecision::Keep)
            .count()
    }

    /// Pop the oldest pending steal request, if any.
    pub fn pop_steal_request(&mut self) -> Option<NodeId> {
        if self.steal_requests.is_empty() {
            None
        } else {
            Some(self.steal_requests.remove(0))
        }
    }

    /// Return an unconsumed steal request to the queue.
    pub fn push_steal_request(&mut self, thief: NodeId) {
        self.steal_requests.push(thief);
    }

    /// Requests left unconsumed after the policy ran.
    pub fn remaining_steal_requests(&self) -> &[NodeId] {
        &self.steal_requests
    }

    pub fn into_parts(self) -> (Vec<WaitingSlot>, Vec<NodeId>) {
        (self.waiting, self.steal_requests)
    }
}

/// Pluggable local scheduling policy.
pub trait CollisionSpi: Send + Sync + 'static {
    fn on_collision(&self, ctx: &mut CollisionContext);
}
