use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::compute::job::{new_job_attributes, ComputeJob, JobAttributes, JobOutcome};
use crate::error::GridError;
use crate::session::{JobId, TaskId};
use crate::topology::NodeId;

/// Lifecycle of one job as tracked by the originating task.
///
/// Terminal states (`Finished`, `Failed`, `Cancelled`, `Rejected`) are
/// final: once entered, a descriptor never transitions again. `Stolen`
/// covers the hand-off window between the victim dequeuing the job and
/// the thief queuing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Created,
    Queued,
    Active,
    Stolen,
    Finished,
    Failed,
    Cancelled,
    Rejected,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Finished | JobState::Failed | JobState::Cancelled | JobState::Rejected
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Created => write!(f, "created"),
            JobState::Queued => write!(f, "queued"),
            JobState::Active => write!(f, "active"),
            JobState::Stolen => write!(f, "stolen"),
            JobState::Finished => write!(f, "finished"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
            JobState::Rejected => write!(f, "rejected"),
        }
    }
}

/// One unit of work bound to a target node, tracked by the task loop.
pub struct JobDescriptor {
    pub id: JobId,
    pub task_id: TaskId,
    pub target: NodeId,
    pub state: JobState,
    /// Failover attempts so far; stealing hops do not count.
    pub attempts: u32,
    /// Times this job has been stolen.
    pub steals: u32,
    /// Nodes this job already failed on, excluded from failover picks.
    pub attempted: Vec<NodeId>,
    /// Set while a thief node is pulling this job.
    pub thief: Option<NodeId>,
    pub created_at: DateTime<Utc>,
    pub job: Arc<dyn ComputeJob>,
    pub attributes: JobAttributes,
}

impl JobDescriptor {
    pub fn new(task_id: TaskId, job: Arc<dyn ComputeJob>, target: NodeId) -> Self {
        Self::with_id(Uuid::new_v4(), task_id, job, target)
    }

    /// Build a descriptor for a job whose id was already registered in the
    /// session's sibling set (continuous mapping).
    pub fn with_id(id: JobId, task_id: TaskId, job: Arc<dyn ComputeJob>, target: NodeId) -> Self {
        Self {
            id,
            task_id,
            target,
            state: JobState::Created,
            attempts: 0,
            steals: 0,
            attempted: Vec::new(),
            thief: None,
            created_at: Utc::now(),
            job,
            attributes: new_job_attributes(),
        }
    }

    /// Apply a state transition. Returns false (and leaves the state
    /// untouched) when the descriptor is already terminal.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.state = next;
        true
    }

    /// Record a failed attempt on the current target and move the job to a
    /// new node. The attempted set only grows.
    pub fn record_failover(&mut self, new_target: NodeId) {
        if !self.attempted.contains(&self.target) {
            self.attempted.push(self.target);
        }
        self.attempts += 1;
        self.target = new_target;
        self.thief = None;
    }

    /// Move the job to the thief node. Stealing is not a failover: the
    /// attempt counter and the attempted set stay untouched.
    pub fn record_steal(&mut self, thief: NodeId) {
        self.target = thief;
        self.thief = None;
        self.steals += 1;
    }
}

impl fmt::Debug for JobDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDescriptor")
            .field("id", &self.id)
            .field("task_id", &self.task_id)
            .field("target", &self.target)
            .field("state", &self.state)
            .field("attempts", &self.attempts)
            .field("attempted", &self.attempted)
            .field("thief", &self.thief)
            .finish()
    }
}

/// Immutable record of one terminal job execution, handed to the task's
/// result policy and reducer.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: JobId,
    pub node_id: NodeId,
    pub data: Option<Value>,
    pub error: Option<GridError>,
    /// True when the failure was declared by the job.
    pub declared: bool,
    /// True when the job never ran (scheduling rejection).
    pub rejected: bool,
    /// True when a cancel request ended the run.
    pub cancelled: bool,
    /// Snapshot of the job-level attribute map.
    pub attributes: HashMap<String, Value>,
}

impl JobResult {
    pub fn from_outcome(
        job_id: JobId,
        node_id: NodeId,
        outcome: JobOutcome,
        attributes: HashMap<String, Value>,
    ) -> Self {
        let mut res = Self {
            job_id,
            node_id,
            data: None,
            error: None,
            declared: false,
            rejected: false,
            cancelled: false,
            attributes,
        };
        match outcome {
            JobOutcome::Success(data) => res.data = Some(data),
            JobOutcome::Failure { cause, declared } => {
                res.error = Some(GridError::JobFailed { node_id, cause });
                res.declared = declared;
            }
            JobOutcome::Rejected { cause } => {
                res.error = Some(GridError::Rejected(cause));
                res.rejected = true;
            }
            JobOutcome::Cancelled => res.cancelled = true,
        }
        res
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.cancelled
    }
}
