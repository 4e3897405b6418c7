use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::compute::job::ComputeJob;
use crate::error::Result;
use crate::scheduler::descriptor::JobResult;
use crate::scheduler::mapper::ContinuousMapper;
use crate::topology::NodeId;

/// Decision the task makes for each arriving job result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultPolicy {
    /// Keep collecting results.
    Wait,
    /// Stop collecting and reduce over the results received so far, even
    /// if jobs are still outstanding.
    Reduce,
    /// Hand the failed job to the failover coordinator.
    Failover,
}

/// A distributed task: split into jobs, judge each result, reduce.
///
/// `map` runs once at submission against a topology snapshot; it may also
/// (or instead) feed jobs through the continuous `mapper` while earlier
/// jobs are still running. Returning no jobs and sending none is a
/// mapping error.
pub trait ComputeTask: Send + Sync + 'static {
    /// Reduced task result; cloned to every `get()` caller and listener.
    type Output: Clone + Send + 'static;

    fn map(
        &self,
        topology: &[NodeId],
        arg: Option<Value>,
        mapper: &ContinuousMapper,
    ) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>>;

    /// Per-result policy. The default accepts successes, records
    /// rejections, fails over undeclared failures and fails the task on
    /// declared ones.
    fn result(&self, result: &JobResult, received: &[JobResult]) -> Result<ResultPolicy> {
        let _ = received;
        default_result_policy(result)
    }

    /// Final aggregation over results in completion order.
    fn reduce(&self, results: Vec<JobResult>) -> Result<Self::Output>;
}

/// Default per-result policy (used when a task does not override
/// [`ComputeTask::result`]).
pub fn default_result_policy(result: &JobResult) -> Result<ResultPolicy> {
    if result.rejected || result.cancelled {
        return Ok(ResultPolicy::Wait);
    }
    match &result.error {
        None => Ok(ResultPolicy::Wait),
        Some(err) if result.declared => Err(err.clone()),
        Some(_) => Ok(ResultPolicy::Failover),
    }
}

/// Node predicate limiting where a task's jobs may run.
pub type NodeFilter = Arc<dyn Fn(NodeId) -> bool + Send + Sync>;

/// Per-submission options.
#[derive(Clone, Default)]
pub struct TaskOptions {
    /// Human-readable task name for sessions, logs and events.
    pub name: Option<String>,
    /// Task-level timeout; elapsing it cancels all jobs and fails the task.
    pub timeout: Option<Duration>,
    /// When set, individual results are not retained: the result policy
    /// sees only the latest result and `reduce` receives an empty list.
    pub no_result_cache: bool,
    /// Restricts mapping and failover candidates to matching nodes.
    pub projection: Option<NodeFilter>,
}

impl TaskOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_no_result_cache(mut self) -> Self {
        self.no_result_cache = true;
        self
    }

    pub fn with_projection<F>(mut self, filter: F) -> Self
    where
        F: Fn(NodeId) -> bool + Send + Sync + 'static,
    {
        self.projection = Some(Arc::new(filter));
        self
    }

    /// Apply the projection predicate to a topology view.
    pub fn project(&self, nodes: &[NodeId]) -> Vec<NodeId> {
        match &self.projection {
            Some(filter) => nodes.iter().copied().filter(|&n| filter(n)).collect(),
            None => nodes.to_vec(),
        }
    }
}

impl fmt::Debug for TaskOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskOptions")
            .field("name", &self.name)
            .field("timeout", &self.timeout)
            .field("no_result_cache", &self.no_result_cache)
            .field("projection", &self.projection.as_ref().map(|_| "<filter>"))
            .finish()
    }
}
