use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::session::{JobId, TaskId, TaskSession};
use crate::topology::NodeId;

/// What one job execution produced.
///
/// Jobs signal failure by returning, not by panicking; the `declared` flag
/// distinguishes failures the task expects (and handles in its result
/// policy) from undeclared ones, which default to failover. `Rejected` is
/// produced when a job never ran because the node refused to schedule it,
/// and `Cancelled` when a cancel request interrupted the run.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Success(Value),
    Failure { cause: String, declared: bool },
    Rejected { cause: String },
    Cancelled,
}

impl JobOutcome {
    pub fn success(data: Value) -> Self {
        JobOutcome::Success(data)
    }

    /// An undeclared failure; the default result policy fails this over.
    pub fn failure(cause: impl Into<String>) -> Self {
        JobOutcome::Failure {
            cause: cause.into(),
            declared: false,
        }
    }

    /// A declared failure; the default result policy fails the task.
    pub fn declared_failure(cause: impl Into<String>) -> Self {
        JobOutcome::Failure {
            cause: cause.into(),
            declared: true,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success(_))
    }
}

/// Per-job mutable attribute map, carried with the job across failover
/// hops and exposed read-only to the reducer.
pub type JobAttributes = Arc<Mutex<HashMap<String, Value>>>;

/// Capabilities handed to a job when it runs: identity, the shared task
/// session, a per-job attribute map and the cancellation token.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    task_id: TaskId,
    node_id: NodeId,
    session: Arc<TaskSession>,
    attributes: JobAttributes,
    cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        job_id: JobId,
        task_id: TaskId,
        node_id: NodeId,
        session: Arc<TaskSession>,
        attributes: JobAttributes,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id,
            task_id,
            node_id,
            session,
            attributes,
            cancel,
        }
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// The node this execution attempt runs on.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// The task-wide shared session.
    pub fn session(&self) -> &Arc<TaskSession> {
        &self.session
    }

    /// Set a job-level attribute (distinct from the task session map).
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.attributes
            .lock()
            .expect("job attributes lock poisoned")
            .insert(key.into(), value);
    }

    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        self.attributes
            .lock()
            .expect("job attributes lock poisoned")
            .get(key)
            .cloned()
    }

    /// Token cancelled when the engine asks this job to stop. Cancellation
    /// is cooperative: a job that ignores it runs to completion, but its
    /// result is discarded once the task has moved on.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub type JobFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send + 'static>>;

/// A unit of executable work bound to one node.
pub trait ComputeJob: Send + Sync + 'static {
    fn execute(&self, ctx: JobContext) -> JobFuture;

    /// Cancel hook, invoked when the task is cancelled or times out.
    /// The engine also cancels the job's token; override this only when
    /// the job holds resources the token cannot reach.
    fn cancel(&self) {}
}

/// Adapter turning an async closure into a [`ComputeJob`].
pub struct FnJob<F> {
    f: F,
}

impl<F, Fut> ComputeJob for FnJob<F>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    fn execute(&self, ctx: JobContext) -> JobFuture {
        Box::pin((self.f)(ctx))
    }
}

/// Wrap an async closure as a shareable job.
pub fn job_fn<F, Fut>(f: F) -> Arc<dyn ComputeJob>
where
    F: Fn(JobContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = JobOutcome> + Send + 'static,
{
    Arc::new(FnJob { f })
}

/// Fresh empty attribute map for a new job.
pub fn new_job_attributes() -> JobAttributes {
    Arc::new(Mutex::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn ctx() -> JobContext {
        JobContext::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            1,
            Arc::new(TaskSession::new(Uuid::new_v4(), "t", 0)),
            new_job_attributes(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn job_fn_executes_closure() {
        let job = job_fn(|_ctx| async { JobOutcome::success(json!(42)) });
        match job.execute(ctx()).await {
            JobOutcome::Success(v) => assert_eq!(v, json!(42)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn context_attributes_are_job_local() {
        let c = ctx();
        c.set_attribute("hops", json!(2));
        assert_eq!(c.get_attribute("hops"), Some(json!(2)));
        assert!(c.session().get_attribute("hops").is_none());
    }

    #[test]
    fn outcome_constructors() {
        assert!(JobOutcome::success(json!(null)).is_success());
        match JobOutcome::failure("boom") {
            JobOutcome::Failure { declared, .. } => assert!(!declared),
            _ => unreachable!(),
        }
        match JobOutcome::declared_failure("boom") {
            JobOutcome::Failure { declared, .. } => assert!(declared),
            _ => unreachable!(),
        }
    }
}
