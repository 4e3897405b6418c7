//! Shared task-session state across jobs and nodes.


use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use gridlite::compute::ComputeJob;
use gridlite::scheduler::ContinuousMapper;
use gridlite::{
    job_fn, ComputeTask, Grid, GridError, JobOutcome, JobResult, NodeId, Result, TaskSession,
};
use test_harness::init_tracing;

/// One job publishes an attribute, a sibling on another node blocks on
/// it; the wait is woken by the write, not by polling.
struct HandshakeTask;

impl ComputeTask for HandshakeTask {
    type Output = Vec<String>;

    fn map(
        &self,
        topology: &[NodeId],
        _arg: Option<Value>,
        _mapper: &ContinuousMapper,
    ) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>> {
        let setter = job_fn(|ctx| async move {
            // Give the waiter a moment to actually block first.
            tokio::time::sleep(Duration::from_millis(50)).await;
            match ctx.session().set_attribute("token", json!("handshake")) {
                Ok(()) => JobOutcome::success(json!("set")),
                Err(err) => JobOutcome::failure(err.to_string()),
            }
        });
        let waiter = job_fn(|ctx| async move {
            match ctx
                .session()
                .wait_for_attribute("token", Some(Duration::from_secs(5)))
                .await
            {
                Ok(value) => JobOutcome::success(value),
                Err(err) => JobOutcome::failure(err.to_string()),
            }
        });
        Ok(vec![
            (setter, topology[0]),
            (waiter, *topology.last().expect("non-empty topology")),
        ])
    }

    fn reduce(&self, results: Vec<JobResult>) -> Result<Vec<String>> {
        Ok(results
            .iter()
            .filter_map(|r| r.data.as_ref().and_then(|v| v.as_str()))
            .map(str::to_owned)
            .collect())
    }
}

#[tokio::test]
async fn attribute_set_on_one_node_wakes_waiter_on_another() {
    init_tracing();
    let grid = Grid::builder().with_nodes(2).start();

    let values = grid
        .submit(HandshakeTask, None)
        .get_timeout(Duration::from_secs(10))
        .await
        .unwrap();
    assert!(values.contains(&"handshake".to_string()));
    assert!(values.contains(&"set".to_string()));

    grid.shutdown().await;
}

/// A wait on an attribute nobody sets times out without failing the job.
struct WaitTimeoutTask;

impl ComputeTask for WaitTimeoutTask {
    type Output = String;

    fn map(
        &self,
        topology: &[NodeId],
        _arg: Option<Value>,
        _mapper: &ContinuousMapper,
    ) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>> {
        let job = job_fn(|ctx| async move {
            match ctx
                .session()
                .wait_for_attribute("never-set", Some(Duration::from_millis(50)))
                .await
            {
                Err(GridError::WaitTimeout) => JobOutcome::success(json!("timed-out")),
                Ok(_) => JobOutcome::failure("attribute appeared unexpectedly"),
                Err(err) => JobOutcome::failure(err.to_string()),
            }
        });
        Ok(vec![(job, topology[0])])
    }

    fn reduce(&self, results: Vec<JobResult>) -> Result<String> {
        results
            .iter()
            .filter_map(|r| r.data.as_ref().and_then(|v| v.as_str()))
            .map(str::to_owned)
            .next()
            .ok_or_else(|| GridError::Reduce("no result".into()))
    }
}

#[tokio::test]
async fn wait_for_missing_attribute_times_out() {
    init_tracing();
    let grid = Grid::builder().with_nodes(1).start();

    let outcome = grid
        .submit(WaitTimeoutTask, None)
        .get_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(outcome, "timed-out");

    grid.shutdown().await;
}

/// Siblings are registered before any job is dispatched, so every
/// running job of a statically mapped task sees the full set.
struct SiblingCountTask {
    expected: usize,
}

impl ComputeTask for SiblingCountTask {
    type Output = bool;

    fn map(
        &self,
        topology: &[NodeId],
        _arg: Option<Value>,
        _mapper: &ContinuousMapper,
    ) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>> {
        let expected = self.expected;
        let jobs = (0..self.expected)
            .map(|_| {
                job_fn(move |ctx| async move {
                    JobOutcome::success(json!(ctx.session().sibling_count() == expected))
                })
            })
            .collect();
        gridlite::spread_jobs(jobs, topology)
    }

    fn reduce(&self, results: Vec<JobResult>) -> Result<bool> {
        Ok(results
            .iter()
            .all(|r| r.data.as_ref().and_then(|v| v.as_bool()) == Some(true)))
    }
}

#[tokio::test]
async fn every_job_sees_the_full_sibling_set() {
    init_tracing();
    let grid = Grid::builder().with_nodes(2).start();

    let all_saw_full_set = grid
        .submit(SiblingCountTask { expected: 4 }, None)
        .get_timeout(Duration::from_secs(5))
        .await
        .unwrap();
    assert!(all_saw_full_set);

    grid.shutdown().await;
}

/// The session is torn down once the task reaches a terminal state.
struct SessionLeakTask {
    stash: Arc<Mutex<Option<Arc<TaskSession>>>>,
}

impl ComputeTask for SessionLeakTask {
    type Output = ();

    fn map(
        &self,
        topology: &[NodeId],
        _arg: Option<Value>,
        _mapper: &ContinuousMapper,
    ) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>> {
        let stash = self.stash.clone();
        let job = job_fn(move |ctx| {
            let stash = stash.clone();
            async move {
                *stash.lock().unwrap() = Some(ctx.session().clone());
                JobOutcome::success(Value::Null)
            }
        });
        Ok(vec![(job, topology[0])])
    }

    fn reduce(&self, _results: Vec<JobResult>) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn session_is_closed_after_task_completion() {
    init_tracing();
    let grid = Grid::builder().with_nodes(1).start();

    let stash = Arc::new(Mutex::new(None));
    grid.submit(
        SessionLeakTask {
            stash: stash.clone(),
        },
        None,
    )
    .get_timeout(Duration::from_secs(5))
    .await
    .unwrap();

    let session = stash.lock().unwrap().clone().expect("job stashed session");
    assert!(session.is_closed());
    assert!(matches!(
        session.set_attribute("late", json!(1)),
        Err(GridError::SessionClosed)
    ));

    grid.shutdown().await;
}
