//! Per-task control loop: result reduction, failover coordination and the
//! task state machine.
//!
//! One loop runs per submitted task, on the originating side. It owns the
//! job descriptors, applies the task's result policy to every arriving
//! reply, routes failed jobs through the failover SPI, reroutes stolen
//! jobs to their thief, enforces the task timeout and drives the future
//! to its terminal state. Reply handling is idempotent per job id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::compute::job::{ComputeJob, JobOutcome};
use crate::compute::task::{ComputeTask, ResultPolicy, TaskOptions};
use crate::config::GridConfig;
use crate::error::{GridError, Result};
use crate::events::{EventBus, GridEventKind};
use crate::failover::{FailoverContext, FailoverSpi};
use crate::future::TaskCompleter;
use crate::messaging::{JobRequest, Message, MessageBus};
use crate::scheduler::descriptor::{JobDescriptor, JobResult, JobState};
use crate::session::{JobId, TaskId, TaskSession};
use crate::topology::NodeId;

/// Messages consumed by a task's control loop.
pub enum TaskMsg {
    /// A node finished, failed, rejected or cancelled a job.
    JobReply {
        job_id: JobId,
        node_id: NodeId,
        outcome: JobOutcome,
        attributes: HashMap<String, Value>,
    },
    /// A waiting job was handed off to a thief node.
    Stolen {
        job_id: JobId,
        victim: NodeId,
        thief: NodeId,
    },
    /// The continuous mapper added a job.
    MapperAdd {
        job_id: JobId,
        job: Arc<dyn ComputeJob>,
        target: NodeId,
    },
    /// The task future requested cancellation.
    Cancel,
}

/// End of the task, when one was reached by a handler.
type TaskEnd<R> = Option<Result<R>>;

pub(crate) struct TaskRun<T: ComputeTask> {
    pub task: Arc<T>,
    pub task_id: TaskId,
    pub task_name: String,
    pub session: Arc<TaskSession>,
    pub options: TaskOptions,
    /// Projected topology captured at submission.
    pub candidates: Vec<NodeId>,
    pub config: GridConfig,
    pub bus: Arc<MessageBus>,
    pub events: EventBus,
    pub failover_spi: Arc<dyn FailoverSpi>,
    pub jobs: HashMap<JobId, JobDescriptor>,
    /// Initial dispatch order (mapping order).
    pub initial_order: Vec<JobId>,
    /// Mapper sends not yet seen by this loop.
    pub pending_sends: Arc<AtomicUsize>,
    /// Results in completion order; stays empty in no-result-cache mode.
    pub received: Vec<JobResult>,
    pub ctl_tx: mpsc::UnboundedSender<TaskMsg>,
}

async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

impl<T: ComputeTask> TaskRun<T> {
    pub(crate) async fn run(
        mut self,
        mut ctl_rx: mpsc::UnboundedReceiver<TaskMsg>,
        completer: TaskCompleter<T::Output>,
    ) {
        let task_deadline = self.options.timeout.map(|t| Instant::now() + t);

        for job_id in self.initial_order.clone() {
            if let Some(end) = self.dispatch(job_id) {
                return self.finish(completer, end);
            }
        }

        // Set once cancellation starts: the bounded ack wait.
        let mut cancel_state: Option<Instant> = None;

        loop {
            let cancel_deadline = cancel_state;
            tokio::select! {
                msg = ctl_rx.recv() => {
                    let Some(msg) = msg else { break };
                    if let Some(end) = self.handle_msg(msg, &mut cancel_state) {
                        return self.finish(completer, end);
                    }
                }
                _ = sleep_opt(if cancel_state.is_none() { task_deadline } else { None }) => {
                    let timeout_ms = self
                        .options
                        .timeout
                        .map(|t| t.as_millis() as u64)
                        .unwrap_or_default();
                    return self.finish(completer, Err(GridError::TaskTimeout { timeout_ms }));
                }
                _ = sleep_opt(cancel_deadline) => {
                    // Jobs that did not acknowledge in time are marked
                    // cancelled locally regardless.
                    for desc in self.jobs.values_mut() {
                        desc.transition(JobState::Cancelled);
                    }
                    return self.finish(completer, Err(GridError::TaskCancelled));
                }
            }
        }

        // Every sender is gone without a terminal state; nothing left to
        // drive, tear the session down.
        tracing::warn!(task_id = %self.task_id, "Task loop lost all senders");
        self.finish(completer, Err(GridError::Internal("task loop aborted".into())));
    }

    fn handle_msg(
        &mut self,
        msg: TaskMsg,
        cancel_state: &mut Option<Instant>,
    ) -> TaskEnd<T::Output> {
        match msg {
            TaskMsg::JobReply {
                job_id,
                node_id,
                outcome,
                attributes,
            } => self.on_reply(job_id, node_id, outcome, attributes, cancel_state),
            TaskMsg::Stolen {
                job_id,
                victim,
                thief,
            } => self.on_stolen(job_id, victim, thief, cancel_state),
            TaskMsg::MapperAdd {
                job_id,
                job,
                target,
            } => self.on_mapper_add(job_id, job, target, cancel_state),
            TaskMsg::Cancel => self.on_cancel(cancel_state),
        }
    }

    fn on_reply(
        &mut self,
        job_id: JobId,
        node_id: NodeId,
        outcome: JobOutcome,
        attributes: HashMap<String, Value>,
        cancel_state: &mut Option<Instant>,
    ) -> TaskEnd<T::Output> {
        let Some(desc) = self.jobs.get_mut(&job_id) else {
            return None;
        };
        if desc.state.is_terminal() {
            // Duplicate delivery, drop it.
            return None;
        }

        if let JobOutcome::Cancelled = outcome {
            desc.transition(JobState::Cancelled);
            if cancel_state.is_some() && self.all_jobs_terminal() {
                return Some(Err(GridError::TaskCancelled));
            }
            return self.check_all_done();
        }

        if cancel_state.is_some() {
            // The task has moved on; record the job-level terminal state
            // and discard the result.
            let state = match &outcome {
                JobOutcome::Success(_) => JobState::Finished,
                JobOutcome::Failure { .. } => JobState::Failed,
                JobOutcome::Rejected { .. } => JobState::Rejected,
                JobOutcome::Cancelled => JobState::Cancelled,
            };
            desc.transition(state);
            if self.all_jobs_terminal() {
                return Some(Err(GridError::TaskCancelled));
            }
            return None;
        }

        self.events
            .publish(GridEventKind::JobResulted, self.task_id, Some(job_id), Some(node_id));

        let result = JobResult::from_outcome(job_id, node_id, outcome, attributes);
        let policy = match self.task.result(&result, &self.received) {
            Ok(policy) => policy,
            Err(err) => {
                if let Some(desc) = self.jobs.get_mut(&job_id) {
                    desc.transition(JobState::Failed);
                }
                return Some(Err(err));
            }
        };

        match policy {
            ResultPolicy::Wait => {
                self.settle(job_id, result);
                self.check_all_done()
            }
            ResultPolicy::Reduce => {
                self.settle(job_id, result);
                self.cancel_outstanding();
                Some(self.reduce_now())
            }
            ResultPolicy::Failover => {
                let cause = result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "failed over by result policy".into());
                self.handle_failover(job_id, cause)
            }
        }
    }

    /// Record a result and move its descriptor to the matching terminal
    /// state.
    fn settle(&mut self, job_id: JobId, result: JobResult) {
        if let Some(desc) = self.jobs.get_mut(&job_id) {
            let state = if result.rejected {
                JobState::Rejected
            } else if result.error.is_some() {
                JobState::Failed
            } else {
                JobState::Finished
            };
            desc.transition(state);
        }
        if !self.options.no_result_cache {
            self.received.push(result);
        }
    }

    fn on_stolen(
        &mut self,
        job_id: JobId,
        victim: NodeId,
        thief: NodeId,
        cancel_state: &Option<Instant>,
    ) -> TaskEnd<T::Output> {
        let Some(desc) = self.jobs.get_mut(&job_id) else {
            return None;
        };
        if desc.state.is_terminal() {
            return None;
        }
        if cancel_state.is_some() {
            desc.transition(JobState::Cancelled);
            if self.all_jobs_terminal() {
                return Some(Err(GridError::TaskCancelled));
            }
            return None;
        }
        desc.transition(JobState::Stolen);
        desc.thief = Some(thief);

        let ctx = FailoverContext {
            job_id,
            task_id: self.task_id,
            attempts: desc.attempts,
            attempted: &desc.attempted,
            failed_node: victim,
            thief: Some(thief),
            cause: "job stolen by idle node",
        };
        match self.failover_spi.failover(&ctx, &self.candidates) {
            Some(node) if node == thief => {
                let desc = self.jobs.get_mut(&job_id).expect("descriptor exists");
                desc.record_steal(node);
                self.dispatch(job_id)
            }
            Some(node) => {
                // Thief was not eligible; this hop is a real failover.
                let desc = self.jobs.get_mut(&job_id).expect("descriptor exists");
                desc.record_failover(node);
                self.events.publish(
                    GridEventKind::JobFailedOver,
                    self.task_id,
                    Some(job_id),
                    Some(node),
                );
                self.dispatch(job_id)
            }
            None => {
                // A pure steal hand-off never kills a job: put it back on
                // its current node.
                tracing::debug!(job_id = %job_id, victim, "No target for stolen job, re-queueing");
                let desc = self.jobs.get_mut(&job_id).expect("descriptor exists");
                desc.thief = None;
                self.dispatch(job_id)
            }
        }
    }

    fn on_mapper_add(
        &mut self,
        job_id: JobId,
        job: Arc<dyn ComputeJob>,
        target: NodeId,
        cancel_state: &Option<Instant>,
    ) -> TaskEnd<T::Output> {
        self.pending_sends.fetch_sub(1, Ordering::SeqCst);
        if cancel_state.is_some() {
            return None;
        }
        let desc = JobDescriptor::with_id(job_id, self.task_id, job, target);
        self.events
            .publish(GridEventKind::JobMapped, self.task_id, Some(job_id), Some(target));
        self.jobs.insert(job_id, desc);
        self.dispatch(job_id)
    }

    fn on_cancel(&mut self, cancel_state: &mut Option<Instant>) -> TaskEnd<T::Output> {
        if cancel_state.is_some() {
            return None;
        }
        tracing::info!(task_id = %self.task_id, "Cancelling task");
        for desc in self.jobs.values() {
            if desc.state.is_terminal() {
                continue;
            }
            desc.job.cancel();
            let _ = self.bus.send(desc.target, Message::Cancel { job_id: desc.id });
        }
        if self.all_jobs_terminal() {
            return Some(Err(GridError::TaskCancelled));
        }
        *cancel_state = Some(Instant::now() + self.config.cancel_ack_timeout);
        None
    }

    /// Route a failed job through the failover SPI.
    fn handle_failover(&mut self, job_id: JobId, cause: String) -> TaskEnd<T::Output> {
        let Some(desc) = self.jobs.get_mut(&job_id) else {
            return None;
        };
        let ctx = FailoverContext {
            job_id,
            task_id: self.task_id,
            attempts: desc.attempts,
            attempted: &desc.attempted,
            failed_node: desc.target,
            thief: None,
            cause: &cause,
        };
        match self.failover_spi.failover(&ctx, &self.candidates) {
            Some(node) => {
                let desc = self.jobs.get_mut(&job_id).expect("descriptor exists");
                desc.record_failover(node);
                self.events.publish(
                    GridEventKind::JobFailedOver,
                    self.task_id,
                    Some(job_id),
                    Some(node),
                );
                self.dispatch(job_id)
            }
            None => {
                let desc = self.jobs.get_mut(&job_id).expect("descriptor exists");
                desc.transition(JobState::Failed);
                let attempts = desc.attempts;
                Some(Err(GridError::FailoverExhausted { attempts, cause }))
            }
        }
    }

    /// Queue the job on its target node.
    fn dispatch(&mut self, job_id: JobId) -> TaskEnd<T::Output> {
        let Some(desc) = self.jobs.get_mut(&job_id) else {
            return None;
        };
        desc.transition(JobState::Queued);
        let target = desc.target;
        let request = JobRequest {
            job_id,
            task_id: self.task_id,
            task_name: self.task_name.clone(),
            job: desc.job.clone(),
            session: self.session.clone(),
            attributes: desc.attributes.clone(),
            steal_count: desc.steals,
            reply: self.ctl_tx.clone(),
        };
        match self.bus.send(target, Message::Execute(request)) {
            Ok(()) => None,
            Err(err) => {
                tracing::warn!(job_id = %job_id, target, error = %err, "Dispatch failed");
                self.handle_failover(job_id, format!("dispatch to node {} failed: {}", target, err))
            }
        }
    }

    fn all_jobs_terminal(&self) -> bool {
        self.jobs.values().all(|d| d.state.is_terminal())
    }

    fn check_all_done(&mut self) -> TaskEnd<T::Output> {
        if self.all_jobs_terminal() && self.pending_sends.load(Ordering::SeqCst) == 0 {
            Some(self.reduce_now())
        } else {
            None
        }
    }

    /// Best-effort cancellation of every non-terminal job.
    fn cancel_outstanding(&mut self) {
        for desc in self.jobs.values_mut() {
            if desc.state.is_terminal() {
                continue;
            }
            desc.job.cancel();
            let _ = self.bus.send(desc.target, Message::Cancel { job_id: desc.id });
            desc.transition(JobState::Cancelled);
        }
    }

    fn reduce_now(&mut self) -> Result<T::Output> {
        let results = if self.options.no_result_cache {
            Vec::new()
        } else {
            std::mem::take(&mut self.received)
        };
        self.task.reduce(results)
    }

    /// Publish terminal events, tear the session down and complete the
    /// future. Consumes the run.
    fn finish(mut self, completer: TaskCompleter<T::Output>, result: Result<T::Output>) {
        match &result {
            Ok(_) => {
                self.events
                    .publish(GridEventKind::TaskReduced, self.task_id, None, None);
                self.events
                    .publish(GridEventKind::TaskFinished, self.task_id, None, None);
            }
            Err(err) => {
                if err.is_timeout() {
                    self.events
                        .publish(GridEventKind::TaskTimedOut, self.task_id, None, None);
                }
                self.events
                    .publish(GridEventKind::TaskFailed, self.task_id, None, None);
                self.cancel_outstanding();
            }
        }
        self.session.close();
        completer.complete(result);
    }
}
