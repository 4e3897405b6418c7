use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::collision::{CollisionContext, CollisionSpi, SlotDecision, WaitingSlot};
use crate::compute::job::{JobContext, JobOutcome};
use crate::config::NodeConfig;
use crate::events::{EventBus, GridEventKind};
use crate::messaging::{JobRequest, Message, MessageBus};
use crate::scheduler::run::TaskMsg;
use crate::session::JobId;
use crate::topology::NodeId;

/// How often an idle steal-enabled node refreshes its steal requests.
const STEAL_REQUEST_INTERVAL: Duration = Duration::from_millis(200);

/// Completion notice from a spawned job back to its node runtime.
pub(crate) struct JobDone {
    job_id: JobId,
    outcome: JobOutcome,
}

struct QueuedJob {
    request: JobRequest,
    steal_count: u32,
}

struct ActiveJob {
    request: JobRequest,
    token: CancellationToken,
    cancel_requested: bool,
}

/// One logical cluster node: local wait/active job sets, collision
/// resolution, job execution and the stealing protocol.
///
/// The runtime re-resolves collisions after every local change (a job
/// arrives, finishes, is cancelled or a steal request comes in) and
/// applies the policy's decisions. A job handed to a thief is dequeued
/// before the hand-off notice is sent, so it can never be active here
/// and on the thief at the same time.
pub struct NodeRuntime {
    config: NodeConfig,
    collision: Arc<dyn CollisionSpi>,
    bus: Arc<MessageBus>,
    events: EventBus,
    shutdown: CancellationToken,
    waiting: VecDeque<QueuedJob>,
    active: HashMap<JobId, ActiveJob>,
    steal_requests: Vec<NodeId>,
    done_tx: mpsc::UnboundedSender<JobDone>,
}

impl NodeRuntime {
    pub(crate) fn new(
        config: NodeConfig,
        collision: Arc<dyn CollisionSpi>,
        bus: Arc<MessageBus>,
        events: EventBus,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<JobDone>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        (
            Self {
                config,
                collision,
                bus,
                events,
                shutdown,
                waiting: VecDeque::new(),
                active: HashMap::new(),
                steal_requests: Vec::new(),
                done_tx,
            },
            done_rx,
        )
    }

    pub(crate) async fn run(
        mut self,
        mut inbox: mpsc::UnboundedReceiver<Message>,
        mut done_rx: mpsc::UnboundedReceiver<JobDone>,
    ) {
        let node_id = self.config.node_id;
        tracing::info!(node_id, "Node runtime started");

        let shutdown = self.shutdown.clone();
        let mut steal_tick = tokio::time::interval(STEAL_REQUEST_INTERVAL);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                msg = inbox.recv() => match msg {
                    Some(msg) => self.on_message(msg),
                    None => break,
                },
                done = done_rx.recv() => match done {
                    Some(done) => self.on_done(done),
                    None => break,
                },
                _ = steal_tick.tick() => {}
            }
            self.resolve_collisions();
            self.maybe_request_steal();
        }

        // Stop whatever is still running; the originating tasks are gone
        // or will time the jobs out.
        for job in self.active.values() {
            job.token.cancel();
        }
        tracing::info!(node_id, "Node runtime stopped");
    }

    fn on_message(&mut self, msg: Message) {
        match msg {
            Message::Execute(request) => self.on_execute(request),
            Message::Cancel { job_id } => self.on_cancel(job_id),
            Message::Steal { thief } => self.on_steal_request(thief),
        }
    }

    fn on_execute(&mut self, request: JobRequest) {
        let job_id = request.job_id;
        // At-least-once delivery: drop duplicates.
        if self.active.contains_key(&job_id)
            || self.waiting.iter().any(|q| q.request.job_id == job_id)
        {
            return;
        }
        tracing::debug!(node_id = self.config.node_id, job_id = %job_id, "Job queued");
        self.events.publish(
            GridEventKind::JobQueued,
            request.task_id,
            Some(job_id),
            Some(self.config.node_id),
        );
        self.waiting.push_back(QueuedJob {
            steal_count: request.steal_count,
            request,
        });
    }

    fn on_cancel(&mut self, job_id: JobId) {
        if let Some(active) = self.active.get_mut(&job_id) {
            active.cancel_requested = true;
            active.request.job.cancel();
            active.token.cancel();
            return;
        }
        if let Some(pos) = self.waiting.iter().position(|q| q.request.job_id == job_id) {
            let queued = self.waiting.remove(pos).expect("position just found");
            self.events.publish(
                GridEventKind::JobCancelled,
                queued.request.task_id,
                Some(job_id),
                Some(self.config.node_id),
            );
            Self::reply(&queued.request, self.config.node_id, JobOutcome::Cancelled);
        }
    }

    fn on_steal_request(&mut self, thief: NodeId) {
        if thief == self.config.node_id || self.steal_requests.contains(&thief) {
            return;
        }
        self.steal_requests.push(thief);
    }

    fn on_done(&mut self, done: JobDone) {
        let Some(active) = self.active.remove(&done.job_id) else {
            return;
        };
        let outcome = if active.cancel_requested && !done.outcome.is_success() {
            JobOutcome::Cancelled
        } else {
            done.outcome
        };
        let node_id = self.config.node_id;
        match &outcome {
            JobOutcome::Success(_) => {
                tracing::info!(node_id, job_id = %done.job_id, "Job finished");
                self.events.publish(
                    GridEventKind::JobFinished,
                    active.request.task_id,
                    Some(done.job_id),
                    Some(node_id),
                );
            }
            JobOutcome::Cancelled => {
                tracing::info!(node_id, job_id = %done.job_id, "Job cancelled");
                self.events.publish(
                    GridEventKind::JobCancelled,
                    active.request.task_id,
                    Some(done.job_id),
                    Some(node_id),
                );
            }
            JobOutcome::Failure { cause, .. } => {
                tracing::warn!(node_id, job_id = %done.job_id, %cause, "Job failed");
            }
            JobOutcome::Rejected { cause } => {
                tracing::warn!(node_id, job_id = %done.job_id, %cause, "Job rejected itself");
                self.events.publish(
                    GridEventKind::JobRejected,
                    active.request.task_id,
                    Some(done.job_id),
                    Some(node_id),
                );
            }
        }
        Self::reply(&active.request, node_id, outcome);
    }

    /// Build a collision pass over the local job sets and apply the
    /// policy's decisions.
    fn resolve_collisions(&mut self) {
        if self.waiting.is_empty() {
            return;
        }
        let active_ids: Vec<JobId> = self.active.keys().copied().collect();
        let slots: Vec<WaitingSlot> = self
            .waiting
            .iter()
            .map(|q| WaitingSlot::new(q.request.job_id, q.request.task_id, q.steal_count))
            .collect();
        let requests = std::mem::take(&mut self.steal_requests);
        let mut ctx =
            CollisionContext::new(self.config.node_id, active_ids, slots, requests);
        self.collision.on_collision(&mut ctx);
        let (slots, remaining) = ctx.into_parts();
        self.steal_requests = remaining;

        for slot in slots {
            match slot.decision() {
                SlotDecision::Keep => {}
                SlotDecision::Activate => self.activate(slot.job_id()),
                SlotDecision::Reject => self.reject(slot.job_id()),
                SlotDecision::Steal(thief) => self.hand_off(slot.job_id(), thief),
            }
        }
    }

    /// Promote a waiting job and spawn its execution.
    fn activate(&mut self, job_id: JobId) {
        let Some(pos) = self.waiting.iter().position(|q| q.request.job_id == job_id) else {
            return;
        };
        let queued = self.waiting.remove(pos).expect("position just found");
        let request = queued.request;
        let node_id = self.config.node_id;

        let token = CancellationToken::new();
        let ctx = JobContext::new(
            job_id,
            request.task_id,
            node_id,
            request.session.clone(),
            request.attributes.clone(),
            token.clone(),
        );

        tracing::info!(node_id, job_id = %job_id, task = %request.task_name, "Job started");
        self.events.publish(
            GridEventKind::JobStarted,
            request.task_id,
            Some(job_id),
            Some(node_id),
        );

        // The job runs to completion on its own; cancellation is
        // cooperative through the context token. A monitor task converts
        // a panic into a failed outcome.
        let execution = tokio::spawn(request.job.execute(ctx));
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let outcome = match execution.await {
                Ok(outcome) => outcome,
                Err(err) => JobOutcome::failure(format!("job execution panicked: {}", err)),
            };
            let _ = done_tx.send(JobDone { job_id, outcome });
        });

        self.active.insert(
            job_id,
            ActiveJob {
                request,
                token,
                cancel_requested: false,
            },
        );
    }

    /// Drop a waiting job as execution-rejected (never failed over).
    fn reject(&mut self, job_id: JobId) {
        let Some(pos) = self.waiting.iter().position(|q| q.request.job_id == job_id) else {
            return;
        };
        let queued = self.waiting.remove(pos).expect("position just found");
        let node_id = self.config.node_id;
        tracing::warn!(node_id, job_id = %job_id, "Job rejected by collision policy");
        self.events.publish(
            GridEventKind::JobRejected,
            queued.request.task_id,
            Some(job_id),
            Some(node_id),
        );
        Self::reply(
            &queued.request,
            node_id,
            JobOutcome::Rejected {
                cause: "rejected by collision policy".into(),
            },
        );
    }

    /// Hand a waiting job to a thief node. The job leaves the local queue
    /// before the notice is sent.
    fn hand_off(&mut self, job_id: JobId, thief: NodeId) {
        let Some(pos) = self.waiting.iter().position(|q| q.request.job_id == job_id) else {
            return;
        };
        let queued = self.waiting.remove(pos).expect("position just found");
        let node_id = self.config.node_id;
        tracing::info!(node_id, job_id = %job_id, thief, "Job handed to thief");
        let _ = queued.request.reply.send(TaskMsg::Stolen {
            job_id,
            victim: node_id,
            thief,
        });
    }

    /// Ask peers for work when this node has idle capacity.
    fn maybe_request_steal(&mut self) {
        if !self.config.steal_enabled {
            return;
        }
        if self.waiting.is_empty() && self.active.len() < self.config.active_jobs_threshold {
            self.bus.broadcast_except(
                self.config.node_id,
                Message::Steal {
                    thief: self.config.node_id,
                },
            );
        }
    }

    fn reply(request: &JobRequest, node_id: NodeId, outcome: JobOutcome) {
        let attributes = request
            .attributes
            .lock()
            .expect("job attributes lock poisoned")
            .clone();
        let _ = request.reply.send(TaskMsg::JobReply {
            job_id: request.job_id,
            node_id,
            outcome,
            attributes,
        });
    }
}
