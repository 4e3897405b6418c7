//! Task and job lifecycle events.
//!
//! The engine publishes every lifecycle transition to a broadcast channel
//! in causal order per task/job. Consumers (metrics, tests) subscribe and
//! read; slow consumers may lag and lose old events, the engine never
//! blocks on publication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::topology::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridEventKind {
    TaskStarted,
    JobMapped,
    JobQueued,
    JobStarted,
    JobResulted,
    JobFailedOver,
    JobFinished,
    JobCancelled,
    JobRejected,
    TaskReduced,
    TaskFinished,
    TaskFailed,
    TaskTimedOut,
}

impl std::fmt::Display for GridEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GridEventKind::TaskStarted => "TASK_STARTED",
            GridEventKind::JobMapped => "JOB_MAPPED",
            GridEventKind::JobQueued => "JOB_QUEUED",
            GridEventKind::JobStarted => "JOB_STARTED",
            GridEventKind::JobResulted => "JOB_RESULTED",
            GridEventKind::JobFailedOver => "JOB_FAILED_OVER",
            GridEventKind::JobFinished => "JOB_FINISHED",
            GridEventKind::JobCancelled => "JOB_CANCELLED",
            GridEventKind::JobRejected => "JOB_REJECTED",
            GridEventKind::TaskReduced => "TASK_REDUCED",
            GridEventKind::TaskFinished => "TASK_FINISHED",
            GridEventKind::TaskFailed => "TASK_FAILED",
            GridEventKind::TaskTimedOut => "TASK_TIMEDOUT",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridEvent {
    pub kind: GridEventKind,
    pub task_id: Uuid,
    pub job_id: Option<Uuid>,
    pub node_id: Option<NodeId>,
    pub timestamp: DateTime<Utc>,
}

/// Broadcast bus for lifecycle events.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GridEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, kind: GridEventKind, task_id: Uuid, job_id: Option<Uuid>, node_id: Option<NodeId>) {
        let event = GridEvent {
            kind,
            task_id,
            job_id,
            node_id,
            timestamp: Utc::now(),
        };
        tracing::debug!(kind = %event.kind, task_id = %task_id, job_id = ?job_id, node_id = ?node_id, "Event");
        // No receivers is fine.
        let _ = self.tx.send(event);
    }
}
