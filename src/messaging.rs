//! In-process node-addressed transport.
//!
//! This is the seam where a wire transport would plug in: the engine only
//! ever sends a payload to a node id. Job replies travel over a per-task
//! reply channel carried inside the request — the equivalent of
//! registering a response handler at submission time. Reply handling at
//! the task loop is idempotent per job id, so at-least-once delivery is
//! tolerated.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::compute::job::{ComputeJob, JobAttributes};
use crate::error::{GridError, Result};
use crate::scheduler::run::TaskMsg;
use crate::session::{JobId, TaskId, TaskSession};
use crate::topology::NodeId;

/// A job dispatched to a node for execution.
#[derive(Clone)]
pub struct JobRequest {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub task_name: String,
    pub job: Arc<dyn ComputeJob>,
    pub session: Arc<TaskSession>,
    pub attributes: JobAttributes,
    /// How many times this job has been stolen so far.
    pub steal_count: u32,
    /// Response handler back to the originating task loop.
    pub reply: mpsc::UnboundedSender<TaskMsg>,
}

impl fmt::Debug for JobRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRequest")
            .field("job_id", &self.job_id)
            .field("task_id", &self.task_id)
            .field("task_name", &self.task_name)
            .finish()
    }
}

/// Messages a node runtime consumes.
#[derive(Debug, Clone)]
pub enum Message {
    /// Queue a job for execution.
    Execute(JobRequest),
    /// Cancel a queued or running job.
    Cancel { job_id: JobId },
    /// A peer with idle capacity asks for work.
    Steal { thief: NodeId },
}

/// Routes messages to registered node runtimes.
#[derive(Debug, Default)]
pub struct MessageBus {
    senders: Mutex<HashMap<NodeId, mpsc::UnboundedSender<Message>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and hand back its inbox.
    pub fn register(&self, node_id: NodeId) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .lock()
            .expect("bus lock poisoned")
            .insert(node_id, tx);
        rx
    }

    pub fn unregister(&self, node_id: NodeId) {
        self.senders
            .lock()
            .expect("bus lock poisoned")
            .remove(&node_id);
    }

    /// Send a message to one node.
    pub fn send(&self, node_id: NodeId, message: Message) -> Result<()> {
        let senders = self.senders.lock().expect("bus lock poisoned");
        let tx = senders
            .get(&node_id)
            .ok_or(GridError::NodeUnreachable(node_id))?;
        tx.send(message)
            .map_err(|_| GridError::NodeUnreachable(node_id))
    }

    /// Send a message to every node except `from`.
    pub fn broadcast_except(&self, from: NodeId, message: Message) {
        let senders = self.senders.lock().expect("bus lock poisoned");
        for (&node_id, tx) in senders.iter() {
            if node_id == from {
                continue;
            }
            let _ = tx.send(message.clone());
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let senders = self.senders.lock().expect("bus lock poisoned");
        let mut nodes: Vec<NodeId> = senders.keys().copied().collect();
        nodes.sort_unstable();
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_routes_to_registered_node() {
        let bus = MessageBus::new();
        let mut rx = bus.register(1);
        bus.send(1, Message::Steal { thief: 2 }).unwrap();
        match rx.recv().await.unwrap() {
            Message::Steal { thief } => assert_eq!(thief, 2),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn send_to_unknown_node_fails() {
        let bus = MessageBus::new();
        let err = bus.send(9, Message::Cancel { job_id: uuid::Uuid::new_v4() });
        assert!(matches!(err, Err(GridError::NodeUnreachable(9))));
    }

    #[tokio::test]
    async fn broadcast_skips_origin() {
        let bus = MessageBus::new();
        let mut rx1 = bus.register(1);
        let mut rx2 = bus.register(2);
        bus.broadcast_except(1, Message::Steal { thief: 1 });
        assert!(rx2.recv().await.is_some());
        assert!(rx1.try_recv().is_err());
        assert_eq!(bus.nodes(), vec![1, 2]);
    }

    #[test]
    fn unregister_makes_node_unreachable() {
        let bus = MessageBus::new();
        let _rx = bus.register(1);
        bus.unregister(1);
        assert!(bus.send(1, Message::Steal { thief: 2 }).is_err());
    }
}
