use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::balancer::LoadBalancer;
use crate::compute::job::ComputeJob;
use crate::error::{GridError, Result};
use crate::scheduler::run::TaskMsg;
use crate::session::{JobId, TaskSession};
use crate::topology::NodeId;

/// Spread jobs over nodes round-robin, wrapping around when there are
/// more jobs than nodes.
pub fn spread_jobs(
    jobs: Vec<Arc<dyn ComputeJob>>,
    nodes: &[NodeId],
) -> Result<Vec<(Arc<dyn ComputeJob>, NodeId)>> {
    if nodes.is_empty() {
        return Err(GridError::Topology("no nodes to spread jobs over".into()));
    }
    Ok(jobs
        .into_iter()
        .enumerate()
        .map(|(i, job)| (job, nodes[i % nodes.len()]))
        .collect())
}

/// Handle for mapping jobs incrementally while the task is running.
///
/// `send` registers the new job in the session's sibling registry before
/// handing it to the task loop, so a sibling count observed by any
/// already-running job reflects the send as soon as it returns.
#[derive(Clone)]
pub struct ContinuousMapper {
    session: Arc<TaskSession>,
    ctl: mpsc::UnboundedSender<TaskMsg>,
    balancer: Arc<dyn LoadBalancer>,
    candidates: Vec<NodeId>,
    /// Sends accepted but not yet picked up by the task loop.
    pending: Arc<AtomicUsize>,
}

impl ContinuousMapper {
    pub(crate) fn new(
        session: Arc<TaskSession>,
        ctl: mpsc::UnboundedSender<TaskMsg>,
        balancer: Arc<dyn LoadBalancer>,
        candidates: Vec<NodeId>,
    ) -> Self {
        Self {
            session,
            ctl,
            balancer,
            candidates,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Map one more job, letting the load balancer pick the node.
    pub fn send(&self, job: Arc<dyn ComputeJob>) -> Result<JobId> {
        let node = self
            .balancer
            .pick(&self.candidates)
            .ok_or_else(|| GridError::Topology("no candidate nodes for mapper send".into()))?;
        self.dispatch(job, node)
    }

    /// Map one more job onto an explicit node.
    pub fn send_to(&self, job: Arc<dyn ComputeJob>, node: NodeId) -> Result<JobId> {
        if !self.candidates.contains(&node) {
            return Err(GridError::Mapping(format!(
                "node {} is not in the task's topology",
                node
            )));
        }
        self.dispatch(job, node)
    }

    fn dispatch(&self, job: Arc<dyn ComputeJob>, node: NodeId) -> Result<JobId> {
        if self.session.is_closed() {
            return Err(GridError::SessionClosed);
        }
        let job_id = Uuid::new_v4();
        // Sibling registration happens-before dispatch.
        self.session.add_sibling(job_id);
        self.pending.fetch_add(1, Ordering::SeqCst);
        self.ctl
            .send(TaskMsg::MapperAdd {
                job_id,
                job,
                target: node,
            })
            .map_err(|_| {
                self.pending.fetch_sub(1, Ordering::SeqCst);
                GridError::SessionClosed
            })?;
        Ok(job_id)
    }

    /// Sends not yet turned into descriptors by the task loop.
    pub(crate) fn pending_sends(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub(crate) fn pending_handle(&self) -> Arc<AtomicUsize> {
        self.pending.clone()
    }
}
