use crate::config::DFLT_MAX_FAILOVER_ATTEMPTS;
use crate::failover::{FailoverContext, FailoverSpi};
use crate::topology::NodeId;

/// Job-stealing-aware failover policy.
///
/// When the context names a thief node that is still a valid candidate,
/// the job is routed straight to it — that hand-off is stealing, not
/// failover, and the task loop leaves the attempt counter untouched.
/// A thief that left the topology, sits outside the task projection or
/// equals the failed node falls back to a regular failover pick. The
/// attempt ceiling applies to both paths.
#[derive(Debug, Clone)]
pub struct JobStealingFailover {
    pub max_attempts: u32,
}

impl Default for JobStealingFailover {
    fn default() -> Self {
        Self {
            max_attempts: DFLT_MAX_FAILOVER_ATTEMPTS,
        }
    }
}

impl JobStealingFailover {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl FailoverSpi for JobStealingFailover {
    fn failover(&self, ctx: &FailoverContext<'_>, candidates: &[NodeId]) -> Option<NodeId> {
        if ctx.attempts >= self.max_attempts {
            tracing::warn!(
                job_id = %ctx.job_id,
                attempts = ctx.attempts,
                "Failover attempt ceiling reached"
            );
            return None;
        }

        if let Some(thief) = ctx.thief {
            if thief != ctx.failed_node && candidates.contains(&thief) {
                return Some(thief);
            }
            tracing::debug!(
                job_id = %ctx.job_id,
                thief,
                "Thief not eligible, falling back to regular failover"
            );
        }

        candidates.iter().copied().find(|&n| !ctx.is_excluded(n))
    }
}
