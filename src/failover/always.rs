use crate::config::DFLT_MAX_FAILOVER_ATTEMPTS;
use crate::failover::{FailoverContext, FailoverSpi};
use crate::topology::NodeId;

/// Always-failover policy: any candidate the job has not yet been
/// attempted on, in topology order. Returns `None` once the attempt
/// ceiling is hit or every candidate has been tried.
#[derive(Debug, Clone)]
pub struct AlwaysFailover {
    pub max_attempts: u32,
}

impl Default for AlwaysFailover {
    fn default() -> Self {
        Self {
            max_attempts: DFLT_MAX_FAILOVER_ATTEMPTS,
        }
    }
}

impl AlwaysFailover {
    pub fn new(max_attempts: u32) -> Self {
        Self { max_attempts }
    }
}

impl FailoverSpi for AlwaysFailover {
    fn failover(&self, ctx: &FailoverContext<'_>, candidates: &[NodeId]) -> Option<NodeId> {
        if ctx.attempts >= self.max_attempts {
            tracing::warn!(
                job_id = %ctx.job_id,
                attempts = ctx.attempts,
                "Failover attempt ceiling reached"
            );
            return None;
        }
        let picked = candidates.iter().copied().find(|&n| !ctx.is_excluded(n));
        if picked.is_none() {
            tracing::warn!(job_id = %ctx.job_id, "No failover candidate left");
        }
        picked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ctx<'a>(attempts: u32, attempted: &'a [NodeId], failed: NodeId) -> FailoverContext<'a> {
        FailoverContext {
            job_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            attempts,
            attempted,
            failed_node: failed,
            thief: None,
            cause: "boom",
        }
    }

    #[test]
    fn picks_first_unattempted_candidate() {
        let attempted = [1u64];
        let ctx = ctx(1, &attempted, 2);
        let spi = AlwaysFailover::default();
        assert_eq!(spi.failover(&ctx, &[1, 2, 3]), Some(3));
    }

    #[test]
    fn excludes_failed_node_even_if_not_recorded() {
        let ctx = ctx(0, &[], 1);
        let spi = AlwaysFailover::default();
        assert_eq!(spi.failover(&ctx, &[1, 2]), Some(2));
    }

    #[test]
    fn none_when_all_attempted() {
        let attempted = [1u64, 2];
        let ctx = ctx(2, &attempted, 2);
        let spi = AlwaysFailover::default();
        assert_eq!(spi.failover(&ctx, &[1, 2]), None);
    }

    #[test]
    fn none_at_attempt_ceiling() {
        let ctx = ctx(3, &[], 1);
        let spi = AlwaysFailover::new(3);
        assert_eq!(spi.failover(&ctx, &[1, 2, 3]), None);
    }
}
