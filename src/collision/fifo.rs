use crate::collision::{CollisionContext, CollisionSpi, SlotDecision};
use crate::config::DFLT_ACTIVE_JOBS_THRESHOLD;

/// FIFO collision policy: activates waiting jobs in arrival order up to
/// the active threshold. With a wait cap set, jobs queued beyond the cap
/// are rejected instead of waiting forever.
#[derive(Debug, Clone)]
pub struct FifoQueueCollision {
    pub active_jobs_threshold: usize,
    pub wait_jobs_cap: Option<usize>,
}

impl Default for FifoQueueCollision {
    fn default() -> Self {
        Self {
            active_jobs_threshold: DFLT_ACTIVE_JOBS_THRESHOLD,
            wait_jobs_cap: None,
        }
    }
}

impl FifoQueueCollision {
    pub fn new(active_jobs_threshold: usize) -> Self {
        Self {
            active_jobs_threshold,
            wait_jobs_cap: None,
        }
    }

    pub fn with_wait_jobs_cap(mut self, cap: usize) -> Self {
        self.wait_jobs_cap = Some(cap);
        self
    }
}

impl CollisionSpi for FifoQueueCollision {
    fn on_collision(&self, ctx: &mut CollisionContext) {
        let mut active = ctx.active_count();
        for slot in ctx.waiting_mut() {
            if active >= self.active_jobs_threshold {
                break;
            }
            slot.activate();
            active += 1;
        }

        if let Some(cap) = self.wait_jobs_cap {
            let mut kept = 0;
            for slot in ctx.waiting_mut() {
                if slot.decision() != SlotDecision::Keep {
                    continue;
                }
                kept += 1;
                if kept > cap {
                    slot.reject();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collision::WaitingSlot;
    use uuid::Uuid;

    fn ctx(active: usize, waiting: usize) -> CollisionContext {
        let task_id = Uuid::new_v4();
        let active: Vec<_> = (0..active).map(|_| Uuid::new_v4()).collect();
        let waiting = (0..waiting)
            .map(|_| WaitingSlot::new(Uuid::new_v4(), task_id, 0))
            .collect();
        CollisionContext::new(1, active, waiting, Vec::new())
    }

    #[test]
    fn activates_up_to_threshold_in_order() {
        let spi = FifoQueueCollision::new(2);
        let mut ctx = ctx(0, 3);
        spi.on_collision(&mut ctx);
        let decisions: Vec<_> = ctx.waiting().iter().map(|s| s.decision()).collect();
        assert_eq!(
            decisions,
            vec![
                SlotDecision::Activate,
                SlotDecision::Activate,
                SlotDecision::Keep
            ]
        );
    }

    #[test]
    fn full_node_activates_nothing() {
        let spi = FifoQueueCollision::new(1);
        let mut ctx = ctx(1, 2);
        spi.on_collision(&mut ctx);
        assert!(ctx
            .waiting()
            .iter()
            .all(|s| s.decision() == SlotDecision::Keep));
    }

    #[test]
    fn rejects_beyond_wait_cap() {
        let spi = FifoQueueCollision::new(1).with_wait_jobs_cap(1);
        let mut ctx = ctx(1, 3);
        spi.on_collision(&mut ctx);
        let decisions: Vec<_> = ctx.waiting().iter().map(|s| s.decision()).collect();
        assert_eq!(
            decisions,
            vec![
                SlotDecision::Keep,
                SlotDecision::Reject,
                SlotDecision::Reject
            ]
        );
    }

    #[test]
    fn no_cap_keeps_everything_waiting() {
        let spi = FifoQueueCollision::new(0);
        let mut ctx = ctx(0, 2);
        spi.on_collision(&mut ctx);
        assert_eq!(ctx.kept_count(), 2);
    }
}
