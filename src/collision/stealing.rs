use crate::collision::{CollisionContext, CollisionSpi, SlotDecision};
use crate::config::{
    DFLT_ACTIVE_JOBS_THRESHOLD, DFLT_MAX_STEALING_ATTEMPTS, DFLT_WAIT_JOBS_THRESHOLD,
};

/// Job-stealing collision policy.
///
/// Activates waiting jobs FIFO up to the active threshold. Jobs still
/// waiting beyond the wait threshold are handed to pending thief nodes,
/// one job per steal request, newest first; a job that has already been
/// stolen `max_stealing_attempts` times stays put.
#[derive(Debug, Clone)]
pub struct JobStealingCollision {
    pub active_jobs_threshold: usize,
    pub wait_jobs_threshold: usize,
    pub max_stealing_attempts: u32,
}

impl Default for JobStealingCollision {
    fn default() -> Self {
        Self {
            active_jobs_threshold: DFLT_ACTIVE_JOBS_THRESHOLD,
            wait_jobs_threshold: DFLT_WAIT_JOBS_THRESHOLD,
            max_stealing_attempts: DFLT_MAX_STEALING_ATTEMPTS,
        }
    }
}

impl JobStealingCollision {
    pub fn new(active_jobs_threshold: usize, wait_jobs_threshold: usize) -> Self {
        Self {
            active_jobs_threshold,
            wait_jobs_threshold,
            max_stealing_attempts: DFLT_MAX_STEALING_ATTEMPTS,
        }
    }

    pub fn with_max_stealing_attempts(mut self, attempts: u32) -> Self {
        self.max_stealing_attempts = attempts;
        self
    }
}

impl CollisionSpi for JobStealingCollision {
    fn on_collision(&self, ctx: &mut CollisionContext) {
        let mut active = ctx.active_count();
        for slot in ctx.waiting_mut() {
            if active >= self.active_jobs_threshold {
                break;
            }
            slot.activate();
            active += 1;
        }

        let mut excess = ctx.kept_count().saturating_sub(self.wait_jobs_threshold);
        while excess > 0 {
            let Some(thief) = ctx.pop_steal_request() else {
                break;
            };
            let idx = ctx.waiting().iter().rposition(|s| {
                s.decision() == SlotDecision::Keep && s.steal_count() < self.max_stealing_attempts
            });
            match idx {
                Some(i) => {
                    ctx.waiting_mut()[i].steal_to(thief);
                    excess -= 1;
                }
                None => {
                    ctx.push_steal_request(thief);
                    break;
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

    fn slots(n: usize, steal_count: u32) -> Vec<WaitingSlot> {
        let task_id = Uuid::new_v4();
        (0..n)
            .map(|_| WaitingSlot::new(Uuid::new_v4(), task_id, steal_count))
            .collect()
    }

    #[test]
    fn two_passive_jobs_activate_one() {
        let spi = JobStealingCollision::new(1, 0);
        let mut ctx = CollisionContext::new(1, Vec::new(), slots(2, 0), Vec::new());
        spi.on_collision(&mut ctx);
        let decisions: Vec<_> = ctx.waiting().iter().map(|s| s.decision()).collect();
        assert_eq!(decisions[0], SlotDecision::Activate);
        // No steal request pending, so the excess job just waits.
        assert_eq!(decisions[1], SlotDecision::Keep);
    }

    #[test]
    fn one_active_keeps_passive_waiting() {
        let spi = JobStealingCollision::new(1, 0);
        let mut ctx = CollisionContext::new(1, vec![Uuid::new_v4()], slots(1, 0), Vec::new());
        spi.on_collision(&mut ctx);
        assert_eq!(ctx.waiting()[0].decision(), SlotDecision::Keep);
    }

    #[test]
    fn pending_thief_steals_excess_jobs() {
        let spi = JobStealingCollision::new(1, 0);
        let mut ctx = CollisionContext::new(1, Vec::new(), slots(3, 0), vec![7, 8]);
        spi.on_collision(&mut ctx);
        let decisions: Vec<_> = ctx.waiting().iter().map(|s| s.decision()).collect();
        assert_eq!(decisions[0], SlotDecision::Activate);
        // Two excess jobs, two thieves: newest handed off first.
        assert_eq!(decisions[2], SlotDecision::Steal(7));
        assert_eq!(decisions[1], SlotDecision::Steal(8));
        assert!(ctx.remaining_steal_requests().is_empty());
    }

    #[test]
    fn steal_respects_wait_threshold() {
        let spi = JobStealingCollision::new(0, 1);
        let mut ctx = CollisionContext::new(1, Vec::new(), slots(2, 0), vec![7, 8]);
        spi.on_collision(&mut ctx);
        let stolen = ctx
            .waiting()
            .iter()
            .filter(|s| matches!(s.decision(), SlotDecision::Steal(_)))
            .count();
        assert_eq!(stolen, 1);
        assert_eq!(ctx.remaining_steal_requests(), &[8]);
    }

    #[test]
    fn hop_cap_blocks_stealing() {
        let spi = JobStealingCollision::new(0, 0).with_max_stealing_attempts(1);
        let mut ctx = CollisionContext::new(1, Vec::new(), slots(1, 1), vec![7]);
        spi.on_collision(&mut ctx);
        assert_eq!(ctx.waiting()[0].decision(), SlotDecision::Keep);
        // Unconsumed request goes back to the queue.
        assert_eq!(ctx.remaining_steal_requests(), &[7]);
    }
}
