use std::time::Duration;

/// Default maximum number of failover attempts per job.
pub const DFLT_MAX_FAILOVER_ATTEMPTS: u32 = 5;

/// Default number of jobs a node runs concurrently.
pub const DFLT_ACTIVE_JOBS_THRESHOLD: usize = 8;

/// Default number of waiting jobs a node holds before peers may steal.
pub const DFLT_WAIT_JOBS_THRESHOLD: usize = 4;

/// Default maximum times a single job may be stolen.
pub const DFLT_MAX_STEALING_ATTEMPTS: u32 = 5;

/// Per-node scheduling knobs.
///
/// The thresholds feed the node's collision policy: up to
/// `active_jobs_threshold` jobs run concurrently, the rest wait; waiting
/// jobs beyond `wait_jobs_threshold` are eligible for stealing by idle
/// peers when `steal_enabled` is set.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: u64,
    pub active_jobs_threshold: usize,
    pub wait_jobs_threshold: usize,
    pub steal_enabled: bool,
}

impl NodeConfig {
    pub fn new(node_id: u64) -> Self {
        Self {
            node_id,
            active_jobs_threshold: DFLT_ACTIVE_JOBS_THRESHOLD,
            wait_jobs_threshold: DFLT_WAIT_JOBS_THRESHOLD,
            steal_enabled: false,
        }
    }

    pub fn with_active_jobs_threshold(mut self, threshold: usize) -> Self {
        self.active_jobs_threshold = threshold;
        self
    }

    pub fn with_wait_jobs_threshold(mut self, threshold: usize) -> Self {
        self.wait_jobs_threshold = threshold;
        self
    }

    pub fn with_stealing(mut self, enabled: bool) -> Self {
        self.steal_enabled = enabled;
        self
    }
}

/// Grid-wide engine configuration.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Ceiling on failover attempts before a job failure becomes fatal.
    pub max_failover_attempts: u32,
    /// Applied to tasks submitted without an explicit timeout.
    pub default_task_timeout: Option<Duration>,
    /// How long a cancelled task waits for its jobs to acknowledge before
    /// it is marked cancelled regardless.
    pub cancel_ack_timeout: Duration,
    /// Capacity of the lifecycle event channel.
    pub event_capacity: usize,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_failover_attempts: DFLT_MAX_FAILOVER_ATTEMPTS,
            default_task_timeout: None,
            cancel_ack_timeout: Duration::from_millis(500),
            event_capacity: 1024,
        }
    }
}

impl GridConfig {
    pub fn with_max_failover_attempts(mut self, attempts: u32) -> Self {
        self.max_failover_attempts = attempts;
        self
    }

    pub fn with_default_task_timeout(mut self, timeout: Duration) -> Self {
        self.default_task_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_ack_timeout(mut self, timeout: Duration) -> Self {
        self.cancel_ack_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_config_defaults() {
        let cfg = NodeConfig::new(3);
        assert_eq!(cfg.node_id, 3);
        assert_eq!(cfg.active_jobs_threshold, DFLT_ACTIVE_JOBS_THRESHOLD);
        assert_eq!(cfg.wait_jobs_threshold, DFLT_WAIT_JOBS_THRESHOLD);
        assert!(!cfg.steal_enabled);
    }

    #[test]
    fn node_config_builders() {
        let cfg = NodeConfig::new(1)
            .with_active_jobs_threshold(1)
            .with_wait_jobs_threshold(0)
            .with_stealing(true);
        assert_eq!(cfg.active_jobs_threshold, 1);
        assert_eq!(cfg.wait_jobs_threshold, 0);
        assert!(cfg.steal_enabled);
    }

    #[test]
    fn grid_config_defaults() {
        let cfg = GridConfig::default();
        assert_eq!(cfg.max_failover_attempts, DFLT_MAX_FAILOVER_ATTEMPTS);
        assert!(cfg.default_task_timeout.is_none());
        assert_eq!(cfg.cancel_ack_timeout, Duration::from_millis(500));
    }

    #[test]
    fn grid_config_builders() {
        let cfg = GridConfig::default()
            .with_max_failover_attempts(2)
            .with_default_task_timeout(Duration::from_secs(30))
            .with_cancel_ack_timeout(Duration::from_millis(100));
        assert_eq!(cfg.max_failover_attempts, 2);
        assert_eq!(cfg.default_task_timeout, Some(Duration::from_secs(30)));
        assert_eq!(cfg.cancel_ack_timeout, Duration::from_millis(100));
    }
}
