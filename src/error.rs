use thiserror::Error;

/// Errors surfaced by the grid engine.
///
/// Cloneable because a task's terminal error is handed to every `get()`
/// caller and registered listener.
#[derive(Error, Debug, Clone)]
pub enum GridError {
    #[error("No nodes in topology: {0}")]
    Topology(String),

    #[error("Task mapping failed: {0}")]
    Mapping(String),

    #[error("Job failed on node {node_id}: {cause}")]
    JobFailed { node_id: u64, cause: String },

    #[error("Failover exhausted after {attempts} attempts: {cause}")]
    FailoverExhausted { attempts: u32, cause: String },

    #[error("Job rejected: {0}")]
    Rejected(String),

    #[error("Task timed out after {timeout_ms} ms")]
    TaskTimeout { timeout_ms: u64 },

    #[error("Task was cancelled")]
    TaskCancelled,

    #[error("Wait timed out")]
    WaitTimeout,

    #[error("Task session is closed")]
    SessionClosed,

    #[error("Node {0} is not reachable")]
    NodeUnreachable(u64),

    #[error("Reduce failed: {0}")]
    Reduce(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GridError {
    /// True for the cancellation-kind error, which is a distinct terminal
    /// state rather than an execution failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, GridError::TaskCancelled)
    }

    /// True for the timeout-kind error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GridError::TaskTimeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, GridError>;
