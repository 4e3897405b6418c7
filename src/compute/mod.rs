//! Task and job programming model.
//!
//! A task splits into jobs, each job executes on one node, and the task
//! reduces the collected results:
//!
//! - [`ComputeTask`]: `map` / `result` / `reduce` over a node topology
//! - [`ComputeJob`]: one unit of executable work with a cancel hook
//! - [`JobOutcome`]: what a job execution produced
//! - [`JobContext`]: the capabilities handed to a running job
//!
//! Jobs are composed from closures via [`job_fn`] or implemented directly.

pub mod job;
pub mod task;

pub use job::{job_fn, ComputeJob, FnJob, JobContext, JobFuture, JobOutcome};
pub use task::{default_result_policy, ComputeTask, NodeFilter, ResultPolicy, TaskOptions};
