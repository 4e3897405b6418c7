//! Task-side scheduling: job descriptors, mapping and the per-task
//! control loop.

pub mod descriptor;
pub mod mapper;
pub mod run;

pub use descriptor::{JobDescriptor, JobResult, JobState};
pub use mapper::{spread_jobs, ContinuousMapper};
pub use run::TaskMsg;
