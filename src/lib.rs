//! gridlite — a distributed compute-grid core.
//!
//! A task is submitted once, split into jobs mapped onto cluster nodes,
//! scheduled per node by a pluggable collision policy (with job stealing
//! between idle and overloaded nodes), failed over to alternate nodes on
//! failure, and reduced into a single result exposed through a
//! [`TaskFuture`].
//!
//! Logical nodes run inside one process and communicate through an
//! in-process message bus; discovery, wire transport and storage are
//! external collaborators behind narrow seams.

pub mod balancer;
pub mod collision;
pub mod compute;
pub mod config;
pub mod error;
pub mod events;
pub mod failover;
pub mod future;
pub mod grid;
pub mod messaging;
pub mod scheduler;
pub mod session;
pub mod topology;
pub mod worker;

pub use compute::{job_fn, ComputeJob, ComputeTask, JobContext, JobOutcome, ResultPolicy, TaskOptions};
pub use config::{GridConfig, NodeConfig};
pub use error::{GridError, Result};
pub use events::{GridEvent, GridEventKind};
pub use future::TaskFuture;
pub use grid::{Grid, GridBuilder};
pub use scheduler::{spread_jobs, JobResult, JobState};
pub use session::TaskSession;
pub use topology::{NodeId, TopologySnapshot};
