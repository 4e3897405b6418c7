//! Per-node execution runtime.
//!
//! Each logical cluster node runs one [`NodeRuntime`]:
//! - **Queueing**: incoming jobs wait until the collision policy
//!   activates them
//! - **Execution**: activated jobs run as spawned tasks with a
//!   cooperative cancellation token
//! - **Stealing**: idle steal-enabled nodes request work from peers and
//!   overloaded peers hand waiting jobs off
//!
//! The runtime owns no task-level state; results and hand-off notices go
//! back to the originating task loop over the request's reply channel.

pub mod runtime;

pub use runtime::NodeRuntime;
