//! Grid orchestrator: wires node runtimes, topology, messaging and
//! events together and owns the task submission path.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::balancer::{LoadBalancer, RoundRobinBalancer};
use crate::collision::{CollisionSpi, FifoQueueCollision};
use crate::compute::task::{ComputeTask, TaskOptions};
use crate::config::{GridConfig, NodeConfig};
use crate::error::GridError;
use crate::events::{EventBus, GridEventKind};
use crate::failover::{AlwaysFailover, FailoverSpi};
use crate::future::{TaskCompleter, TaskFuture};
use crate::messaging::MessageBus;
use crate::scheduler::descriptor::JobDescriptor;
use crate::scheduler::mapper::ContinuousMapper;
use crate::scheduler::run::TaskRun;
use crate::session::{TaskId, TaskSession};
use crate::topology::{TopologyRegistry, TopologySnapshot};
use crate::worker::NodeRuntime;

/// Builds a [`Grid`] with its nodes and pluggable policies.
pub struct GridBuilder {
    config: GridConfig,
    nodes: Vec<NodeConfig>,
    collision: Arc<dyn CollisionSpi>,
    failover: Arc<dyn FailoverSpi>,
    balancer: Arc<dyn LoadBalancer>,
}

impl Default for GridBuilder {
    fn default() -> Self {
        Self {
            config: GridConfig::default(),
            nodes: Vec::new(),
            collision: Arc::new(FifoQueueCollision::default()),
            failover: Arc::new(AlwaysFailover::default()),
            balancer: Arc::new(RoundRobinBalancer::new()),
        }
    }
}

impl GridBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: GridConfig) -> Self {
        self.config = config;
        self
    }

    /// Add `count` nodes with default per-node configuration, ids 1..=count.
    pub fn with_nodes(mut self, count: u64) -> Self {
        for node_id in 1..=count {
            self.nodes.push(NodeConfig::new(node_id));
        }
        self
    }

    pub fn add_node(mut self, node: NodeConfig) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn with_collision_spi(mut self, spi: impl CollisionSpi) -> Self {
        self.collision = Arc::new(spi);
        self
    }

    pub fn with_failover_spi(mut self, spi: impl FailoverSpi) -> Self {
        self.failover = Arc::new(spi);
        self
    }

    pub fn with_balancer(mut self, balancer: impl LoadBalancer) -> Self {
        self.balancer = Arc::new(balancer);
        self
    }

    /// Start every node runtime and hand back the grid.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(self) -> Grid {
        let topology = Arc::new(TopologyRegistry::new());
        let bus = Arc::new(MessageBus::new());
        let events = EventBus::new(self.config.event_capacity);
        let shutdown = CancellationToken::new();

        // Register every node before the first runtime starts, so early
        // steal broadcasts already see the whole cluster.
        let mut inboxes = Vec::with_capacity(self.nodes.len());
        for node_config in self.nodes {
            let inbox = bus.register(node_config.node_id);
            topology.register(node_config.node_id);
            inboxes.push((node_config, inbox));
        }

        let mut runtimes = Vec::with_capacity(inboxes.len());
        for (node_config, inbox) in inboxes {
            let (runtime, done_rx) = NodeRuntime::new(
                node_config,
                self.collision.clone(),
                bus.clone(),
                events.clone(),
                shutdown.child_token(),
            );
            runtimes.push(tokio::spawn(runtime.run(inbox, done_rx)));
        }

        Grid {
            config: self.config,
            topology,
            bus,
            events,
            failover: self.failover,
            balancer: self.balancer,
            shutdown,
            runtimes,
        }
    }
}

/// A running grid of logical nodes.
pub struct Grid {
    config: GridConfig,
    topology: Arc<TopologyRegistry>,
    bus: Arc<MessageBus>,
    events: EventBus,
    failover: Arc<dyn FailoverSpi>,
    balancer: Arc<dyn LoadBalancer>,
    shutdown: CancellationToken,
    runtimes: Vec<JoinHandle<()>>,
}

impl Grid {
    pub fn builder() -> GridBuilder {
        GridBuilder::new()
    }

    /// Current cluster membership view.
    pub fn topology(&self) -> TopologySnapshot {
        self.topology.snapshot()
    }

    /// Lifecycle event bus; subscribe before submitting to observe a
    /// task's full event sequence.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Submit a task with default options.
    pub fn submit<T: ComputeTask>(&self, task: T, arg: Option<Value>) -> TaskFuture<T::Output> {
        self.submit_with(task, arg, TaskOptions::default())
    }

    /// Submit a task: snapshot the topology, apply the projection, map
    /// the task into jobs and spawn its control loop. Mapping failures
    /// and an empty projection fail the returned future synchronously,
    /// before any job is created or dispatched.
    pub fn submit_with<T: ComputeTask>(
        &self,
        task: T,
        arg: Option<Value>,
        mut options: TaskOptions,
    ) -> TaskFuture<T::Output> {
        let task_id = Uuid::new_v4();
        let task_name = options
            .name
            .clone()
            .unwrap_or_else(|| std::any::type_name::<T>().to_string());
        if options.timeout.is_none() {
            options.timeout = self.config.default_task_timeout;
        }

        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        let (future, completer) = TaskFuture::new(task_id, ctl_tx.clone());

        self.events
            .publish(GridEventKind::TaskStarted, task_id, None, None);

        let snapshot = self.topology.snapshot();
        let candidates = options.project(&snapshot.nodes);
        tracing::info!(
            task_id = %task_id,
            task = %task_name,
            nodes = candidates.len(),
            "Task submitted"
        );
        if candidates.is_empty() {
            return self.fail_submission(
                task_id,
                None,
                completer,
                future,
                GridError::Topology("no candidate nodes for task".into()),
            );
        }

        let session = Arc::new(TaskSession::new(task_id, task_name.clone(), snapshot.version));
        let mapper = ContinuousMapper::new(
            session.clone(),
            ctl_tx.clone(),
            self.balancer.clone(),
            candidates.clone(),
        );

        let task = Arc::new(task);
        let mapped = match task.map(&candidates, arg, &mapper) {
            Ok(mapped) => mapped,
            Err(err) => {
                return self.fail_submission(task_id, Some(&session), completer, future, err)
            }
        };
        if mapped.is_empty() && mapper.pending_sends() == 0 {
            return self.fail_submission(
                task_id,
                Some(&session),
                completer,
                future,
                GridError::Mapping("task mapped no jobs".into()),
            );
        }

        // Register every sibling before the first dispatch.
        let mut jobs = HashMap::with_capacity(mapped.len());
        let mut initial_order = Vec::with_capacity(mapped.len());
        for (job, target) in mapped {
            if !candidates.contains(&target) {
                return self.fail_submission(
                    task_id,
                    Some(&session),
                    completer,
                    future,
                    GridError::Mapping(format!("job mapped to node {} outside topology", target)),
                );
            }
            let descriptor = JobDescriptor::new(task_id, job, target);
            session.add_sibling(descriptor.id);
            self.events.publish(
                GridEventKind::JobMapped,
                task_id,
                Some(descriptor.id),
                Some(target),
            );
            initial_order.push(descriptor.id);
            jobs.insert(descriptor.id, descriptor);
        }

        let run = TaskRun {
            task,
            task_id,
            task_name,
            session,
            options,
            candidates,
            config: self.config.clone(),
            bus: self.bus.clone(),
            events: self.events.clone(),
            failover_spi: self.failover.clone(),
            jobs,
            initial_order,
            pending_sends: mapper.pending_handle(),
            received: Vec::new(),
            ctl_tx,
        };
        tokio::spawn(run.run(ctl_rx, completer));

        future
    }

    fn fail_submission<R: Clone + Send + 'static>(
        &self,
        task_id: TaskId,
        session: Option<&TaskSession>,
        completer: TaskCompleter<R>,
        future: TaskFuture<R>,
        err: GridError,
    ) -> TaskFuture<R> {
        if let Some(session) = session {
            session.close();
        }
        tracing::warn!(task_id = %task_id, error = %err, "Task failed at submission");
        self.events
            .publish(GridEventKind::TaskFailed, task_id, None, None);
        completer.complete(Err(err));
        future
    }

    /// Stop every node runtime and wait for them to drain.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for handle in self.runtimes {
            let _ = handle.await;
        }
    }
}
