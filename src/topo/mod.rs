//! Running operator graph of one rule.
//!
//! A [`Topology`] moves through `Idle -> Open -> Cancelled`. Opening:
//!
//! 1. opens (and recovers) the rule's state store,
//! 2. builds the checkpoint coordinator when the delivery guarantee needs one,
//! 3. starts every sink node, then every operator node, then every source
//!    node, so consumers exist before producers emit,
//! 4. activates the coordinator.
//!
//! Every node owns a bounded input queue. Nodes with several instances read
//! their queue through a dispatcher that aligns barriers and hands data to the
//! workers; ordering is only kept per worker. One cancellation token is shared
//! by all node tasks, and a node-fatal error cancels it.

mod builder;
mod node;
mod operator_node;
mod sink_node;
mod source_node;
mod window_node;

pub use builder::TopologyBuilder;
pub use node::NodeFailure;

use crate::catalog::StreamDefinition;
use crate::checkpoint::{CheckpointCoordinator, CheckpointStats, CoordinatorHandle, Envelope};
use crate::config::RuleOptions;
use crate::connector::{Properties, Sink, SinkOptions, Source};
use crate::error::{Error, Result};
use crate::metrics::{MetricsCollector, NodeRole};
use crate::operators::{OpContext, Operator};
use crate::state::StoreFactory;
use crate::utils::origin;
use crate::window::WindowConfig;
use indexmap::IndexMap;
use node::{NodeContext, Outputs, dispatch, spawn_node};
use operator_node::run_operator_worker;
use parking_lot::Mutex;
use serde::Serialize;
use sink_node::SinkWorker;
use source_node::SourceNode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use window_node::WindowNode;

/// Lifecycle state of a topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopologyState {
    Idle,
    Open,
    Cancelled,
}

/// DAG description of a rule: source node names and the downstream nodes of
/// every node, each prefixed with its role (`source_`, `op_`, `sink_`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopoGraph {
    pub sources: Vec<String>,
    pub edges: IndexMap<String, Vec<String>>,
}

pub(crate) struct SourceBlueprint {
    pub name: String,
    pub stream: StreamDefinition,
    pub connector: Box<dyn Source>,
}

pub(crate) enum OpKind {
    Stateless(Arc<dyn Operator>),
    Window(WindowConfig),
}

pub(crate) struct OpBlueprint {
    pub name: String,
    pub kind: OpKind,
    pub concurrency: usize,
}

pub(crate) struct SinkBlueprint {
    pub name: String,
    pub options: SinkOptions,
    pub props: Properties,
    pub connectors: Vec<Box<dyn Sink>>,
}

/// Nodes waiting to be started.
pub(crate) struct Blueprint {
    pub sources: Vec<SourceBlueprint>,
    /// One per source, in source order.
    pub preprocess: Vec<OpBlueprint>,
    pub chain: Vec<OpBlueprint>,
    pub sinks: Vec<SinkBlueprint>,
}

struct Inner {
    state: TopologyState,
    blueprint: Option<Blueprint>,
    tasks: Vec<JoinHandle<()>>,
    coordinator: Option<CoordinatorHandle>,
}

/// The running graph of one rule.
pub struct Topology {
    rule: String,
    options: RuleOptions,
    stores: Arc<StoreFactory>,
    graph: TopoGraph,
    metrics: MetricsCollector,
    cancel: CancellationToken,
    failure: Arc<Mutex<Option<String>>>,
    inner: Mutex<Inner>,
}

impl Topology {
    pub(crate) fn new(
        rule: String,
        options: RuleOptions,
        stores: Arc<StoreFactory>,
        graph: TopoGraph,
        blueprint: Blueprint,
    ) -> Self {
        Self {
            rule,
            options,
            stores,
            graph,
            metrics: MetricsCollector::new(),
            cancel: CancellationToken::new(),
            failure: Arc::new(Mutex::new(None)),
            inner: Mutex::new(Inner {
                state: TopologyState::Idle,
                blueprint: Some(blueprint),
                tasks: Vec::new(),
                coordinator: None,
            }),
        }
    }

    #[must_use]
    pub fn rule(&self) -> &str {
        &self.rule
    }

    #[must_use]
    pub fn state(&self) -> TopologyState {
        self.inner.lock().state
    }

    /// Open and running, with no node failure.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == TopologyState::Open && !self.cancel.is_cancelled()
    }

    /// First node-fatal error, if one stopped the topology.
    #[must_use]
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    #[must_use]
    pub fn graph(&self) -> &TopoGraph {
        &self.graph
    }

    /// Cumulative metrics of every node instance.
    #[must_use]
    pub fn metrics(&self) -> serde_json::Map<String, serde_json::Value> {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn metrics_collector(&self) -> &MetricsCollector {
        &self.metrics
    }

    #[must_use]
    pub fn checkpoint_stats(&self) -> Option<Arc<CheckpointStats>> {
        self.inner
            .lock()
            .coordinator
            .as_ref()
            .map(|c| Arc::clone(c.stats()))
    }

    /// Run a checkpoint now and wait for its commit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for rules without checkpointing, and the
    /// coordinator's error when the checkpoint aborts.
    pub async fn checkpoint_now(&self) -> Result<u64> {
        let handle = self.inner.lock().coordinator.clone();
        match handle {
            Some(h) => h.trigger().await,
            None => Err(Error::config(format!(
                "rule {} does not checkpoint while open with qos {}",
                self.rule,
                u8::from(self.options.qos)
            ))),
        }
    }

    /// Start every node. Opening an open topology does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] outside a tokio runtime or after the
    /// topology was cancelled, and [`Error::Store`] when the state store
    /// cannot be opened.
    pub fn open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            TopologyState::Open => return Ok(()),
            TopologyState::Cancelled => {
                return Err(Error::runtime(format!(
                    "topology of rule {} is cancelled and cannot reopen",
                    self.rule
                )));
            }
            TopologyState::Idle => {}
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::runtime(format!("no async runtime: {e}")))?;
        let store = self.stores.open(&self.rule, self.options.qos)?;
        let Some(blueprint) = inner.blueprint.take() else {
            return Err(Error::runtime("topology has no nodes to start"));
        };

        let Blueprint {
            sources,
            preprocess,
            chain,
            sinks,
        } = blueprint;
        let cap = self.options.buffer_length;

        let (err_tx, mut err_rx) = mpsc::unbounded_channel::<NodeFailure>();
        let mut barrier_txs = Vec::new();
        let mut barrier_rxs = Vec::new();
        for _ in &sources {
            let (tx, rx) = mpsc::channel(16);
            barrier_txs.push(tx);
            barrier_rxs.push(rx);
        }
        let sink_ids: Vec<String> = sinks
            .iter()
            .flat_map(|s| (0..s.connectors.len()).map(|i| origin(&s.name, i)))
            .collect();
        let coordinator = if self.options.qos.needs_checkpoint() {
            let (c, handle) = CheckpointCoordinator::new(
                self.rule.clone(),
                self.options.checkpoint_period(),
                store.clone(),
                barrier_txs,
                sink_ids,
            );
            Some((c, handle))
        } else {
            None
        };
        let ctx = NodeContext {
            rule: self.rule.clone(),
            qos: self.options.qos,
            store,
            cancel: self.cancel.clone(),
            errors: err_tx,
            signals: coordinator.as_ref().map(|(_, h)| h.signals()),
        };

        let mut tasks = Vec::new();
        let failure = Arc::clone(&self.failure);
        let cancel = self.cancel.clone();
        let rule = self.rule.clone();
        tasks.push(runtime.spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                Some(f) = err_rx.recv() => {
                    warn!(rule = %rule, node = %f.node, error = %f.error, "stopping rule after node failure");
                    failure.lock().get_or_insert_with(|| f.error.to_string());
                    cancel.cancel();
                }
            }
        }));

        // input queues: chain nodes and sinks
        let mut chain_inputs = Vec::new();
        for _ in &chain {
            chain_inputs.push(mpsc::channel::<Envelope>(cap));
        }
        let mut sink_inputs = Vec::new();
        for _ in &sinks {
            sink_inputs.push(mpsc::channel::<Envelope>(cap));
        }
        let sink_txs: Vec<mpsc::Sender<Envelope>> = sink_inputs.iter().map(|(tx, _)| tx.clone()).collect();
        let chain_txs: Vec<mpsc::Sender<Envelope>> = chain_inputs.iter().map(|(tx, _)| tx.clone()).collect();

        // wire the chain before spawning so sinks know their upstream origins
        let pre_origins: Vec<String> = preprocess
            .iter()
            .flat_map(|p| (0..p.concurrency).map(|i| origin(&format!("op_{}", p.name), i)))
            .collect();
        let mut upstream = pre_origins;
        let mut wiring = Vec::new();
        let chain_rxs = chain_inputs.into_iter().map(|(_, rx)| rx);
        for (idx, (op, rx)) in chain.into_iter().zip(chain_rxs).enumerate() {
            let targets = chain_txs
                .get(idx + 1)
                .map_or_else(|| sink_txs.clone(), |tx| vec![tx.clone()]);
            let own = (0..op.concurrency)
                .map(|i| origin(&format!("op_{}", op.name), i))
                .collect();
            let inputs = std::mem::replace(&mut upstream, own);
            wiring.push((op, rx, inputs, targets));
        }

        for (sink, (_, rx)) in sinks.into_iter().zip(sink_inputs) {
            let sink_node = format!("sink_{}", sink.name);
            let handler = ctx.barrier_handler(upstream.clone());
            let mut worker_txs = Vec::new();
            let mut first_metrics = None;
            for (i, connector) in sink.connectors.into_iter().enumerate() {
                let (tx, wrx) = mpsc::channel(cap);
                worker_txs.push(tx);
                let metrics = self.metrics.register(NodeRole::Sink, &sink.name, i);
                first_metrics.get_or_insert_with(|| Arc::clone(&metrics));
                let worker = SinkWorker {
                    name: sink.name.clone(),
                    instance: i,
                    connector,
                    options: sink.options.clone(),
                    props: sink.props.clone(),
                    input: wrx,
                    metrics,
                };
                tasks.push(spawn_node(&runtime, &ctx, sink_node.clone(), worker.run(ctx.clone())));
            }
            if let Some(m) = first_metrics {
                let dispatcher = dispatch(rx, handler, worker_txs, m, self.cancel.clone());
                tasks.push(spawn_node(&runtime, &ctx, sink_node, dispatcher));
            }
        }

        // downstream first
        for (op, rx, inputs, targets) in wiring.into_iter().rev() {
            self.spawn_op(&runtime, &ctx, op, rx, inputs, targets, &mut tasks);
        }

        let first_targets = if chain_txs.is_empty() { sink_txs } else { vec![chain_txs[0].clone()] };
        let mut source_outputs = Vec::new();
        for (pre, src) in preprocess.into_iter().zip(&sources) {
            let (tx, rx) = mpsc::channel(cap);
            source_outputs.push(tx);
            let inputs = vec![origin(&format!("source_{}", src.name), 0)];
            self.spawn_op(&runtime, &ctx, pre, rx, inputs, first_targets.clone(), &mut tasks);
        }

        for ((src, barriers), out) in sources.into_iter().zip(barrier_rxs).zip(source_outputs) {
            let node_id = format!("source_{}", src.name);
            let node = SourceNode {
                metrics: self.metrics.register(NodeRole::Source, &src.name, 0),
                outputs: Outputs::new(origin(&format!("source_{}", src.name), 0), vec![out]),
                name: src.name,
                stream: src.stream,
                connector: src.connector,
                barriers,
            };
            tasks.push(spawn_node(&runtime, &ctx, node_id, node.run(ctx.clone())));
        }

        if let Some((c, handle)) = coordinator {
            tasks.push(runtime.spawn(c.run(self.cancel.clone())));
            inner.coordinator = Some(handle);
        }
        inner.tasks = tasks;
        inner.state = TopologyState::Open;
        info!(rule = %self.rule, qos = u8::from(self.options.qos), "topology opened");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_op(
        &self,
        runtime: &tokio::runtime::Handle,
        ctx: &NodeContext,
        op: OpBlueprint,
        rx: mpsc::Receiver<Envelope>,
        inputs: Vec<String>,
        targets: Vec<mpsc::Sender<Envelope>>,
        tasks: &mut Vec<JoinHandle<()>>,
    ) {
        let handler = ctx.barrier_handler(inputs);
        let node_id = format!("op_{}", op.name);
        match op.kind {
            OpKind::Window(config) => {
                let node = WindowNode {
                    name: op.name.clone(),
                    config,
                    input: rx,
                    handler,
                    outputs: Outputs::new(origin(&node_id, 0), targets),
                    metrics: self.metrics.register(NodeRole::Operator, &op.name, 0),
                };
                tasks.push(spawn_node(runtime, ctx, node_id, node.run(ctx.clone())));
            }
            OpKind::Stateless(operator) => {
                let mut worker_txs = Vec::new();
                let mut first_metrics = None;
                for i in 0..op.concurrency {
                    let (tx, wrx) = mpsc::channel(self.options.buffer_length);
                    worker_txs.push(tx);
                    let metrics = self.metrics.register(NodeRole::Operator, &op.name, i);
                    first_metrics.get_or_insert_with(|| Arc::clone(&metrics));
                    let worker = run_operator_worker(
                        ctx.clone(),
                        Arc::clone(&operator),
                        OpContext::new(self.rule.clone(), op.name.clone(), i),
                        wrx,
                        Outputs::new(origin(&node_id, i), targets.clone()),
                        metrics,
                    );
                    tasks.push(spawn_node(runtime, ctx, node_id.clone(), worker));
                }
                if let Some(m) = first_metrics {
                    let dispatcher = dispatch(rx, handler, worker_txs, m, self.cancel.clone());
                    tasks.push(spawn_node(runtime, ctx, node_id, dispatcher));
                }
            }
        }
    }

    /// Signal every node to stop. Safe to call repeatedly and concurrently
    /// with an in-flight checkpoint, which is abandoned.
    pub fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.state != TopologyState::Cancelled {
            debug!(rule = %self.rule, "cancelling topology");
            inner.state = TopologyState::Cancelled;
        }
        inner.coordinator = None;
        self.cancel.cancel();
    }

    /// Cancel and wait until every node task has exited and released its
    /// connectors and the state store.
    pub async fn close(&self) {
        self.cancel();
        let tasks = std::mem::take(&mut self.inner.lock().tasks);
        for t in tasks {
            if let Err(e) = t.await {
                warn!(rule = %self.rule, error = %e, "node task ended abnormally");
            }
        }
        info!(rule = %self.rule, "topology closed");
    }
}

impl Drop for Topology {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Topology {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topology")
            .field("rule", &self.rule)
            .field("state", &self.state())
            .field("graph", &self.graph)
            .finish()
    }
}
