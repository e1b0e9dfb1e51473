//! Pieces shared by every node task: output fan-out, the per-rule runtime
//! context and the dispatcher that spreads one input queue over several
//! workers.

use crate::checkpoint::{
    AlignmentAction, BarrierAligner, BarrierHandler, BarrierTracker, CheckpointBarrier,
    CheckpointSignal, Envelope, StreamMessage,
};
use crate::config::Qos;
use crate::error::Error;
use crate::metrics::NodeMetrics;
use crate::state::StoreHandle;
use crate::tuple::Data;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// A node-fatal error reported on the topology error channel.
#[derive(Debug)]
pub struct NodeFailure {
    pub node: String,
    pub error: Error,
}

/// Everything a node task of one rule needs besides its own queues.
#[derive(Clone)]
pub(crate) struct NodeContext {
    pub rule: String,
    pub qos: Qos,
    pub store: StoreHandle,
    pub cancel: CancellationToken,
    pub errors: mpsc::UnboundedSender<NodeFailure>,
    pub signals: Option<mpsc::UnboundedSender<CheckpointSignal>>,
}

impl NodeContext {
    /// Report a node-fatal error. The topology cancels itself in response.
    pub fn fail(&self, node: &str, error: Error) {
        error!(rule = %self.rule, node, error = %error, "node failed");
        let _ = self.errors.send(NodeFailure {
            node: node.to_string(),
            error,
        });
    }

    pub fn ack(&self, checkpoint_id: u64, node: String) {
        if let Some(s) = &self.signals {
            let _ = s.send(CheckpointSignal::Ack { checkpoint_id, node });
        }
    }

    pub fn decline(&self, checkpoint_id: u64, node: &str, reason: String) {
        if let Some(s) = &self.signals {
            let _ = s.send(CheckpointSignal::Decline {
                checkpoint_id,
                node: node.to_string(),
                reason,
            });
        }
    }

    /// Barrier handling for a node fed by `inputs`.
    pub fn barrier_handler(&self, inputs: Vec<String>) -> BarrierHandler {
        match self.qos {
            Qos::ExactlyOnce => BarrierHandler::Aligned(BarrierAligner::new(inputs)),
            _ => BarrierHandler::Tracked(BarrierTracker::new(inputs)),
        }
    }
}

/// Spawn one task of `node`. A panic inside it is reported as a node
/// failure, which stops the rule.
pub(crate) fn spawn_node<F>(runtime: &Handle, ctx: &NodeContext, node: String, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let inner = runtime.spawn(task);
    let ctx = ctx.clone();
    runtime.spawn(async move {
        if let Err(e) = inner.await
            && e.is_panic()
        {
            ctx.fail(&node, Error::runtime(format!("node task panicked: {e}")));
        }
    })
}

/// Downstream queues of one node instance. Sending waits on every full queue
/// in turn, which is how backpressure reaches the sources.
#[derive(Clone, Debug)]
pub(crate) struct Outputs {
    origin: String,
    targets: Vec<mpsc::Sender<Envelope>>,
}

impl Outputs {
    pub fn new(origin: String, targets: Vec<mpsc::Sender<Envelope>>) -> Self {
        Self { origin, targets }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub async fn send(&self, message: StreamMessage) {
        for t in &self.targets {
            let env = Envelope {
                origin: self.origin.clone(),
                message: message.clone(),
            };
            if t.send(env).await.is_err() {
                debug!(origin = %self.origin, "downstream queue closed");
            }
        }
    }

    pub async fn data(&self, data: Data) {
        self.send(StreamMessage::Data(data)).await;
    }

    pub async fn barrier(&self, barrier: CheckpointBarrier) {
        self.send(StreamMessage::Barrier(barrier)).await;
    }
}

/// Reads a node's input queue, aligns barriers and hands data to workers
/// round robin. An aligned barrier goes to every worker so each forwards it
/// behind its own earlier data.
pub(crate) async fn dispatch(
    mut input: mpsc::Receiver<Envelope>,
    mut handler: BarrierHandler,
    workers: Vec<mpsc::Sender<StreamMessage>>,
    metrics: Arc<NodeMetrics>,
    cancel: CancellationToken,
) {
    let mut next = 0usize;
    loop {
        let env = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            env = input.recv() => match env {
                Some(env) => env,
                None => break,
            },
        };
        metrics.set_buffer_length(input.len());

        let mut queue = vec![(env.origin, env.message)];
        while let Some((origin, message)) = queue.pop() {
            match handler.process(&origin, message) {
                AlignmentAction::Forward(d) => {
                    if workers[next % workers.len()].send(StreamMessage::Data(d)).await.is_err() {
                        return;
                    }
                    next = next.wrapping_add(1);
                }
                AlignmentAction::Buffer => {}
                AlignmentAction::Aligned(b) => {
                    for w in &workers {
                        if w.send(StreamMessage::Barrier(b)).await.is_err() {
                            return;
                        }
                    }
                }
            }
            if let Some(buffered) = handler.drain_next() {
                queue.push(buffered);
            }
        }
    }
}
