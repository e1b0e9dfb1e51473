use super::node::{NodeContext, Outputs};
use crate::checkpoint::{AlignmentAction, BarrierHandler, CheckpointBarrier, Envelope};
use crate::error::Result;
use crate::metrics::NodeMetrics;
use crate::operators::window::{WindowOperator, WindowState};
use crate::tuple::{Data, WindowTuples};
use crate::utils::now_ms;
use crate::window::WindowConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// The stateful window node. Runs as a single instance; its state is part of
/// every checkpoint.
pub(crate) struct WindowNode {
    pub name: String,
    pub config: WindowConfig,
    pub input: mpsc::Receiver<Envelope>,
    pub handler: BarrierHandler,
    pub outputs: Outputs,
    pub metrics: Arc<NodeMetrics>,
}

impl WindowNode {
    pub async fn run(mut self, ctx: NodeContext) {
        let mut op = match self.restore(&ctx) {
            Ok(op) => op,
            Err(e) => {
                ctx.fail(&self.name, e);
                return;
            }
        };

        loop {
            let wait = op
                .next_deadline()
                .map(|d| Duration::from_millis(u64::try_from(d - now_ms()).unwrap_or(0)));
            let env = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break,
                env = self.input.recv() => match env {
                    Some(env) => env,
                    None => break,
                },
                () = tokio::time::sleep(wait.unwrap_or_default()), if wait.is_some() => {
                    let fired = op.on_tick(now_ms());
                    self.emit(fired).await;
                    continue;
                }
            };
            self.metrics.set_buffer_length(self.input.len());

            let mut queue = vec![(env.origin, env.message)];
            while let Some((origin, message)) = queue.pop() {
                match self.handler.process(&origin, message) {
                    AlignmentAction::Forward(Data::Tuple(t)) => {
                        self.metrics.record_in(1);
                        let started = Instant::now();
                        let fired = op.on_tuple(t, now_ms());
                        self.metrics.record_latency(started.elapsed());
                        self.emit(fired).await;
                    }
                    AlignmentAction::Forward(other) => {
                        self.metrics.record_in(other.record_count());
                        self.outputs.data(other).await;
                    }
                    AlignmentAction::Buffer => {}
                    AlignmentAction::Aligned(b) => self.snapshot(&ctx, &op, b).await,
                }
                if let Some(buffered) = self.handler.drain_next() {
                    queue.push(buffered);
                }
            }
        }
        debug!(rule = %ctx.rule, node = %self.name, buffered = op.state().buffer.len(), "window stopped");
    }

    fn restore(&self, ctx: &NodeContext) -> Result<WindowOperator> {
        match ctx.store.get_op_state(&self.name)? {
            Some(bytes) => {
                let state: WindowState = postcard::from_bytes(&bytes)?;
                info!(rule = %ctx.rule, node = %self.name, buffered = state.buffer.len(), "window state restored");
                Ok(WindowOperator::restore(self.config, state))
            }
            None => Ok(WindowOperator::new(self.config)),
        }
    }

    async fn snapshot(&self, ctx: &NodeContext, op: &WindowOperator, b: CheckpointBarrier) {
        let saved = postcard::to_allocvec(op.state())
            .map_err(crate::error::Error::from)
            .and_then(|bytes| ctx.store.save_state(b.checkpoint_id, &self.name, bytes));
        if let Err(e) = saved {
            warn!(rule = %ctx.rule, node = %self.name, checkpoint_id = b.checkpoint_id, error = %e, "window snapshot failed");
            ctx.decline(b.checkpoint_id, &self.name, e.to_string());
        }
        self.outputs.barrier(b).await;
    }

    async fn emit(&self, fired: Vec<WindowTuples>) {
        for w in fired {
            self.metrics.record_out(w.tuples.len());
            self.outputs.data(Data::Window(w)).await;
        }
    }
}
