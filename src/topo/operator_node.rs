use super::node::{NodeContext, Outputs};
use crate::checkpoint::StreamMessage;
use crate::metrics::NodeMetrics;
use crate::operators::{OpContext, Operator};
use crate::tuple::Data;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::trace;

/// One worker of a stateless operator node.
pub(crate) async fn run_operator_worker(
    ctx: NodeContext,
    op: Arc<dyn Operator>,
    op_ctx: OpContext,
    mut input: mpsc::Receiver<StreamMessage>,
    outputs: Outputs,
    metrics: Arc<NodeMetrics>,
) {
    loop {
        let message = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            m = input.recv() => match m {
                Some(m) => m,
                None => break,
            },
        };
        match message {
            StreamMessage::Data(data) => {
                metrics.record_in(data.record_count());
                let incoming_error = data.is_error();
                let started = Instant::now();
                let result = op.apply(&op_ctx, data);
                metrics.record_latency(started.elapsed());
                let Some(out) = result else {
                    continue;
                };
                if let Data::Error(e) = &out
                    && !incoming_error
                {
                    metrics.record_exception(e.clone());
                }
                metrics.record_out(out.record_count());
                outputs.data(out).await;
            }
            StreamMessage::Barrier(b) => {
                trace!(rule = %ctx.rule, origin = outputs.origin(), checkpoint_id = b.checkpoint_id, "forwarding barrier");
                outputs.barrier(b).await;
            }
        }
    }
}
