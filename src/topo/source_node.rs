use super::node::{NodeContext, Outputs};
use crate::catalog::StreamDefinition;
use crate::checkpoint::CheckpointBarrier;
use crate::connector::{Source, SourceRecord};
use crate::error::Error;
use crate::metrics::NodeMetrics;
use crate::tuple::{Data, Tuple};
use crate::utils::now_ms;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// State key of a source's read offset.
pub(crate) fn source_state_key(name: &str) -> String {
    format!("source_{name}")
}

pub(crate) struct SourceNode {
    pub name: String,
    pub stream: StreamDefinition,
    pub connector: Box<dyn Source>,
    pub barriers: mpsc::Receiver<CheckpointBarrier>,
    pub outputs: Outputs,
    pub metrics: Arc<NodeMetrics>,
}

impl SourceNode {
    /// Read records until cancelled. An exhausted source keeps running so
    /// barriers still flow through the rule.
    pub async fn run(mut self, ctx: NodeContext) {
        let node = format!("source_{}", self.name);
        if let Err(e) = self.start(&ctx).await {
            ctx.fail(&node, e);
            return;
        }
        info!(rule = %ctx.rule, source = %self.name, "source started");

        let mut exhausted = false;
        loop {
            tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break,
                Some(b) = self.barriers.recv() => self.on_barrier(&ctx, b).await,
                r = self.connector.next(), if !exhausted => match r {
                    Ok(Some(record)) => self.emit(record).await,
                    Ok(None) => {
                        debug!(rule = %ctx.rule, source = %self.name, "source exhausted");
                        exhausted = true;
                    }
                    Err(e) => {
                        self.metrics.record_exception(e.to_string());
                        ctx.fail(&node, Error::Connector(e));
                        break;
                    }
                },
            }
        }

        if let Err(e) = self.connector.close().await {
            warn!(rule = %ctx.rule, source = %self.name, error = %e, "source close failed");
        }
        debug!(rule = %ctx.rule, source = %self.name, "source stopped");
    }

    async fn start(&mut self, ctx: &NodeContext) -> crate::Result<()> {
        self.connector
            .configure(&self.stream.datasource, &self.stream.props)
            .map_err(Error::Connector)?;
        self.connector.open().await.map_err(Error::Connector)?;
        if let Some(offset) = ctx.store.get_op_state(&source_state_key(&self.name))? {
            match self.connector.rewind(&offset) {
                Ok(()) => info!(rule = %ctx.rule, source = %self.name, "source rewound to checkpointed offset"),
                Err(e) => warn!(rule = %ctx.rule, source = %self.name, error = %e, "source cannot rewind, reading from current position"),
            }
        }
        Ok(())
    }

    async fn on_barrier(&mut self, ctx: &NodeContext, b: CheckpointBarrier) {
        if let Some(offset) = self.connector.offset()
            && let Err(e) = ctx.store.save_state(b.checkpoint_id, &source_state_key(&self.name), offset)
        {
            ctx.decline(b.checkpoint_id, &self.name, e.to_string());
        }
        self.outputs.barrier(b).await;
    }

    async fn emit(&mut self, record: SourceRecord) {
        self.metrics.record_in(1);
        let ts = record.timestamp.unwrap_or_else(now_ms);
        let tuple = Tuple::new(self.name.clone(), record.message, ts).with_metadata(record.metadata);
        self.outputs.data(Data::Tuple(tuple)).await;
        self.metrics.record_out(1);
    }
}
