use super::node::NodeContext;
use crate::checkpoint::{CheckpointBarrier, StreamMessage};
use crate::connector::{Delivery, Sink, SinkOptions};
use crate::error::{Error, Result};
use crate::metrics::NodeMetrics;
use crate::tuple::Data;
use crate::utils::origin;
use crate::value::{Message, Value};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// A result that could not be delivered yet.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CachedResult {
    records: Vec<Message>,
    delivery: Delivery,
}

/// Checkpointed part of a sink instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct SinkState {
    epoch: u64,
    cache: VecDeque<CachedResult>,
}

/// One instance of a sink node.
pub(crate) struct SinkWorker {
    pub name: String,
    pub instance: usize,
    pub connector: Box<dyn Sink>,
    pub options: SinkOptions,
    pub props: crate::connector::Properties,
    pub input: mpsc::Receiver<StreamMessage>,
    pub metrics: Arc<NodeMetrics>,
}

struct Progress {
    state: SinkState,
    sequence: u64,
}

impl SinkWorker {
    fn state_key(&self) -> String {
        format!("sink_{}", origin(&self.name, self.instance))
    }

    pub async fn run(mut self, ctx: NodeContext) {
        let node = format!("sink_{}", self.name);
        let mut progress = match self.start(&ctx).await {
            Ok(p) => p,
            Err(e) => {
                ctx.fail(&node, e);
                return;
            }
        };
        info!(rule = %ctx.rule, sink = %self.name, instance = self.instance, "sink started");

        loop {
            let message = tokio::select! {
                biased;
                () = ctx.cancel.cancelled() => break,
                m = self.input.recv() => match m {
                    Some(m) => m,
                    None => break,
                },
            };
            match message {
                StreamMessage::Data(data) => self.on_data(&ctx, &mut progress, data).await,
                StreamMessage::Barrier(b) => self.on_barrier(&ctx, &mut progress, b).await,
            }
        }

        if !progress.state.cache.is_empty() {
            warn!(rule = %ctx.rule, sink = %self.name, cached = progress.state.cache.len(), "sink stopped with undelivered results");
        }
        if let Err(e) = self.connector.close().await {
            warn!(rule = %ctx.rule, sink = %self.name, error = %e, "sink close failed");
        }
        debug!(rule = %ctx.rule, sink = %self.name, instance = self.instance, "sink stopped");
    }

    async fn start(&mut self, ctx: &NodeContext) -> Result<Progress> {
        self.connector.configure(&self.props).map_err(Error::Connector)?;
        self.connector.open().await.map_err(Error::Connector)?;
        let state = match ctx.store.get_op_state(&self.state_key())? {
            Some(bytes) => {
                let state: SinkState = postcard::from_bytes(&bytes)?;
                debug!(rule = %ctx.rule, sink = %self.name, epoch = state.epoch, cached = state.cache.len(), "sink state restored");
                state
            }
            None => SinkState::default(),
        };
        Ok(Progress { state, sequence: 0 })
    }

    async fn on_data(&mut self, ctx: &NodeContext, progress: &mut Progress, data: Data) {
        let records = match data {
            Data::Rows(rows) => rows,
            Data::Error(e) => {
                let mut m = Message::new();
                m.insert("error".to_string(), Value::String(e));
                vec![m]
            }
            Data::Tuple(t) => vec![t.message],
            other => {
                warn!(rule = %ctx.rule, sink = %self.name, kind = other.kind(), "sink received unprojected data");
                return;
            }
        };
        self.metrics.record_in(records.len());
        if records.is_empty() && self.options.omit_if_empty {
            return;
        }

        self.flush_cache(ctx, progress).await;
        let batches: Vec<Vec<Message>> = if self.options.send_single {
            records.into_iter().map(|r| vec![r]).collect()
        } else {
            vec![records]
        };
        for records in batches {
            let delivery = Delivery {
                instance: self.instance,
                epoch: progress.state.epoch,
                sequence: progress.sequence,
            };
            progress.sequence += 1;
            if let Err(e) = self.deliver(ctx, &records, delivery).await {
                self.metrics.record_exception(e.to_string());
                self.cache(ctx, progress, CachedResult { records, delivery });
            }
        }
    }

    async fn on_barrier(&mut self, ctx: &NodeContext, progress: &mut Progress, b: CheckpointBarrier) {
        self.flush_cache(ctx, progress).await;
        progress.state.epoch = b.checkpoint_id;
        progress.sequence = 0;
        let saved = postcard::to_allocvec(&progress.state)
            .map_err(Error::from)
            .and_then(|bytes| ctx.store.save_state(b.checkpoint_id, &self.state_key(), bytes));
        let node = origin(&self.name, self.instance);
        match saved {
            Ok(()) => ctx.ack(b.checkpoint_id, node),
            Err(e) => ctx.decline(b.checkpoint_id, &node, e.to_string()),
        }
    }

    /// Deliver with the configured retries.
    async fn deliver(&mut self, ctx: &NodeContext, records: &[Message], delivery: Delivery) -> anyhow::Result<()> {
        let mut attempt = 0;
        loop {
            let started = Instant::now();
            let result = self.connector.collect(records, delivery).await;
            self.metrics.record_latency(started.elapsed());
            match result {
                Ok(()) => {
                    self.metrics.record_out(records.len());
                    return Ok(());
                }
                Err(e) if attempt < self.options.retry_count => {
                    attempt += 1;
                    debug!(rule = %ctx.rule, sink = %self.name, attempt, error = %e, "sink delivery failed, retrying");
                    tokio::select! {
                        () = ctx.cancel.cancelled() => return Err(e),
                        () = tokio::time::sleep(Duration::from_millis(self.options.retry_interval)) => {}
                    }
                }
                Err(e) => {
                    warn!(rule = %ctx.rule, sink = %self.name, error = %e, "sink delivery failed, caching result");
                    return Err(e);
                }
            }
        }
    }

    fn cache(&self, ctx: &NodeContext, progress: &mut Progress, result: CachedResult) {
        if self.options.cache_length == 0 {
            return;
        }
        let cache = &mut progress.state.cache;
        while cache.len() >= self.options.cache_length {
            cache.pop_front();
            warn!(rule = %ctx.rule, sink = %self.name, "sink cache full, dropping oldest result");
        }
        cache.push_back(result);
    }

    /// Resend cached results in order, stopping at the first failure.
    async fn flush_cache(&mut self, ctx: &NodeContext, progress: &mut Progress) {
        while let Some(cached) = progress.state.cache.front() {
            let (records, delivery) = (cached.records.clone(), cached.delivery);
            if self.connector.collect(&records, delivery).await.is_err() {
                return;
            }
            self.metrics.record_out(records.len());
            progress.state.cache.pop_front();
            debug!(rule = %ctx.rule, sink = %self.name, remaining = progress.state.cache.len(), "cached result delivered");
        }
    }
}
