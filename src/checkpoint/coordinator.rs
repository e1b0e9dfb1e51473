//! Periodic checkpoint coordinator of one rule.
//!
//! ## Checkpoint cycle
//!
//! 1. On each tick the coordinator assigns the next checkpoint id and sends a
//!    [`CheckpointBarrier`] to every source node.
//! 2. Sources snapshot their offsets and emit the barrier in-band.
//! 3. Stateful nodes snapshot once the barrier arrived on all inputs.
//! 4. Every sink instance acknowledges; the coordinator then commits the
//!    staged states with [`StateStore::save_checkpoint`](crate::state::StateStore::save_checkpoint).
//! 5. A decline, a failed commit, or a newer tick aborts the pending
//!    checkpoint. The previous committed checkpoint stays the recovery point.
//!
//! At most one checkpoint is pending at a time.

use super::barrier::CheckpointBarrier;
use crate::error::{Error, Result};
use crate::state::StoreHandle;
use crate::utils::now_ms;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Report of a sink instance (or a failing node) about a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointSignal {
    Ack { checkpoint_id: u64, node: String },
    Decline { checkpoint_id: u64, node: String, reason: String },
}

#[derive(Debug)]
enum Command {
    Trigger(oneshot::Sender<Result<u64>>),
}

/// Counters shared between the coordinator task and status queries.
#[derive(Debug, Default)]
pub struct CheckpointStats {
    completed: AtomicU64,
    aborted: AtomicU64,
    last_completed_id: AtomicU64,
    last_duration_ms: AtomicU64,
}

impl CheckpointStats {
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn aborted(&self) -> u64 {
        self.aborted.load(Ordering::Relaxed)
    }

    /// Id of the last committed checkpoint, if any completed in this run.
    #[must_use]
    pub fn last_completed_id(&self) -> Option<u64> {
        match self.last_completed_id.load(Ordering::Relaxed) {
            0 => None,
            id => Some(id),
        }
    }

    #[must_use]
    pub fn last_duration(&self) -> Duration {
        Duration::from_millis(self.last_duration_ms.load(Ordering::Relaxed))
    }
}

/// Cloneable access to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::Sender<Command>,
    signals: mpsc::UnboundedSender<CheckpointSignal>,
    stats: Arc<CheckpointStats>,
}

impl CoordinatorHandle {
    /// Channel on which nodes report acks and declines.
    #[must_use]
    pub fn signals(&self) -> mpsc::UnboundedSender<CheckpointSignal> {
        self.signals.clone()
    }

    #[must_use]
    pub fn stats(&self) -> &Arc<CheckpointStats> {
        &self.stats
    }

    /// Start a checkpoint now and wait until it commits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] when the checkpoint is aborted and
    /// [`Error::Cancelled`] when the coordinator is no longer running.
    pub async fn trigger(&self) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Trigger(tx))
            .await
            .map_err(|_| Error::Cancelled)?;
        rx.await.map_err(|_| Error::Cancelled)?
    }
}

struct Pending {
    id: u64,
    acked: BTreeSet<String>,
    started: Instant,
    waiters: Vec<oneshot::Sender<Result<u64>>>,
}

/// Drives barrier injection and commits for one rule.
pub struct CheckpointCoordinator {
    rule: String,
    interval: Duration,
    store: StoreHandle,
    sources: Vec<mpsc::Sender<CheckpointBarrier>>,
    sinks: BTreeSet<String>,
    commands: mpsc::Receiver<Command>,
    signals: mpsc::UnboundedReceiver<CheckpointSignal>,
    stats: Arc<CheckpointStats>,
    last_id: u64,
    pending: Option<Pending>,
}

impl CheckpointCoordinator {
    /// Create a coordinator and its handle. `sinks` are the origins
    /// (`<sink>_<instance>`) whose acks complete a checkpoint.
    #[must_use]
    pub fn new(
        rule: impl Into<String>,
        interval: Duration,
        store: StoreHandle,
        sources: Vec<mpsc::Sender<CheckpointBarrier>>,
        sinks: impl IntoIterator<Item = String>,
    ) -> (Self, CoordinatorHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(CheckpointStats::default());
        let last_id = store.latest_checkpoint_id().unwrap_or(0);
        let handle = CoordinatorHandle {
            commands: cmd_tx,
            signals: sig_tx,
            stats: Arc::clone(&stats),
        };
        let coordinator = Self {
            rule: rule.into(),
            interval,
            store,
            sources,
            sinks: sinks.into_iter().collect(),
            commands: cmd_rx,
            signals: sig_rx,
            stats,
            last_id,
            pending: None,
        };
        (coordinator, handle)
    }

    /// Next id: wall-clock milliseconds, bumped past the last assigned id so
    /// ids keep increasing across restarts and clock skew.
    fn next_id(&mut self) -> u64 {
        let now = u64::try_from(now_ms()).unwrap_or(0);
        self.last_id = now.max(self.last_id + 1);
        self.last_id
    }

    /// Run until `cancel` fires. A checkpoint still pending then is abandoned
    /// without a commit.
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = interval_at(tokio::time::Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(rule = %self.rule, interval_ms = self.interval.as_millis() as u64, "checkpoint coordinator activated");

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(signal) = self.signals.recv() => self.on_signal(signal),
                Some(Command::Trigger(tx)) = self.commands.recv() => {
                    self.start_checkpoint(Some(tx)).await;
                }
                _ = ticker.tick() => self.start_checkpoint(None).await,
            }
        }

        if let Some(p) = self.pending.take() {
            debug!(rule = %self.rule, checkpoint_id = p.id, "abandoning in-flight checkpoint");
            self.store.abort(p.id);
            for w in p.waiters {
                let _ = w.send(Err(Error::Cancelled));
            }
        }
        info!(rule = %self.rule, "checkpoint coordinator stopped");
    }

    async fn start_checkpoint(&mut self, waiter: Option<oneshot::Sender<Result<u64>>>) {
        if let Some(p) = self.pending.take() {
            self.abort(p, "superseded by a newer checkpoint");
        }
        let id = self.next_id();
        let barrier = CheckpointBarrier::new(id);
        debug!(rule = %self.rule, checkpoint_id = id, "injecting barrier");

        let pending = Pending {
            id,
            acked: BTreeSet::new(),
            started: Instant::now(),
            waiters: waiter.into_iter().collect(),
        };
        for source in &self.sources {
            if source.send(barrier).await.is_err() {
                self.abort(pending, "a source is no longer running");
                return;
            }
        }
        self.pending = Some(pending);
        if self.sinks.is_empty() {
            self.complete();
        }
    }

    fn on_signal(&mut self, signal: CheckpointSignal) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        match signal {
            CheckpointSignal::Ack { checkpoint_id, node } if checkpoint_id == pending.id => {
                debug!(rule = %self.rule, checkpoint_id, node = %node, "barrier acknowledged");
                pending.acked.insert(node);
                if self.sinks.iter().all(|s| pending.acked.contains(s)) {
                    self.complete();
                }
            }
            CheckpointSignal::Decline { checkpoint_id, node, reason } if checkpoint_id == pending.id => {
                if let Some(p) = self.pending.take() {
                    self.abort(p, &format!("declined by {node}: {reason}"));
                }
            }
            // acks of superseded checkpoints
            _ => {}
        }
    }

    fn complete(&mut self) {
        let Some(p) = self.pending.take() else {
            return;
        };
        match self.store.save_checkpoint(p.id) {
            Ok(()) => {
                let elapsed = p.started.elapsed();
                self.stats.completed.fetch_add(1, Ordering::Relaxed);
                self.stats.last_completed_id.store(p.id, Ordering::Relaxed);
                self.stats
                    .last_duration_ms
                    .store(u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
                info!(
                    rule = %self.rule,
                    checkpoint_id = p.id,
                    duration_ms = elapsed.as_millis() as u64,
                    "checkpoint completed"
                );
                for w in p.waiters {
                    let _ = w.send(Ok(p.id));
                }
            }
            Err(e) => {
                error!(rule = %self.rule, checkpoint_id = p.id, error = %e, "checkpoint commit failed");
                self.abort(p, &e.to_string());
            }
        }
    }

    fn abort(&self, p: Pending, reason: &str) {
        warn!(rule = %self.rule, checkpoint_id = p.id, reason, "checkpoint aborted");
        self.store.abort(p.id);
        self.stats.aborted.fetch_add(1, Ordering::Relaxed);
        for w in p.waiters {
            let _ = w.send(Err(Error::Checkpoint {
                checkpoint_id: p.id,
                reason: reason.to_string(),
            }));
        }
    }
}
