//! Operator state storage keyed by checkpoint id.
//!
//! A rule gets one store for its lifetime:
//!
//! - [`MemoryStore`] for at-most-once rules. It keeps nothing.
//! - [`KvStore`] for at-least-once / exactly-once rules. It persists state
//!   under `<data_dir>/checkpoints/<rule>/` and retains the last N committed checkpoints.
//!
//! Nodes stage their state with [`StateStore::save_state`] while a
//! checkpoint is in flight; the coordinator commits it with
//! [`StateStore::save_checkpoint`] or drops it with [`StateStore::abort`].
//!
//! [`StoreFactory`] hands out stores. A rule's store is exclusive: while one
//! [`StoreHandle`] (or a clone of it) is alive, opening the same rule again
//! fails.

#[cfg(feature = "checkpointing")]
mod kv;
mod memory;

#[cfg(feature = "checkpointing")]
pub use kv::KvStore;
pub use memory::MemoryStore;

use crate::config::Qos;
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage for per-operator checkpoint state.
pub trait StateStore: Send + Sync {
    /// Stage `state` of operator `op` for the in-flight checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the state cannot be staged.
    fn save_state(&self, checkpoint_id: u64, op: &str, state: Vec<u8>) -> Result<()>;

    /// Durably commit everything staged for `checkpoint_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Checkpoint`] when `checkpoint_id` is not newer than the
    /// last committed one, or [`Error::Store`] on write failure.
    fn save_checkpoint(&self, checkpoint_id: u64) -> Result<()>;

    /// Drop the staged state of an abandoned checkpoint.
    fn abort(&self, checkpoint_id: u64);

    /// State of `op` in the most recent committed checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the persisted data cannot be read.
    fn get_op_state(&self, op: &str) -> Result<Option<Vec<u8>>>;

    /// Retained committed checkpoint ids, oldest first.
    fn checkpoint_ids(&self) -> Vec<u64>;

    fn latest_checkpoint_id(&self) -> Option<u64> {
        self.checkpoint_ids().last().copied()
    }

    /// Whether the state of `checkpoint_id` can still be read.
    fn contains(&self, checkpoint_id: u64) -> bool {
        self.checkpoint_ids().contains(&checkpoint_id)
    }
}

/// Creates and tracks per-rule stores.
#[derive(Debug)]
pub struct StoreFactory {
    data_dir: PathBuf,
    max_retained: usize,
    open: Arc<Mutex<HashSet<String>>>,
}

impl StoreFactory {
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>, max_retained: usize) -> Self {
        Self {
            data_dir: data_dir.into(),
            max_retained: max_retained.max(1),
            open: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Open the store of `rule` for the given delivery guarantee.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the rule's store is already open or the
    /// persistent store cannot be opened, and [`Error::Config`] when a
    /// checkpointing guarantee is requested without the `checkpointing`
    /// feature.
    pub fn open(&self, rule: &str, qos: Qos) -> Result<StoreHandle> {
        if !self.open.lock().insert(rule.to_string()) {
            return Err(Error::store(format!("state store of rule {rule} is already open")));
        }
        let store = match self.create(rule, qos) {
            Ok(s) => s,
            Err(e) => {
                self.open.lock().remove(rule);
                return Err(e);
            }
        };
        debug!(rule, ?qos, "state store opened");
        Ok(StoreHandle(Arc::new(HandleInner {
            store,
            rule: rule.to_string(),
            open: Arc::clone(&self.open),
        })))
    }

    #[cfg(feature = "checkpointing")]
    fn create(&self, rule: &str, qos: Qos) -> Result<Arc<dyn StateStore>> {
        if qos.needs_checkpoint() {
            Ok(Arc::new(KvStore::open(self.rule_dir(rule), self.max_retained)?))
        } else {
            Ok(Arc::new(MemoryStore::new()))
        }
    }

    #[cfg(not(feature = "checkpointing"))]
    fn create(&self, rule: &str, qos: Qos) -> Result<Arc<dyn StateStore>> {
        if qos.needs_checkpoint() {
            return Err(Error::config(format!(
                "rule {rule} needs checkpointing, which this build does not include"
            )));
        }
        Ok(Arc::new(MemoryStore::new()))
    }

    /// Whether a handle for `rule` is currently alive.
    #[must_use]
    pub fn is_open(&self, rule: &str) -> bool {
        self.open.lock().contains(rule)
    }

    /// Delete all persisted state of `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the store is still open or the directory
    /// cannot be removed.
    pub fn remove(&self, rule: &str) -> Result<()> {
        if self.is_open(rule) {
            return Err(Error::store(format!("state store of rule {rule} is still open")));
        }
        let dir = self.rule_dir(rule);
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|e| Error::store(format!("cannot remove {}: {e}", dir.display())))?;
            info!(rule, "checkpoint data removed");
        }
        Ok(())
    }

    fn rule_dir(&self, rule: &str) -> PathBuf {
        self.data_dir.join("checkpoints").join(rule)
    }
}

struct HandleInner {
    store: Arc<dyn StateStore>,
    rule: String,
    open: Arc<Mutex<HashSet<String>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.open.lock().remove(&self.rule);
        debug!(rule = %self.rule, "state store released");
    }
}

/// Shared, exclusive access to one rule's store. The store is released when
/// the last clone is dropped.
#[derive(Clone)]
pub struct StoreHandle(Arc<HandleInner>);

impl StoreHandle {
    #[must_use]
    pub fn rule(&self) -> &str {
        &self.0.rule
    }
}

impl Deref for StoreHandle {
    type Target = dyn StateStore;

    fn deref(&self) -> &Self::Target {
        self.0.store.as_ref()
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("rule", &self.0.rule)
            .field("checkpoints", &self.0.store.checkpoint_ids())
            .finish()
    }
}
