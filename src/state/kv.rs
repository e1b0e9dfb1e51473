//! File-backed key-value state store.
//!
//! One directory per rule. Inside it:
//!
//! - `checkpoints`: the reserved key holding the ordered list of retained
//!   checkpoint ids,
//! - `<id>.ckpt`: the operator-name to state mapping of one checkpoint.
//!
//! Every file is a postcard-encoded [`StoredBlob`] whose SHA-256 checksum is
//! verified on read. Files are written to a temporary name and renamed into
//! place. Checkpoints beyond the retention bound leave the id list first and
//! their files are deleted in the background.

use super::StateStore;
use crate::error::{Error, Result};
use crate::functions::hash::hex;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, VecDeque};
use std::fs::{File, create_dir_all, read, remove_file, rename};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const CHECKPOINT_LIST_KEY: &str = "checkpoints";

type OpStates = BTreeMap<String, Vec<u8>>;

#[derive(Serialize, Deserialize)]
struct StoredBlob {
    checksum: String,
    payload: Vec<u8>,
}

/// Compute the SHA-256 checksum of data as lowercase hex.
#[must_use]
pub fn compute_checksum(data: &[u8]) -> String {
    hex(&Sha256::digest(data))
}

/// Persistent store for at-least-once and exactly-once rules.
#[derive(Debug)]
pub struct KvStore {
    dir: PathBuf,
    max_retained: usize,
    ids: Mutex<VecDeque<u64>>,
    staged: Mutex<BTreeMap<u64, OpStates>>,
    latest: Mutex<OpStates>,
}

impl KvStore {
    /// Open (or create) the store in `dir` and load the latest committed
    /// checkpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if the directory cannot be created or the id
    /// list is corrupt.
    pub fn open(dir: impl Into<PathBuf>, max_retained: usize) -> Result<Self> {
        let dir = dir.into();
        create_dir_all(&dir)
            .map_err(|e| Error::store(format!("cannot create {}: {e}", dir.display())))?;
        let ids: VecDeque<u64> = match read_blob(&dir.join(CHECKPOINT_LIST_KEY))? {
            Some(bytes) => postcard::from_bytes::<Vec<u64>>(&bytes)?.into(),
            None => VecDeque::new(),
        };

        let mut latest = OpStates::new();
        for id in ids.iter().rev() {
            match read_blob(&checkpoint_path(&dir, *id)) {
                Ok(Some(bytes)) => {
                    latest = postcard::from_bytes(&bytes)?;
                    info!(dir = %dir.display(), checkpoint_id = id, "restored checkpoint");
                    break;
                }
                Ok(None) => warn!(checkpoint_id = id, "checkpoint file missing, trying older"),
                Err(e) => warn!(checkpoint_id = id, error = %e, "checkpoint unreadable, trying older"),
            }
        }

        Ok(Self {
            dir,
            max_retained: max_retained.max(1),
            ids: Mutex::new(ids),
            staged: Mutex::new(BTreeMap::new()),
            latest: Mutex::new(latest),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full state of a retained checkpoint; `None` once it has been evicted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] when the file is unreadable or fails its
    /// checksum.
    pub fn get_checkpoint(&self, checkpoint_id: u64) -> Result<Option<BTreeMap<String, Vec<u8>>>> {
        if !self.ids.lock().contains(&checkpoint_id) {
            return Ok(None);
        }
        match read_blob(&checkpoint_path(&self.dir, checkpoint_id))? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    fn evict(&self, ids: &mut VecDeque<u64>) -> Vec<u64> {
        let mut evicted = Vec::new();
        while ids.len() > self.max_retained {
            if let Some(old) = ids.pop_front() {
                evicted.push(old);
            }
        }
        evicted
    }

    fn delete_async(&self, evicted: Vec<u64>) {
        if evicted.is_empty() {
            return;
        }
        let paths: Vec<PathBuf> = evicted.iter().map(|id| checkpoint_path(&self.dir, *id)).collect();
        let delete = move || {
            for p in paths {
                if let Err(e) = remove_file(&p) {
                    debug!(path = %p.display(), error = %e, "evicted checkpoint not removed");
                }
            }
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn_blocking(delete);
            }
            Err(_) => delete(),
        }
        debug!(?evicted, "evicting checkpoints");
    }
}

impl StateStore for KvStore {
    fn save_state(&self, checkpoint_id: u64, op: &str, state: Vec<u8>) -> Result<()> {
        self.staged
            .lock()
            .entry(checkpoint_id)
            .or_default()
            .insert(op.to_string(), state);
        Ok(())
    }

    fn save_checkpoint(&self, checkpoint_id: u64) -> Result<()> {
        let mut ids = self.ids.lock();
        if let Some(last) = ids.back()
            && checkpoint_id <= *last
        {
            return Err(Error::Checkpoint {
                checkpoint_id,
                reason: format!("not newer than committed checkpoint {last}"),
            });
        }
        let states = {
            let mut staged = self.staged.lock();
            let states = staged.remove(&checkpoint_id).unwrap_or_default();
            staged.retain(|id, _| *id > checkpoint_id);
            states
        };

        let path = checkpoint_path(&self.dir, checkpoint_id);
        write_blob(&path, &postcard::to_allocvec(&states)?)?;
        let mut next = ids.clone();
        next.push_back(checkpoint_id);
        let evicted = self.evict(&mut next);
        let list: Vec<u64> = next.iter().copied().collect();
        if let Err(e) = write_blob(&self.dir.join(CHECKPOINT_LIST_KEY), &postcard::to_allocvec(&list)?) {
            // the id list is the commit point: without it the checkpoint never happened
            let _ = remove_file(&path);
            return Err(e);
        }
        *ids = next;
        drop(ids);

        *self.latest.lock() = states;
        self.delete_async(evicted);
        Ok(())
    }

    fn abort(&self, checkpoint_id: u64) {
        self.staged.lock().remove(&checkpoint_id);
    }

    fn get_op_state(&self, op: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.latest.lock().get(op).cloned())
    }

    fn checkpoint_ids(&self) -> Vec<u64> {
        self.ids.lock().iter().copied().collect()
    }
}

fn checkpoint_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{id}.ckpt"))
}

fn write_blob(path: &Path, payload: &[u8]) -> Result<()> {
    let blob = StoredBlob {
        checksum: compute_checksum(payload),
        payload: payload.to_vec(),
    };
    let encoded = postcard::to_allocvec(&blob)?;
    let tmp = path.with_extension("tmp");
    let io = |e: std::io::Error| Error::store(format!("cannot write {}: {e}", path.display()));
    let mut file = File::create(&tmp).map_err(io)?;
    file.write_all(&encoded).map_err(io)?;
    file.sync_all().map_err(io)?;
    rename(&tmp, path).map_err(io)?;
    Ok(())
}

fn read_blob(path: &Path) -> Result<Option<Vec<u8>>> {
    if !path.exists() {
        return Ok(None);
    }
    let encoded =
        read(path).map_err(|e| Error::store(format!("cannot read {}: {e}", path.display())))?;
    let blob: StoredBlob = postcard::from_bytes(&encoded)?;
    if compute_checksum(&blob.payload) != blob.checksum {
        return Err(Error::store(format!(
            "integrity check failed for {}: checksum mismatch",
            path.display()
        )));
    }
    Ok(Some(blob.payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x");
        write_blob(&path, b"hello").unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, bytes).unwrap();
        assert!(read_blob(&path).is_err());
    }
}
