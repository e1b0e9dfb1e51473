use super::StateStore;
use crate::error::Result;

/// Store for at-most-once rules: state is never needed for correctness, so
/// nothing is kept.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryStore;

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StateStore for MemoryStore {
    fn save_state(&self, _checkpoint_id: u64, _op: &str, _state: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn save_checkpoint(&self, _checkpoint_id: u64) -> Result<()> {
        Ok(())
    }

    fn abort(&self, _checkpoint_id: u64) {}

    fn get_op_state(&self, _op: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn checkpoint_ids(&self) -> Vec<u64> {
        Vec::new()
    }
}
