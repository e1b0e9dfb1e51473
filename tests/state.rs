//! Checkpoint state stores.

use anyhow::Result;
use streamrule::state::{MemoryStore, StateStore};

#[test]
fn test_memory_store_keeps_nothing() -> Result<()> {
    let store = MemoryStore::new();
    store.save_state(1, "op", b"x".to_vec())?;
    store.save_checkpoint(1)?;
    store.save_checkpoint(1)?;
    assert_eq!(store.get_op_state("op")?, None);
    assert!(store.checkpoint_ids().is_empty());
    assert_eq!(store.latest_checkpoint_id(), None);
    Ok(())
}

#[cfg(feature = "checkpointing")]
mod kv_store_tests {
    use anyhow::Result;
    use streamrule::config::Qos;
    use streamrule::error::Error;
    use streamrule::state::{KvStore, StateStore, StoreFactory};
    use tempfile::tempdir;

    fn commit(store: &KvStore, id: u64, op: &str, state: &[u8]) -> Result<()> {
        store.save_state(id, op, state.to_vec())?;
        store.save_checkpoint(id)?;
        Ok(())
    }

    #[test]
    fn test_retains_last_n_checkpoints() -> Result<()> {
        let dir = tempdir()?;
        let store = KvStore::open(dir.path(), 3)?;
        for id in 1..=5 {
            commit(&store, id, "op_window_0", &[id as u8])?;
        }

        assert_eq!(store.checkpoint_ids(), vec![3, 4, 5]);
        assert_eq!(store.latest_checkpoint_id(), Some(5));
        assert!(store.get_checkpoint(1)?.is_none());
        assert!(store.get_checkpoint(2)?.is_none());
        assert!(!dir.path().join("1.ckpt").exists());

        let third = store.get_checkpoint(3)?.unwrap();
        assert_eq!(third["op_window_0"], vec![3]);
        assert_eq!(store.get_op_state("op_window_0")?, Some(vec![5]));
        Ok(())
    }

    #[test]
    fn test_reopen_restores_latest_state() -> Result<()> {
        let dir = tempdir()?;
        {
            let store = KvStore::open(dir.path(), 2)?;
            commit(&store, 10, "source_demo", b"offset-a")?;
            store.save_state(20, "source_demo", b"offset-b".to_vec())?;
            store.save_state(20, "op_count_0", b"buffer".to_vec())?;
            store.save_checkpoint(20)?;
            // staged but never committed
            store.save_state(30, "source_demo", b"offset-c".to_vec())?;
        }

        let store = KvStore::open(dir.path(), 2)?;
        assert_eq!(store.checkpoint_ids(), vec![10, 20]);
        assert_eq!(store.get_op_state("source_demo")?, Some(b"offset-b".to_vec()));
        assert_eq!(store.get_op_state("op_count_0")?, Some(b"buffer".to_vec()));
        assert_eq!(store.get_op_state("unknown")?, None);
        Ok(())
    }

    #[test]
    fn test_checkpoint_ids_must_increase() -> Result<()> {
        let dir = tempdir()?;
        let store = KvStore::open(dir.path(), 3)?;
        commit(&store, 7, "op", b"a")?;

        for stale in [7, 3] {
            let err = store.save_checkpoint(stale).unwrap_err();
            assert!(
                matches!(err, Error::Checkpoint { checkpoint_id, .. } if checkpoint_id == stale),
                "{err}"
            );
        }
        assert_eq!(store.checkpoint_ids(), vec![7]);
        assert_eq!(store.get_op_state("op")?, Some(b"a".to_vec()));
        Ok(())
    }

    #[test]
    fn test_failed_id_list_write_commits_nothing() -> Result<()> {
        let dir = tempdir()?;
        let store = KvStore::open(dir.path(), 2)?;
        commit(&store, 1, "op", b"one")?;
        commit(&store, 2, "op", b"two")?;

        // a directory where the id list's temporary file goes
        let blocker = dir.path().join("checkpoints.tmp");
        std::fs::create_dir(&blocker)?;
        store.save_state(3, "op", b"three".to_vec())?;
        assert!(matches!(store.save_checkpoint(3), Err(Error::Store(_))));
        assert_eq!(store.checkpoint_ids(), vec![1, 2]);
        assert!(store.get_checkpoint(1)?.is_some());
        assert!(!dir.path().join("3.ckpt").exists());
        assert_eq!(store.get_op_state("op")?, Some(b"two".to_vec()));

        std::fs::remove_dir(&blocker)?;
        commit(&store, 4, "op", b"four")?;
        assert_eq!(store.checkpoint_ids(), vec![2, 4]);
        assert_eq!(KvStore::open(dir.path(), 2)?.checkpoint_ids(), vec![2, 4]);
        Ok(())
    }

    #[test]
    fn test_aborted_state_is_not_committed() -> Result<()> {
        let dir = tempdir()?;
        let store = KvStore::open(dir.path(), 3)?;
        store.save_state(1, "op", b"discarded".to_vec())?;
        store.abort(1);
        store.save_checkpoint(1)?;
        assert_eq!(store.get_op_state("op")?, None);
        assert_eq!(store.checkpoint_ids(), vec![1]);
        Ok(())
    }

    #[test]
    fn test_factory_handles_are_exclusive() -> Result<()> {
        let dir = tempdir()?;
        let factory = StoreFactory::new(dir.path(), 3);

        let handle = factory.open("r1", Qos::AtLeastOnce)?;
        assert!(factory.is_open("r1"));
        assert!(matches!(factory.open("r1", Qos::AtLeastOnce), Err(Error::Store(_))));
        assert!(matches!(factory.remove("r1"), Err(Error::Store(_))));

        // other rules are independent
        let other = factory.open("r2", Qos::AtMostOnce)?;
        assert_eq!(other.rule(), "r2");

        handle.save_state(1, "op", b"s".to_vec())?;
        handle.save_checkpoint(1)?;
        let clone = handle.clone();
        drop(handle);
        assert!(factory.is_open("r1"));
        drop(clone);
        assert!(!factory.is_open("r1"));

        let reopened = factory.open("r1", Qos::ExactlyOnce)?;
        assert_eq!(reopened.latest_checkpoint_id(), Some(1));
        drop(reopened);

        factory.remove("r1")?;
        assert!(!dir.path().join("checkpoints").join("r1").exists());
        let fresh = factory.open("r1", Qos::AtLeastOnce)?;
        assert!(fresh.checkpoint_ids().is_empty());
        Ok(())
    }
}
