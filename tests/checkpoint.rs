//! Barrier alignment and the checkpoint coordinator.

mod common;

use streamrule::checkpoint::{
    AlignmentAction, BarrierAligner, BarrierTracker, CheckpointBarrier, StreamMessage,
};
use streamrule::testing::msg;
use streamrule::tuple::Data;
use streamrule::value::Value;

fn data(i: i64) -> StreamMessage {
    StreamMessage::Data(rows(i))
}

fn rows(i: i64) -> Data {
    Data::Rows(vec![msg(&[("i", Value::Int(i))])])
}

fn barrier(id: u64) -> StreamMessage {
    StreamMessage::Barrier(CheckpointBarrier::new(id))
}

#[test]
fn test_aligner_buffers_inputs_past_the_barrier() {
    let mut aligner = BarrierAligner::new(["a".to_string(), "b".to_string()]);

    assert_eq!(aligner.process("a", data(1)), AlignmentAction::Forward(rows(1)));
    assert_eq!(aligner.process("a", barrier(1)), AlignmentAction::Buffer);
    assert!(aligner.is_aligning());
    // input a is ahead: held back
    assert_eq!(aligner.process("a", data(2)), AlignmentAction::Buffer);
    assert_eq!(aligner.buffered(), 1);
    // input b has not reached the barrier yet
    assert_eq!(aligner.process("b", data(3)), AlignmentAction::Forward(rows(3)));
    assert_eq!(
        aligner.process("b", barrier(1)),
        AlignmentAction::Aligned(CheckpointBarrier::new(1))
    );
    assert!(!aligner.is_aligning());
    assert_eq!(aligner.buffered(), 0);

    let (origin, message) = aligner.drain_next().unwrap();
    assert_eq!(origin, "a");
    assert_eq!(aligner.process(&origin, message), AlignmentAction::Forward(rows(2)));
    assert!(aligner.drain_next().is_none());
}

#[test]
fn test_aligner_newer_barrier_supersedes() {
    let mut aligner = BarrierAligner::new(["a".to_string(), "b".to_string()]);
    assert_eq!(aligner.process("a", barrier(1)), AlignmentAction::Buffer);
    assert_eq!(aligner.process("a", data(1)), AlignmentAction::Buffer);

    // b skipped checkpoint 1
    assert_eq!(aligner.process("b", barrier(2)), AlignmentAction::Buffer);
    let (origin, message) = aligner.drain_next().unwrap();
    assert_eq!(aligner.process(&origin, message), AlignmentAction::Forward(rows(1)));
    assert_eq!(
        aligner.process("a", barrier(2)),
        AlignmentAction::Aligned(CheckpointBarrier::new(2))
    );
}

#[test]
fn test_single_input_aligns_immediately() {
    let mut aligner = BarrierAligner::new(["only".to_string()]);
    assert_eq!(
        aligner.process("only", barrier(5)),
        AlignmentAction::Aligned(CheckpointBarrier::new(5))
    );
}

#[test]
fn test_tracker_never_holds_data() {
    let mut tracker = BarrierTracker::new(["a".to_string(), "b".to_string()]);
    assert_eq!(tracker.process("a", barrier(1)), AlignmentAction::Buffer);
    assert_eq!(tracker.process("a", data(1)), AlignmentAction::Forward(rows(1)));
    assert_eq!(tracker.process("a", barrier(2)), AlignmentAction::Buffer);
    assert_eq!(
        tracker.process("b", barrier(1)),
        AlignmentAction::Aligned(CheckpointBarrier::new(1))
    );
    assert_eq!(
        tracker.process("b", barrier(2)),
        AlignmentAction::Aligned(CheckpointBarrier::new(2))
    );
}

#[cfg(feature = "checkpointing")]
mod coordinator_tests {
    use super::common;
    use std::time::Duration;
    use streamrule::checkpoint::{
        CheckpointBarrier, CheckpointCoordinator, CheckpointSignal, CoordinatorHandle,
    };
    use streamrule::config::Qos;
    use streamrule::error::Error;
    use streamrule::state::{StateStore, StoreFactory, StoreHandle};
    use tempfile::tempdir;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        handle: CoordinatorHandle,
        store: StoreHandle,
        barriers: mpsc::Receiver<CheckpointBarrier>,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    fn start(factory: &StoreFactory, sinks: &[&str]) -> Harness {
        common::init_tracing();
        let store = factory.open("rule1", Qos::AtLeastOnce).unwrap();
        let (tx, barriers) = mpsc::channel(8);
        let (coordinator, handle) = CheckpointCoordinator::new(
            "rule1",
            Duration::from_secs(3600),
            store.clone(),
            vec![tx],
            sinks.iter().map(|s| (*s).to_string()),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn(coordinator.run(cancel.clone()));
        Harness { handle, store, barriers, cancel, task }
    }

    fn spawn_trigger(handle: &CoordinatorHandle) -> tokio::task::JoinHandle<streamrule::Result<u64>> {
        let handle = handle.clone();
        tokio::spawn(async move { handle.trigger().await })
    }

    fn ack(h: &Harness, checkpoint_id: u64, node: &str) {
        h.handle
            .signals()
            .send(CheckpointSignal::Ack { checkpoint_id, node: node.to_string() })
            .unwrap();
    }

    #[tokio::test]
    async fn test_checkpoint_commits_after_all_sinks_ack() {
        let dir = tempdir().unwrap();
        let factory = StoreFactory::new(dir.path(), 3);
        let mut h = start(&factory, &["sink_log_0_0", "sink_log_0_1"]);

        let pending = spawn_trigger(&h.handle);
        let b = h.barriers.recv().await.unwrap();
        h.store.save_state(b.checkpoint_id, "source_demo", b"offset".to_vec()).unwrap();
        ack(&h, b.checkpoint_id, "sink_log_0_0");
        ack(&h, b.checkpoint_id, "sink_log_0_1");

        assert_eq!(pending.await.unwrap().unwrap(), b.checkpoint_id);
        assert_eq!(h.store.latest_checkpoint_id(), Some(b.checkpoint_id));
        assert_eq!(h.store.get_op_state("source_demo").unwrap(), Some(b"offset".to_vec()));
        assert_eq!(h.handle.stats().completed(), 1);
        assert_eq!(h.handle.stats().last_completed_id(), Some(b.checkpoint_id));

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_decline_aborts_checkpoint() {
        let dir = tempdir().unwrap();
        let factory = StoreFactory::new(dir.path(), 3);
        let mut h = start(&factory, &["sink_a_0", "sink_b_0"]);

        let pending = spawn_trigger(&h.handle);
        let b = h.barriers.recv().await.unwrap();
        h.store.save_state(b.checkpoint_id, "op", b"staged".to_vec()).unwrap();
        ack(&h, b.checkpoint_id, "sink_a_0");
        h.handle
            .signals()
            .send(CheckpointSignal::Decline {
                checkpoint_id: b.checkpoint_id,
                node: "sink_b_0".into(),
                reason: "disk full".into(),
            })
            .unwrap();

        let err = pending.await.unwrap().unwrap_err();
        assert!(
            matches!(&err, Error::Checkpoint { checkpoint_id, reason } if *checkpoint_id == b.checkpoint_id && reason.contains("disk full")),
            "{err}"
        );
        assert_eq!(h.store.latest_checkpoint_id(), None);
        assert_eq!(h.store.get_op_state("op").unwrap(), None);
        assert_eq!(h.handle.stats().aborted(), 1);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_newer_checkpoint_supersedes_pending() {
        let dir = tempdir().unwrap();
        let factory = StoreFactory::new(dir.path(), 3);
        let mut h = start(&factory, &["sink_log_0_0"]);

        let first = spawn_trigger(&h.handle);
        let b1 = h.barriers.recv().await.unwrap();
        let second = spawn_trigger(&h.handle);
        let b2 = h.barriers.recv().await.unwrap();
        assert!(b2.checkpoint_id > b1.checkpoint_id);

        assert!(matches!(first.await.unwrap(), Err(Error::Checkpoint { .. })));
        // a late ack of the superseded checkpoint changes nothing
        ack(&h, b1.checkpoint_id, "sink_log_0_0");
        ack(&h, b2.checkpoint_id, "sink_log_0_0");
        assert_eq!(second.await.unwrap().unwrap(), b2.checkpoint_id);
        assert_eq!(h.store.checkpoint_ids(), vec![b2.checkpoint_id]);

        h.cancel.cancel();
        h.task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_abandons_pending_checkpoint() {
        let dir = tempdir().unwrap();
        let factory = StoreFactory::new(dir.path(), 3);
        let mut h = start(&factory, &["sink_log_0_0"]);

        let pending = spawn_trigger(&h.handle);
        h.barriers.recv().await.unwrap();
        h.cancel.cancel();
        h.task.await.unwrap();

        assert!(matches!(pending.await.unwrap(), Err(Error::Cancelled)));
        assert!(matches!(h.handle.trigger().await, Err(Error::Cancelled)));
        assert!(h.store.checkpoint_ids().is_empty());
    }

    #[tokio::test]
    async fn test_ids_increase_across_coordinators() {
        let dir = tempdir().unwrap();
        let factory = StoreFactory::new(dir.path(), 3);

        let mut h = start(&factory, &[]);
        let first = h.handle.trigger().await.unwrap();
        h.barriers.recv().await.unwrap();
        h.cancel.cancel();
        let Harness { handle, store, barriers, cancel, task } = h;
        task.await.unwrap();
        // the store stays exclusive until every handle is gone
        drop((handle, store, barriers, cancel));

        let h = start(&factory, &[]);
        let second = h.handle.trigger().await.unwrap();
        assert!(second > first);
        assert_eq!(h.store.checkpoint_ids(), vec![first, second]);
        h.cancel.cancel();
    }
}
