//! Barrier-based checkpointing: in-band barriers, per-node alignment and the
//! per-rule coordinator.

mod alignment;
mod barrier;
mod coordinator;

pub use alignment::{AlignmentAction, BarrierAligner, BarrierHandler, BarrierTracker};
pub use barrier::{CheckpointBarrier, Envelope, StreamMessage};
pub use coordinator::{CheckpointCoordinator, CheckpointSignal, CheckpointStats, CoordinatorHandle};
