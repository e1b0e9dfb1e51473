//! In-band checkpoint markers.

use crate::tuple::Data;

/// A checkpoint barrier flowing through the graph alongside data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointBarrier {
    /// Strictly increasing per rule.
    pub checkpoint_id: u64,
}

impl CheckpointBarrier {
    #[must_use]
    pub const fn new(checkpoint_id: u64) -> Self {
        Self { checkpoint_id }
    }
}

/// What travels through node queues.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamMessage {
    Data(Data),
    Barrier(CheckpointBarrier),
}

/// A message tagged with the producer instance that sent it
/// (`<node>_<instance>`). Alignment is keyed by origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: String,
    pub message: StreamMessage,
}
