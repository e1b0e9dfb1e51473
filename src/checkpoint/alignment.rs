//! Barrier alignment for nodes with several upstream producers.
//!
//! Every producer instance is an input, identified by its origin string.
//!
//! ## Exactly-once: [`BarrierAligner`]
//!
//! 1. A barrier arrives on input `i`; input `i` is marked.
//! 2. Data arriving later on input `i` is buffered, not processed.
//! 3. When every input is marked the aligner reports
//!    [`AlignmentAction::Aligned`]; the node snapshots and forwards the barrier.
//! 4. The node then replays buffered messages through
//!    [`BarrierAligner::process`] using [`BarrierAligner::drain_next`].
//!
//! Processing buffered data before the snapshot would put post-barrier
//! records into the checkpoint, so the order above must not change.
//!
//! ## At-least-once: [`BarrierTracker`]
//!
//! Same bookkeeping without buffering: data is always forwarded and the
//! snapshot happens once the last input reports the barrier.

use super::barrier::{CheckpointBarrier, StreamMessage};
use crate::tuple::Data;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// What the node should do with the message it just handed in.
#[derive(Debug, PartialEq)]
pub enum AlignmentAction {
    /// Process this data now.
    Forward(Data),
    /// Held back (or a barrier still waiting on other inputs).
    Buffer,
    /// All inputs reported this barrier: snapshot and forward it.
    Aligned(CheckpointBarrier),
}

/// Aligns barriers across inputs, buffering inputs that are ahead.
#[derive(Debug)]
pub struct BarrierAligner {
    inputs: BTreeSet<String>,
    received: BTreeSet<String>,
    pending: Option<CheckpointBarrier>,
    buffers: BTreeMap<String, VecDeque<StreamMessage>>,
    drain_queue: VecDeque<(String, StreamMessage)>,
}

impl BarrierAligner {
    #[must_use]
    pub fn new(inputs: impl IntoIterator<Item = String>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            received: BTreeSet::new(),
            pending: None,
            buffers: BTreeMap::new(),
            drain_queue: VecDeque::new(),
        }
    }

    pub fn process(&mut self, origin: &str, message: StreamMessage) -> AlignmentAction {
        if self.received.contains(origin) {
            self.buffers
                .entry(origin.to_string())
                .or_default()
                .push_back(message);
            return AlignmentAction::Buffer;
        }
        match message {
            StreamMessage::Data(d) => AlignmentAction::Forward(d),
            StreamMessage::Barrier(b) => {
                // a newer barrier supersedes one that never completed
                if self.pending.is_some_and(|p| b.checkpoint_id > p.checkpoint_id) {
                    self.release();
                }
                if self.pending.is_some_and(|p| b.checkpoint_id < p.checkpoint_id) {
                    return AlignmentAction::Buffer;
                }
                self.pending = Some(b);
                self.received.insert(origin.to_string());
                if self.inputs.iter().all(|i| self.received.contains(i)) {
                    self.release();
                    AlignmentAction::Aligned(b)
                } else {
                    AlignmentAction::Buffer
                }
            }
        }
    }

    /// Next buffered message to feed back into [`process`](Self::process).
    pub fn drain_next(&mut self) -> Option<(String, StreamMessage)> {
        self.drain_queue.pop_front()
    }

    #[must_use]
    pub fn is_aligning(&self) -> bool {
        self.pending.is_some()
    }

    /// Messages currently held back.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffers.values().map(VecDeque::len).sum()
    }

    fn release(&mut self) {
        self.pending = None;
        self.received.clear();
        for (origin, buf) in std::mem::take(&mut self.buffers) {
            self.drain_queue
                .extend(buf.into_iter().map(|m| (origin.clone(), m)));
        }
    }
}

/// Tracks barriers without holding data back.
#[derive(Debug)]
pub struct BarrierTracker {
    inputs: BTreeSet<String>,
    seen: BTreeMap<u64, BTreeSet<String>>,
}

impl BarrierTracker {
    #[must_use]
    pub fn new(inputs: impl IntoIterator<Item = String>) -> Self {
        Self {
            inputs: inputs.into_iter().collect(),
            seen: BTreeMap::new(),
        }
    }

    pub fn process(&mut self, origin: &str, message: StreamMessage) -> AlignmentAction {
        match message {
            StreamMessage::Data(d) => AlignmentAction::Forward(d),
            StreamMessage::Barrier(b) => {
                let seen = self.seen.entry(b.checkpoint_id).or_default();
                seen.insert(origin.to_string());
                if self.inputs.iter().all(|i| seen.contains(i)) {
                    // older incomplete checkpoints can never complete now
                    self.seen.retain(|id, _| *id > b.checkpoint_id);
                    AlignmentAction::Aligned(b)
                } else {
                    AlignmentAction::Buffer
                }
            }
        }
    }
}

/// Barrier handling chosen by the rule's delivery guarantee.
#[derive(Debug)]
pub enum BarrierHandler {
    Aligned(BarrierAligner),
    Tracked(BarrierTracker),
}

impl BarrierHandler {
    pub fn process(&mut self, origin: &str, message: StreamMessage) -> AlignmentAction {
        match self {
            Self::Aligned(a) => a.process(origin, message),
            Self::Tracked(t) => t.process(origin, message),
        }
    }

    pub fn drain_next(&mut self) -> Option<(String, StreamMessage)> {
        match self {
            Self::Aligned(a) => a.drain_next(),
            Self::Tracked(_) => None,
        }
    }
}
