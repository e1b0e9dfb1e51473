//! Tuples and the collections built from them as they move through a rule.
//!
//! A [`Tuple`] is produced by a source and never mutated afterwards. Windowing
//! turns tuples into a [`WindowTuples`] collection, joining turns that into
//! [`JoinTuples`], and aggregation groups rows into a [`GroupedTuplesSet`].
//! Whatever shape is current travels between nodes as a [`Data`] value.

use crate::value::{Message, Value};
use crate::window::{TimestampMs, Window};
use serde::{Deserialize, Serialize};

/// Field access used by the expression evaluator.
pub trait Row {
    /// Look up a field, optionally qualified by the stream it came from.
    fn value(&self, stream: Option<&str>, name: &str) -> Option<Value>;

    /// Look up a metadata key.
    fn meta(&self, stream: Option<&str>, key: &str) -> Option<Value>;

    /// All fields visible under `stream` (or every field when `None`), used to
    /// expand `*`.
    fn all(&self, stream: Option<&str>) -> Message;

    /// Event or arrival time of the row.
    fn timestamp(&self) -> TimestampMs;
}

/// One unit of streamed data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tuple {
    /// Name of the stream that produced the tuple.
    pub emitter: String,
    pub message: Message,
    pub timestamp: TimestampMs,
    pub metadata: Message,
}

impl Tuple {
    pub fn new(emitter: impl Into<String>, message: Message, timestamp: TimestampMs) -> Self {
        Self {
            emitter: emitter.into(),
            message,
            timestamp,
            metadata: Message::new(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Message) -> Self {
        self.metadata = metadata;
        self
    }

    fn matches(&self, stream: Option<&str>) -> bool {
        stream.is_none_or(|s| s.eq_ignore_ascii_case(&self.emitter))
    }
}

impl Row for Tuple {
    fn value(&self, stream: Option<&str>, name: &str) -> Option<Value> {
        if !self.matches(stream) {
            return None;
        }
        self.message.get(name).cloned()
    }

    fn meta(&self, stream: Option<&str>, key: &str) -> Option<Value> {
        if !self.matches(stream) {
            return None;
        }
        self.metadata.get(key).cloned()
    }

    fn all(&self, stream: Option<&str>) -> Message {
        if self.matches(stream) {
            self.message.clone()
        } else {
            Message::new()
        }
    }

    fn timestamp(&self) -> TimestampMs {
        self.timestamp
    }
}

/// Tuples gathered by one window firing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowTuples {
    pub window: Window,
    pub tuples: Vec<Tuple>,
}

/// One joined row: at most one tuple per stream, in join order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JoinTuple {
    pub tuples: Vec<Tuple>,
}

impl JoinTuple {
    #[must_use]
    pub fn single(t: Tuple) -> Self {
        Self { tuples: vec![t] }
    }

    #[must_use]
    pub fn with(&self, t: Tuple) -> Self {
        let mut tuples = self.tuples.clone();
        tuples.push(t);
        Self { tuples }
    }
}

impl Row for JoinTuple {
    fn value(&self, stream: Option<&str>, name: &str) -> Option<Value> {
        self.tuples.iter().find_map(|t| t.value(stream, name))
    }

    fn meta(&self, stream: Option<&str>, key: &str) -> Option<Value> {
        self.tuples.iter().find_map(|t| t.meta(stream, key))
    }

    fn all(&self, stream: Option<&str>) -> Message {
        let mut out = Message::new();
        for t in &self.tuples {
            for (k, v) in t.all(stream) {
                out.entry(k).or_insert(v);
            }
        }
        out
    }

    fn timestamp(&self) -> TimestampMs {
        self.tuples.iter().map(|t| t.timestamp).max().unwrap_or_default()
    }
}

/// Result of the join stage for one window.
#[derive(Clone, Debug, PartialEq)]
pub struct JoinTuples {
    pub window: Window,
    pub rows: Vec<JoinTuple>,
}

/// A row inside a group: either a plain tuple or a joined row.
#[derive(Clone, Debug, PartialEq)]
pub enum RowItem {
    Tuple(Tuple),
    Joined(JoinTuple),
}

impl Row for RowItem {
    fn value(&self, stream: Option<&str>, name: &str) -> Option<Value> {
        match self {
            Self::Tuple(t) => t.value(stream, name),
            Self::Joined(j) => j.value(stream, name),
        }
    }

    fn meta(&self, stream: Option<&str>, key: &str) -> Option<Value> {
        match self {
            Self::Tuple(t) => t.meta(stream, key),
            Self::Joined(j) => j.meta(stream, key),
        }
    }

    fn all(&self, stream: Option<&str>) -> Message {
        match self {
            Self::Tuple(t) => t.all(stream),
            Self::Joined(j) => j.all(stream),
        }
    }

    fn timestamp(&self) -> TimestampMs {
        match self {
            Self::Tuple(t) => t.timestamp,
            Self::Joined(j) => j.timestamp(),
        }
    }
}

/// Rows sharing the same GROUP BY key.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedTuples {
    pub key: Vec<Value>,
    pub rows: Vec<RowItem>,
}

/// Output of the aggregate stage.
#[derive(Clone, Debug, PartialEq)]
pub struct GroupedTuplesSet {
    pub window: Option<Window>,
    pub groups: Vec<GroupedTuples>,
}

/// The value exchanged between stages.
#[derive(Clone, Debug, PartialEq)]
pub enum Data {
    Tuple(Tuple),
    Window(WindowTuples),
    Joined(JoinTuples),
    Grouped(GroupedTuplesSet),
    /// Projected, sink-bound records.
    Rows(Vec<Message>),
    /// A per-tuple failure forwarded downstream.
    Error(String),
}

impl Data {
    /// Number of logical records carried, used for metrics.
    #[must_use]
    pub fn record_count(&self) -> usize {
        match self {
            Self::Tuple(_) | Self::Error(_) => 1,
            Self::Window(w) => w.tuples.len(),
            Self::Joined(j) => j.rows.len(),
            Self::Grouped(g) => g.groups.len(),
            Self::Rows(r) => r.len(),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    #[must_use]
    pub fn window(&self) -> Option<Window> {
        match self {
            Self::Window(w) => Some(w.window),
            Self::Joined(j) => Some(j.window),
            Self::Grouped(g) => g.window,
            _ => None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Tuple(_) => "tuple",
            Self::Window(_) => "window",
            Self::Joined(_) => "joined",
            Self::Grouped(_) => "grouped",
            Self::Rows(_) => "rows",
            Self::Error(_) => "error",
        }
    }
}
