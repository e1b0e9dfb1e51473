//! Source and sink connector contracts.
//!
//! Connectors live outside the engine. A rule names them by type (a stream's
//! `sourceType`, an action's sink type) and a [`ConnectorRegistry`] built by
//! the embedding application turns that name into a fresh instance per node
//! instance.
//!
//! Connector methods return `anyhow::Result`; the runtime wraps failures into
//! [`Error::Connector`](crate::error::Error::Connector), which stops the
//! topology.

use crate::error::{Error, Result};
use crate::value::Message;
use crate::window::TimestampMs;
use anyhow::bail;
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Free-form connector properties, straight from the rule or stream JSON.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// One record read by a source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SourceRecord {
    pub message: Message,
    pub metadata: Message,
    /// Read time; the node uses wall time when absent.
    pub timestamp: Option<TimestampMs>,
}

impl SourceRecord {
    #[must_use]
    pub fn new(message: Message) -> Self {
        Self {
            message,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: Message) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, ts: TimestampMs) -> Self {
        self.timestamp = Some(ts);
        self
    }
}

/// A pull-based source connector.
#[async_trait]
pub trait Source: Send {
    /// Apply the stream's datasource and properties. Called once before
    /// [`open`](Self::open).
    fn configure(&mut self, datasource: &str, props: &Properties) -> anyhow::Result<()>;

    async fn open(&mut self) -> anyhow::Result<()>;

    /// Next record, waiting until one is available. `Ok(None)` means the
    /// source is exhausted.
    ///
    /// Must be cancel safe: the runtime polls it inside `select!` and drops
    /// the future when a barrier or cancellation arrives first, so a record
    /// must only be consumed when it is returned.
    async fn next(&mut self) -> anyhow::Result<Option<SourceRecord>>;

    /// Position to resume from, for replay-capable sources.
    fn offset(&self) -> Option<Vec<u8>> {
        None
    }

    /// Seek to a position previously returned by [`offset`](Self::offset).
    fn rewind(&mut self, offset: &[u8]) -> anyhow::Result<()> {
        let _ = offset;
        bail!("source does not support rewind")
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Identifies one delivery to a sink. Within one sink instance the pair
/// `(epoch, sequence)` is unique and replays after recovery reuse the same
/// pairs, so exactly-once sinks deduplicate on it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Delivery {
    pub instance: usize,
    /// Id of the last checkpoint barrier seen before the records; 0 before the
    /// first one.
    pub epoch: u64,
    /// Position within the epoch.
    pub sequence: u64,
}

/// A sink connector consuming projected records.
#[async_trait]
pub trait Sink: Send {
    fn configure(&mut self, props: &Properties) -> anyhow::Result<()>;

    async fn open(&mut self) -> anyhow::Result<()>;

    /// Deliver one result. An error makes the node retry and then cache the
    /// result.
    async fn collect(&mut self, records: &[Message], delivery: Delivery) -> anyhow::Result<()>;

    async fn close(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Node-level sink behaviour read from the action properties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SinkOptions {
    /// Extra attempts after a failed delivery.
    pub retry_count: u32,
    /// Milliseconds between attempts.
    pub retry_interval: u64,
    /// Undelivered results kept for later resend.
    pub cache_length: usize,
    /// Skip results without records.
    pub omit_if_empty: bool,
    /// Deliver records one at a time instead of as one result.
    pub send_single: bool,
    /// Instances of the sink node.
    pub concurrency: usize,
}

impl Default for SinkOptions {
    fn default() -> Self {
        Self {
            retry_count: 3,
            retry_interval: 1_000,
            cache_length: 1_024,
            omit_if_empty: false,
            send_single: false,
            concurrency: 1,
        }
    }
}

impl SinkOptions {
    /// Read the options from action properties; unrelated keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when a known key has the wrong type.
    pub fn from_props(props: &Properties) -> Result<Self> {
        let opts: Self = serde_json::from_value(serde_json::Value::Object(props.clone()))
            .map_err(|e| Error::config(format!("invalid sink options: {e}")))?;
        if opts.concurrency == 0 {
            return Err(Error::config("sink concurrency must be at least 1"));
        }
        Ok(opts)
    }
}

type SourceFactory = Arc<dyn Fn() -> Box<dyn Source> + Send + Sync>;
type SinkFactory = Arc<dyn Fn() -> Box<dyn Sink> + Send + Sync>;

/// Connector types known to an engine, keyed by lowercase type name.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    sources: Arc<RwLock<HashMap<String, SourceFactory>>>,
    sinks: Arc<RwLock<HashMap<String, SinkFactory>>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_source<F>(&self, kind: &str, factory: F)
    where
        F: Fn() -> Box<dyn Source> + Send + Sync + 'static,
    {
        self.sources
            .write()
            .insert(kind.to_ascii_lowercase(), Arc::new(factory));
    }

    pub fn register_sink<F>(&self, kind: &str, factory: F)
    where
        F: Fn() -> Box<dyn Sink> + Send + Sync + 'static,
    {
        self.sinks
            .write()
            .insert(kind.to_ascii_lowercase(), Arc::new(factory));
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unregistered type.
    pub fn source(&self, kind: &str) -> Result<Box<dyn Source>> {
        self.sources
            .read()
            .get(&kind.to_ascii_lowercase())
            .map(|f| f())
            .ok_or_else(|| Error::NotFound(format!("source type {kind}")))
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for an unregistered type.
    pub fn sink(&self, kind: &str) -> Result<Box<dyn Sink>> {
        self.sinks
            .read()
            .get(&kind.to_ascii_lowercase())
            .map(|f| f())
            .ok_or_else(|| Error::NotFound(format!("sink type {kind}")))
    }

    #[must_use]
    pub fn has_source(&self, kind: &str) -> bool {
        self.sources.read().contains_key(&kind.to_ascii_lowercase())
    }

    #[must_use]
    pub fn has_sink(&self, kind: &str) -> bool {
        self.sinks.read().contains_key(&kind.to_ascii_lowercase())
    }
}

impl Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut sources: Vec<String> = self.sources.read().keys().cloned().collect();
        let mut sinks: Vec<String> = self.sinks.read().keys().cloned().collect();
        sources.sort();
        sinks.sort();
        f.debug_struct("ConnectorRegistry")
            .field("sources", &sources)
            .field("sinks", &sinks)
            .finish()
    }
}
