//! In-memory connectors.
//!
//! [`MemoryLogs`] holds named, replayable record logs. A [`LogSource`] reads
//! the log named by its stream's datasource and reports its read position as
//! offset, so rules over it recover exactly where the last checkpoint left
//! them. [`MemorySinks`] collects the results of every sink configured with
//! the same `name` property.

use crate::connector::{ConnectorRegistry, Delivery, Properties, Sink, Source, SourceRecord};
use crate::value::Message;
use anyhow::{Context, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Source and sink type name registered by [`register_memory_connectors`].
pub const MEMORY: &str = "memory";

#[derive(Default)]
struct LogInner {
    records: Mutex<Vec<SourceRecord>>,
    notify: Notify,
}

/// An append-only record log shared by the test and the sources reading it.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<LogInner>,
}

impl MemoryLog {
    pub fn push(&self, record: SourceRecord) {
        self.inner.records.lock().push(record);
        self.inner.notify.notify_waiters();
    }

    /// Append a record with the given message and no explicit timestamp.
    pub fn push_message(&self, message: Message) {
        self.push(SourceRecord::new(message));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get(&self, pos: usize) -> Option<SourceRecord> {
        self.inner.records.lock().get(pos).cloned()
    }
}

/// Named logs, shared between a test and the source factory.
#[derive(Clone, Default)]
pub struct MemoryLogs {
    logs: Arc<Mutex<HashMap<String, MemoryLog>>>,
}

impl MemoryLogs {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The log called `name`, created on first use.
    #[must_use]
    pub fn log(&self, name: &str) -> MemoryLog {
        self.logs.lock().entry(name.to_string()).or_default().clone()
    }
}

/// Reads one [`MemoryLog`] from its position, waiting for new records.
pub struct LogSource {
    logs: MemoryLogs,
    log: Option<MemoryLog>,
    pos: usize,
}

impl LogSource {
    #[must_use]
    pub fn new(logs: MemoryLogs) -> Self {
        Self { logs, log: None, pos: 0 }
    }
}

#[async_trait]
impl Source for LogSource {
    fn configure(&mut self, datasource: &str, _props: &Properties) -> anyhow::Result<()> {
        if datasource.is_empty() {
            bail!("memory source needs a datasource naming its log");
        }
        self.log = Some(self.logs.log(datasource));
        Ok(())
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        if self.log.is_none() {
            bail!("memory source is not configured");
        }
        Ok(())
    }

    async fn next(&mut self) -> anyhow::Result<Option<SourceRecord>> {
        let log = self.log.clone().context("memory source is not configured")?;
        loop {
            let notified = log.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(r) = log.get(self.pos) {
                self.pos += 1;
                return Ok(Some(r));
            }
            notified.await;
        }
    }

    fn offset(&self) -> Option<Vec<u8>> {
        postcard::to_allocvec(&(self.pos as u64)).ok()
    }

    fn rewind(&mut self, offset: &[u8]) -> anyhow::Result<()> {
        let pos: u64 = postcard::from_bytes(offset).context("bad memory source offset")?;
        self.pos = usize::try_from(pos)?;
        Ok(())
    }
}

#[derive(Default)]
struct SinkInner {
    results: Vec<Vec<Message>>,
    deliveries: HashSet<Delivery>,
    duplicates: usize,
    fail_next: usize,
}

/// Collected output of one named memory sink.
#[derive(Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<SinkInner>>,
    dedup: bool,
}

impl MemorySink {
    /// Every result in delivery order, one entry per `collect` call.
    #[must_use]
    pub fn results(&self) -> Vec<Vec<Message>> {
        self.inner.lock().results.clone()
    }

    /// Every delivered record, flattened.
    #[must_use]
    pub fn records(&self) -> Vec<Message> {
        self.inner.lock().results.iter().flatten().cloned().collect()
    }

    /// Deliveries dropped because their `(instance, epoch, sequence)` was
    /// already seen.
    #[must_use]
    pub fn duplicates(&self) -> usize {
        self.inner.lock().duplicates
    }

    /// Make the next `n` deliveries fail.
    pub fn fail_next(&self, n: usize) {
        self.inner.lock().fail_next = n;
    }

    /// Wait until at least `n` records arrived. Returns whether they did
    /// within `timeout`.
    pub async fn wait_for_records(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.records().len() >= n {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn configure(&mut self, props: &Properties) -> anyhow::Result<()> {
        self.dedup = props
            .get("dedup")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
        Ok(())
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn collect(&mut self, records: &[Message], delivery: Delivery) -> anyhow::Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            bail!("injected delivery failure");
        }
        if self.dedup && !inner.deliveries.insert(delivery) {
            inner.duplicates += 1;
            return Ok(());
        }
        inner.results.push(records.to_vec());
        Ok(())
    }
}

/// Named sinks, shared between a test and the sink factory.
#[derive(Clone, Default)]
pub struct MemorySinks {
    sinks: Arc<Mutex<HashMap<String, MemorySink>>>,
}

impl MemorySinks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The sink called `name`, created on first use.
    #[must_use]
    pub fn sink(&self, name: &str) -> MemorySink {
        self.sinks.lock().entry(name.to_string()).or_default().clone()
    }
}

/// Sink wrapper that binds to a named [`MemorySink`] at configure time.
struct NamedMemorySink {
    sinks: MemorySinks,
    target: Option<MemorySink>,
}

#[async_trait]
impl Sink for NamedMemorySink {
    fn configure(&mut self, props: &Properties) -> anyhow::Result<()> {
        let name = props
            .get("name")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("default");
        let mut sink = self.sinks.sink(name);
        sink.configure(props)?;
        self.target = Some(sink);
        Ok(())
    }

    async fn open(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn collect(&mut self, records: &[Message], delivery: Delivery) -> anyhow::Result<()> {
        match self.target.as_mut() {
            Some(sink) => sink.collect(records, delivery).await,
            None => bail!("memory sink is not configured"),
        }
    }
}

/// Register the `memory` source and sink types.
pub fn register_memory_connectors(registry: &ConnectorRegistry, logs: &MemoryLogs, sinks: &MemorySinks) {
    let logs = logs.clone();
    registry.register_source(MEMORY, move || Box::new(LogSource::new(logs.clone())));
    let sinks = sinks.clone();
    registry.register_sink(MEMORY, move || {
        Box::new(NamedMemorySink {
            sinks: sinks.clone(),
            target: None,
        })
    });
}
