//! Per-node runtime metrics.
//!
//! Every node instance owns a [`NodeMetrics`] of lock-free counters. A
//! [`MetricsCollector`] holds all of a topology's node metrics and renders a
//! snapshot keyed `"<role>_<name>_<instance>_<metric>"`, for example
//! `op_filter_0_records_in_total`.
//!
//! ```
//! use streamrule::metrics::{MetricsCollector, NodeRole};
//!
//! let collector = MetricsCollector::new();
//! let m = collector.register(NodeRole::Sink, "log", 0);
//! m.record_in(2);
//! assert_eq!(collector.snapshot()["sink_log_0_records_in_total"], 2);
//! ```

use crate::utils::now_ms;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value, json};
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Role of a node in the graph; the first part of every metric key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeRole {
    Source,
    Operator,
    Sink,
}

impl Display for NodeRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        f.write_str(match self {
            Self::Source => "source",
            Self::Operator => "op",
            Self::Sink => "sink",
        })
    }
}

/// Counters of one node instance.
#[derive(Debug)]
pub struct NodeMetrics {
    role: NodeRole,
    name: String,
    instance: usize,
    records_in: AtomicU64,
    records_out: AtomicU64,
    exceptions: AtomicU64,
    buffer_length: AtomicI64,
    process_latency_us: AtomicU64,
    last_invocation: AtomicI64,
    last_exception: Mutex<Option<String>>,
    last_exception_time: AtomicI64,
}

impl NodeMetrics {
    pub fn new(role: NodeRole, name: impl Into<String>, instance: usize) -> Self {
        Self {
            role,
            name: name.into(),
            instance,
            records_in: AtomicU64::new(0),
            records_out: AtomicU64::new(0),
            exceptions: AtomicU64::new(0),
            buffer_length: AtomicI64::new(0),
            process_latency_us: AtomicU64::new(0),
            last_invocation: AtomicI64::new(0),
            last_exception: Mutex::new(None),
            last_exception_time: AtomicI64::new(0),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> String {
        format!("{}_{}_{}", self.role, self.name, self.instance)
    }

    pub fn record_in(&self, n: usize) {
        self.records_in.fetch_add(n as u64, Ordering::Relaxed);
        self.last_invocation.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_out(&self, n: usize) {
        self.records_out.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_exception(&self, err: impl Into<String>) {
        self.exceptions.fetch_add(1, Ordering::Relaxed);
        *self.last_exception.lock() = Some(err.into());
        self.last_exception_time.store(now_ms(), Ordering::Relaxed);
    }

    pub fn set_buffer_length(&self, len: usize) {
        self.buffer_length
            .store(i64::try_from(len).unwrap_or(i64::MAX), Ordering::Relaxed);
    }

    pub fn record_latency(&self, d: Duration) {
        self.process_latency_us.store(
            u64::try_from(d.as_micros()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    #[must_use]
    pub fn records_in(&self) -> u64 {
        self.records_in.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn records_out(&self) -> u64 {
        self.records_out.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn exceptions(&self) -> u64 {
        self.exceptions.load(Ordering::Relaxed)
    }

    fn write_into(&self, out: &mut Map<String, Value>) {
        let p = self.prefix();
        out.insert(format!("{p}_records_in_total"), json!(self.records_in()));
        out.insert(format!("{p}_records_out_total"), json!(self.records_out()));
        out.insert(format!("{p}_exceptions_total"), json!(self.exceptions()));
        out.insert(
            format!("{p}_buffer_length"),
            json!(self.buffer_length.load(Ordering::Relaxed)),
        );
        out.insert(
            format!("{p}_process_latency_us"),
            json!(self.process_latency_us.load(Ordering::Relaxed)),
        );
        out.insert(
            format!("{p}_last_invocation"),
            json!(self.last_invocation.load(Ordering::Relaxed)),
        );
        out.insert(
            format!("{p}_last_exception"),
            json!(self.last_exception.lock().clone().unwrap_or_default()),
        );
        out.insert(
            format!("{p}_last_exception_time"),
            json!(self.last_exception_time.load(Ordering::Relaxed)),
        );
    }
}

/// All node metrics of one topology.
#[derive(Clone, Debug, Default)]
pub struct MetricsCollector {
    nodes: Arc<RwLock<Vec<Arc<NodeMetrics>>>>,
}

impl MetricsCollector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track the metrics of one node instance.
    pub fn register(&self, role: NodeRole, name: &str, instance: usize) -> Arc<NodeMetrics> {
        let m = Arc::new(NodeMetrics::new(role, name, instance));
        self.nodes.write().push(Arc::clone(&m));
        m
    }

    /// Cumulative values of every metric, keyed
    /// `"<role>_<name>_<instance>_<metric>"`.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut out = Map::new();
        for n in self.nodes.read().iter() {
            n.write_into(&mut out);
        }
        out
    }

    /// Sum of one counter over every instance of a node.
    #[must_use]
    pub fn total(&self, role: NodeRole, name: &str, metric: fn(&NodeMetrics) -> u64) -> u64 {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.role == role && n.name == name)
            .map(|n| metric(n))
            .sum()
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        Value::Object(self.snapshot())
    }
}
