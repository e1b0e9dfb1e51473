//! # Streamrule
//!
//! An **embedded streaming rule engine**. A rule is a continuous SQL-like
//! query over one or more streams plus a list of sinks. The engine compiles
//! the query into a graph of concurrent operator nodes, runs it on tokio, and
//! (for at-least-once and exactly-once rules) checkpoints operator state with
//! aligned barriers so a restarted rule resumes where it left off.
//!
//! ## Key Features
//!
//! - **Query compiler**: `SELECT` statements become a fixed stage sequence
//!   (preprocess, window filter, window, join, filter, aggregate, having,
//!   order, project)
//! - **Windows**: tumbling, hopping, sliding, session and count windows, in
//!   processing or event time with late tolerance
//! - **Function library**: math, string, conversion, hash, JSON and aggregate
//!   functions, extensible through plugins
//! - **Bounded, concurrent topologies** with per-node metrics
//! - **Checkpointing**: barrier alignment, a coordinator per rule and a
//!   persistent store that retains the last N checkpoints
//! - **Rule lifecycle**: create, start, stop, restart, update, delete, status
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use streamrule::catalog::{MemoryCatalog, StreamDefinition};
//! use streamrule::config::EngineConfig;
//! use streamrule::connector::ConnectorRegistry;
//! use streamrule::functions::FunctionRegistry;
//! use streamrule::rule::{Rule, RuleManager, StatementParser};
//!
//! # async fn demo(parser: Arc<dyn StatementParser>, connectors: ConnectorRegistry) -> anyhow::Result<()> {
//! let catalog = Arc::new(MemoryCatalog::new());
//! catalog.insert(StreamDefinition::new("demo", "mqtt").with_datasource("sensors/#"));
//!
//! let manager = RuleManager::new(
//!     EngineConfig::default(),
//!     parser,
//!     catalog,
//!     Arc::new(FunctionRegistry::new()),
//!     connectors,
//! );
//! manager.create(Rule::from_json(
//!     r#"{"id": "hot", "sql": "SELECT * FROM demo WHERE temperature > 30", "actions": [{"log": {}}]}"#,
//! )?)?;
//! manager.start("hot").await?;
//! println!("{}", manager.status("hot").await.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Core Concepts
//!
//! ### Streams and connectors
//!
//! A [`StreamDefinition`](catalog::StreamDefinition) names a source connector
//! type and optionally a schema. Connectors implement
//! [`Source`](connector::Source) and [`Sink`](connector::Sink) and are
//! registered by type name in a [`ConnectorRegistry`](connector::ConnectorRegistry).
//!
//! ### Plans and topologies
//!
//! [`build_plan`](planner::build_plan) turns a parsed statement into a
//! [`Plan`](planner::Plan). A [`Topology`](topo::Topology) is the running
//! form of a plan: one task per node instance, bounded queues between them.
//!
//! ### Delivery guarantees
//!
//! `qos: 0` rules keep no state. `qos: 1` and `qos: 2` rules run a
//! [`CheckpointCoordinator`](checkpoint::CheckpointCoordinator); exactly-once
//! rules align barriers at every node and stamp each sink delivery with a
//! replay-stable [`Delivery`](connector::Delivery) id.
//!
//! ## Testing
//!
//! The [`testing`] module runs rules end to end against in-memory connectors.
//!
//! ## Feature Flags
//!
//! - `checkpointing` (default): the persistent checkpoint store. Without it
//!   only `qos: 0` rules can start.

pub mod ast;
pub mod catalog;
pub mod checkpoint;
pub mod config;
pub mod connector;
pub mod error;
pub mod expr;
pub mod functions;
pub mod metrics;
pub mod operators;
pub mod planner;
pub mod rule;
pub mod state;
pub mod testing;
pub mod topo;
pub mod tuple;
pub mod utils;
pub mod value;
pub mod window;

pub use catalog::{MemoryCatalog, StreamCatalog, StreamDefinition};
pub use config::{EngineConfig, Qos, RuleOptions};
pub use connector::{ConnectorRegistry, Sink, Source};
pub use error::{Error, Result};
pub use functions::FunctionRegistry;
pub use metrics::MetricsCollector;
pub use planner::{Plan, Stage, build_plan};
pub use rule::{Action, Rule, RuleManager, RuleStatus};
pub use topo::{TopoGraph, Topology};
pub use value::{Message, Value};
pub use window::{TimestampMs, Window};
