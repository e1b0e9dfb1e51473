//! Testing utilities for rules.
//!
//! Everything needed to run rules end to end inside a test, without external
//! systems:
//!
//! - **Connectors**: [`MemoryLogs`] feed replayable sources, [`MemorySinks`]
//!   collect results and can deduplicate replays or inject failures.
//! - **Fixtures**: [`TestEngine`] wires a [`RuleManager`](crate::rule::RuleManager)
//!   to the memory connectors, a catalog and a [`FixedParser`] that maps SQL
//!   text to prebuilt statements.
//!
//! # Quick Start
//!
//! ```no_run
//! use streamrule::testing::*;
//! use streamrule::value::Value;
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let dir = std::env::temp_dir().join("streamrule-demo");
//! let engine = TestEngine::new(&dir);
//! let log = engine.stream("demo");
//! engine.define("SELECT x FROM demo", select("demo", &["x"]));
//!
//! engine.manager.create(memory_rule("r1", "SELECT x FROM demo", "out"))?;
//! engine.manager.start("r1").await?;
//! log.push_message(msg(&[("x", Value::Int(1))]));
//!
//! assert!(engine.sink("out").wait_for_records(1, Duration::from_secs(1)).await);
//! # Ok(())
//! # }
//! ```

pub mod connectors;
pub mod fixtures;

pub use connectors::{LogSource, MEMORY, MemoryLog, MemoryLogs, MemorySink, MemorySinks, register_memory_connectors};
pub use fixtures::{FixedParser, TestEngine, column, memory_rule, memory_stream, msg, select};
