//! Ready-made engine setups for tests.

use super::connectors::{MEMORY, MemoryLog, MemoryLogs, MemorySink, MemorySinks, register_memory_connectors};
use crate::ast::{Expr, Field, SelectStatement};
use crate::catalog::{MemoryCatalog, StreamDefinition};
use crate::config::EngineConfig;
use crate::connector::ConnectorRegistry;
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::rule::{Action, Rule, RuleManager, StatementParser};
use crate::value::{Message, Value};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Build a message from field/value pairs.
///
/// ```
/// use streamrule::testing::msg;
/// use streamrule::value::Value;
///
/// let m = msg(&[("x", Value::Int(3))]);
/// assert_eq!(m["x"], Value::Int(3));
/// ```
#[must_use]
pub fn msg(fields: &[(&str, Value)]) -> Message {
    fields.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

/// Values of `field` across `records`, `Null` where missing.
#[must_use]
pub fn column(records: &[Message], field: &str) -> Vec<Value> {
    records
        .iter()
        .map(|r| r.get(field).cloned().unwrap_or_default())
        .collect()
}

/// `SELECT <fields> FROM <stream>` with every field projected by name.
#[must_use]
pub fn select(stream: &str, fields: &[&str]) -> SelectStatement {
    SelectStatement {
        fields: fields
            .iter()
            .map(|f| {
                if *f == "*" {
                    Field::new("*", Expr::Wildcard { stream: None })
                } else {
                    Field::new(*f, Expr::field(*f))
                }
            })
            .collect(),
        sources: vec![stream.to_string()],
        ..SelectStatement::default()
    }
}

/// A parser that only knows the statements registered with it.
#[derive(Debug, Default)]
pub struct FixedParser {
    statements: RwLock<HashMap<String, SelectStatement>>,
}

impl FixedParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&self, sql: impl Into<String>, stmt: SelectStatement) {
        self.statements.write().insert(sql.into(), stmt);
    }
}

impl StatementParser for FixedParser {
    fn parse(&self, sql: &str) -> Result<SelectStatement> {
        self.statements
            .read()
            .get(sql)
            .cloned()
            .ok_or_else(|| Error::plan(format!("cannot parse {sql:?}")))
    }
}

/// A schemaless stream read from the memory log of the same name.
#[must_use]
pub fn memory_stream(name: &str) -> StreamDefinition {
    StreamDefinition::new(name, MEMORY).with_datasource(name)
}

/// A rule delivering to the memory sink called `sink`.
#[must_use]
pub fn memory_rule(id: &str, sql: &str, sink: &str) -> Rule {
    Rule::new(id, sql).with_action(
        Action::new(MEMORY)
            .with_prop("name", serde_json::Value::from(sink))
            .with_prop("retryInterval", serde_json::Value::from(10)),
    )
}

/// A [`RuleManager`] wired to memory connectors, a [`MemoryCatalog`] and a
/// [`FixedParser`].
pub struct TestEngine {
    pub manager: RuleManager,
    pub catalog: Arc<MemoryCatalog>,
    pub parser: Arc<FixedParser>,
    pub logs: MemoryLogs,
    pub sinks: MemorySinks,
}

impl TestEngine {
    /// Engine with default settings storing checkpoints under `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self::with_config(EngineConfig::default().with_data_dir(data_dir))
    }

    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_functions(config, FunctionRegistry::new())
    }

    /// Engine resolving functions (and plugins) through `functions`.
    #[must_use]
    pub fn with_functions(config: EngineConfig, functions: FunctionRegistry) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        let parser = Arc::new(FixedParser::new());
        let logs = MemoryLogs::new();
        let sinks = MemorySinks::new();
        let connectors = ConnectorRegistry::new();
        register_memory_connectors(&connectors, &logs, &sinks);
        let manager = RuleManager::new(
            config,
            Arc::clone(&parser) as Arc<dyn StatementParser>,
            Arc::clone(&catalog) as _,
            Arc::new(functions),
            connectors,
        );
        Self {
            manager,
            catalog,
            parser,
            logs,
            sinks,
        }
    }

    /// Declare a schemaless memory stream and return its log.
    pub fn stream(&self, name: &str) -> MemoryLog {
        self.catalog.insert(memory_stream(name));
        self.logs.log(name)
    }

    /// Register the statement `sql` stands for.
    pub fn define(&self, sql: &str, stmt: SelectStatement) {
        self.parser.define(sql, stmt);
    }

    #[must_use]
    pub fn sink(&self, name: &str) -> MemorySink {
        self.sinks.sink(name)
    }
}
