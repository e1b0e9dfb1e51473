//! Query compiler.
//!
//! [`build_plan`] turns a [`SelectStatement`] into a linear list of [`Stage`]s,
//! always in this order (each stage only when the statement needs it):
//!
//! 1. **preprocess**, one per source stream: conform raw tuples to the stream
//!    schema and pick the tuple timestamp.
//! 2. **windowFilter**: the `FILTER (WHERE ...)` of the window clause.
//! 3. **window**: collect tuples into windows.
//! 4. **join**: join the streams of one window.
//! 5. **filter**: the `WHERE` clause.
//! 6. **aggregate**: group rows by the `GROUP BY` expressions.
//! 7. **having**, 8. **order**, 9. **project**.
//!
//! Invalid statements and invalid option combinations are rejected here, so a
//! rule that compiles always starts.

use crate::ast::{Expr, Field, Join, SelectStatement, SortField, WindowSpec};
use crate::catalog::{StreamCatalog, StreamDefinition};
use crate::config::RuleOptions;
use crate::error::{Error, Result};
use crate::functions::FunctionRegistry;
use crate::window::{WindowConfig, WindowKind};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// One logical phase of a compiled rule.
#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Preprocess {
        stream: StreamDefinition,
        is_event_time: bool,
    },
    WindowFilter {
        condition: Expr,
    },
    Window {
        config: WindowConfig,
    },
    Join {
        from: String,
        joins: Vec<Join>,
    },
    Filter {
        condition: Expr,
    },
    Aggregate {
        dimensions: Vec<Expr>,
    },
    Having {
        condition: Expr,
    },
    Order {
        sort_fields: Vec<SortField>,
    },
    Project {
        fields: Vec<Field>,
        /// Fields containing aggregate calls.
        aggregate_fields: Vec<String>,
        send_meta: bool,
    },
}

impl Stage {
    /// Node name used in topology graphs and metric keys.
    #[must_use]
    pub fn name(&self) -> String {
        match self {
            Self::Preprocess { stream, .. } => format!("{}_preprocess", stream.name),
            other => other.kind().to_string(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Preprocess { .. } => "preprocess",
            Self::WindowFilter { .. } => "windowFilter",
            Self::Window { .. } => "window",
            Self::Join { .. } => "join",
            Self::Filter { .. } => "filter",
            Self::Aggregate { .. } => "aggregate",
            Self::Having { .. } => "having",
            Self::Order { .. } => "order",
            Self::Project { .. } => "project",
        }
    }

    /// Whether the operator keeps state across tuples.
    #[must_use]
    pub fn is_stateful(&self) -> bool {
        matches!(self, Self::Window { .. })
    }

    fn describe(&self) -> String {
        match self {
            Self::Preprocess { stream, is_event_time } => {
                let schema = if stream.is_schemaless() {
                    "schemaless".to_string()
                } else {
                    format!("{} fields", stream.fields.len())
                };
                let time = match (&stream.timestamp_field, is_event_time) {
                    (Some(ts), true) => format!("event time from {ts}"),
                    _ => "processing time".to_string(),
                };
                format!("stream {} ({schema}, {time})", stream.name)
            }
            Self::WindowFilter { condition } | Self::Filter { condition } | Self::Having { condition } => {
                condition.to_string()
            }
            Self::Window { config } => {
                let mut s = format!("{}(length={}", config.kind, config.length);
                if let Some(i) = config.interval {
                    s.push_str(&format!(", interval={i}"));
                }
                if config.is_event_time {
                    s.push_str(&format!(", lateTolerance={}", config.late_tolerance));
                }
                s.push(')');
                s
            }
            Self::Join { from, joins } => {
                let parts: Vec<String> = joins
                    .iter()
                    .map(|j| match &j.condition {
                        Some(c) => format!("{:?} {} ON {c}", j.kind, j.stream),
                        None => format!("{:?} {}", j.kind, j.stream),
                    })
                    .collect();
                format!("{from} {}", parts.join(" "))
            }
            Self::Aggregate { dimensions } => {
                if dimensions.is_empty() {
                    "whole collection".to_string()
                } else {
                    join_display(dimensions)
                }
            }
            Self::Order { sort_fields } => sort_fields
                .iter()
                .map(|s| format!("{} {}", s.expr, if s.ascending { "ASC" } else { "DESC" }))
                .collect::<Vec<_>>()
                .join(", "),
            Self::Project { fields, send_meta, .. } => {
                let names: Vec<&str> = fields.iter().map(Field::output_name).collect();
                if *send_meta {
                    format!("{} (+meta)", names.join(", "))
                } else {
                    names.join(", ")
                }
            }
        }
    }
}

fn join_display(exprs: &[Expr]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// A compiled rule.
#[derive(Clone, Debug)]
pub struct Plan {
    /// Stages in execution order.
    pub stages: Vec<Stage>,
    /// Source streams, in FROM/JOIN order.
    pub sources: Vec<StreamDefinition>,
    pub concurrency: usize,
    pub buffer_length: usize,
}

impl Plan {
    /// Stage kinds, in order.
    #[must_use]
    pub fn stage_kinds(&self) -> Vec<&'static str> {
        self.stages.iter().map(Stage::kind).collect()
    }

    #[must_use]
    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name.as_str()).collect()
    }

    #[must_use]
    pub fn window(&self) -> Option<&WindowConfig> {
        self.stages.iter().find_map(|s| match s {
            Stage::Window { config } => Some(config),
            _ => None,
        })
    }

    /// Human-readable explanation of the compiled stages.
    #[must_use]
    pub fn explain(&self) -> PlanExplanation {
        let steps = self
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| ExplainStep {
                step: i + 1,
                kind: s.kind(),
                name: s.name(),
                description: s.describe(),
                stateful: s.is_stateful(),
            })
            .collect();
        PlanExplanation {
            sources: self.sources.iter().map(|s| s.name.clone()).collect(),
            steps,
            concurrency: self.concurrency,
            buffer_length: self.buffer_length,
        }
    }
}

/// Output of [`Plan::explain`]; print it with `{}`.
#[derive(Clone, Debug)]
pub struct PlanExplanation {
    pub sources: Vec<String>,
    pub steps: Vec<ExplainStep>,
    pub concurrency: usize,
    pub buffer_length: usize,
}

#[derive(Clone, Debug)]
pub struct ExplainStep {
    pub step: usize,
    pub kind: &'static str,
    pub name: String,
    pub description: String,
    pub stateful: bool,
}

impl Display for PlanExplanation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        writeln!(
            f,
            "╔═══════════════════════════════════════════════════════════════╗"
        )?;
        writeln!(
            f,
            "║                    RULE PLAN EXPLANATION                      ║"
        )?;
        writeln!(
            f,
            "╚═══════════════════════════════════════════════════════════════╝"
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "┌─ SOURCES ────────────────────────────────────────────────────┐"
        )?;
        for s in &self.sources {
            writeln!(f, "│ {s}")?;
        }
        writeln!(f, "│ Concurrency:       {:>10}", self.concurrency)?;
        writeln!(f, "│ Buffer Length:     {:>10}", self.buffer_length)?;
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )?;
        writeln!(f)?;
        writeln!(
            f,
            "┌─ STAGES ─────────────────────────────────────────────────────┐"
        )?;
        for step in &self.steps {
            writeln!(
                f,
                "│ Step {}: {}{}",
                step.step,
                step.name,
                if step.stateful { " [STATEFUL]" } else { "" }
            )?;
            writeln!(f, "│   {}", step.description)?;
        }
        writeln!(
            f,
            "└──────────────────────────────────────────────────────────────┘"
        )
    }
}

/* ---------- compilation ---------- */

const WINDOW_FUNCTIONS: [&str; 5] = [
    "tumblingwindow",
    "hoppingwindow",
    "slidingwindow",
    "sessionwindow",
    "countwindow",
];

/// Compile `stmt` into a [`Plan`].
///
/// # Errors
///
/// Returns [`Error::Plan`] for statements that cannot run (missing or unknown
/// streams, unknown functions, bad arity, aggregates in `WHERE`, malformed
/// windows) and [`Error::Config`] for invalid option combinations (a join
/// without a window, `sendMetaToSink` with a window or several streams, event
/// time on a stream without a timestamp field).
pub fn build_plan(
    stmt: &SelectStatement,
    opts: &RuleOptions,
    catalog: &dyn StreamCatalog,
    functions: &FunctionRegistry,
) -> Result<Plan> {
    opts.validate()?;
    if stmt.sources.is_empty() {
        return Err(Error::plan("FROM clause must name a stream"));
    }
    if stmt.sources.len() > 1 {
        return Err(Error::plan(format!(
            "FROM clause names {} streams; join further streams with JOIN",
            stmt.sources.len()
        )));
    }
    if stmt.fields.is_empty() {
        return Err(Error::plan("SELECT list must not be empty"));
    }

    let names = stmt.stream_names();
    let mut sources = Vec::with_capacity(names.len());
    for name in &names {
        let def = catalog
            .get(name)
            .ok_or_else(|| Error::plan(format!("stream {name} is not found")))?;
        if opts.is_event_time && def.timestamp_field.is_none() {
            return Err(Error::config(format!(
                "stream {name} has no timestamp field but the rule runs in event time"
            )));
        }
        sources.push(def);
    }

    validate_expressions(stmt, functions)?;

    let window = stmt.window();
    if names.len() > 1 && window.is_none() {
        return Err(Error::config("a join requires a window"));
    }
    if opts.send_meta_to_sink && (window.is_some() || names.len() > 1) {
        return Err(Error::config(
            "sendMetaToSink is not supported with a window or a join",
        ));
    }

    let aggregate_fields: Vec<String> = stmt
        .fields
        .iter()
        .filter(|f| functions.has_aggregate(&f.expr))
        .map(|f| f.output_name().to_string())
        .collect();
    let having_aggregates = stmt.having.as_ref().is_some_and(|h| functions.has_aggregate(h));

    let mut stages = Vec::new();
    for def in &sources {
        stages.push(Stage::Preprocess {
            stream: def.clone(),
            is_event_time: opts.is_event_time,
        });
    }
    if let Some(spec) = window {
        if let Some(filter) = &spec.filter {
            stages.push(Stage::WindowFilter { condition: filter.clone() });
        }
        stages.push(Stage::Window { config: window_config(spec, opts)? });
        if names.len() > 1 {
            stages.push(Stage::Join {
                from: names[0].clone(),
                joins: stmt.joins.clone(),
            });
        }
    }
    if let Some(condition) = &stmt.condition {
        stages.push(Stage::Filter { condition: condition.clone() });
    }
    if !stmt.group_exprs().is_empty() || !aggregate_fields.is_empty() || having_aggregates {
        stages.push(Stage::Aggregate { dimensions: stmt.group_exprs().to_vec() });
    }
    if let Some(condition) = &stmt.having {
        stages.push(Stage::Having { condition: condition.clone() });
    }
    if !stmt.sort_fields.is_empty() {
        stages.push(Stage::Order { sort_fields: stmt.sort_fields.clone() });
    }
    stages.push(Stage::Project {
        fields: stmt.fields.clone(),
        aggregate_fields,
        send_meta: opts.send_meta_to_sink,
    });

    Ok(Plan {
        stages,
        sources,
        concurrency: opts.concurrency,
        buffer_length: opts.buffer_length,
    })
}

fn validate_expressions(stmt: &SelectStatement, functions: &FunctionRegistry) -> Result<()> {
    let mut all: Vec<&Expr> = stmt.fields.iter().map(|f| &f.expr).collect();
    all.extend(stmt.condition.iter());
    all.extend(stmt.having.iter());
    all.extend(stmt.group_exprs().iter());
    all.extend(stmt.sort_fields.iter().map(|s| &s.expr));
    all.extend(stmt.joins.iter().filter_map(|j| j.condition.as_ref()));
    if let Some(f) = stmt.window().and_then(|w| w.filter.as_ref()) {
        all.push(f);
    }

    for e in stmt.group_exprs() {
        if let Expr::Call { name, .. } = e
            && WINDOW_FUNCTIONS.contains(&name.to_ascii_lowercase().as_str())
        {
            return Err(Error::plan("only one window is allowed in GROUP BY"));
        }
    }
    for e in all {
        functions.validate(e)?;
    }

    let no_aggregates = [
        ("WHERE", stmt.condition.as_ref()),
        ("window filter", stmt.window().and_then(|w| w.filter.as_ref())),
    ];
    for (clause, expr) in no_aggregates {
        if expr.is_some_and(|e| functions.has_aggregate(e)) {
            return Err(Error::plan(format!("aggregate functions are not allowed in {clause}")));
        }
    }
    if stmt.group_exprs().iter().any(|e| functions.has_aggregate(e)) {
        return Err(Error::plan("aggregate functions are not allowed in GROUP BY"));
    }
    for j in &stmt.joins {
        if j.condition.is_none() && j.kind != crate::ast::JoinKind::Cross {
            return Err(Error::plan(format!("join with {} needs an ON condition", j.stream)));
        }
    }
    Ok(())
}

fn window_config(spec: &WindowSpec, opts: &RuleOptions) -> Result<WindowConfig> {
    if spec.length <= 0 {
        return Err(Error::plan(format!("{} length must be positive", spec.kind)));
    }
    if let Some(i) = spec.interval
        && i <= 0
    {
        return Err(Error::plan(format!("{} interval must be positive", spec.kind)));
    }
    match spec.kind {
        WindowKind::Hopping => match spec.interval {
            None => return Err(Error::plan("HOPPINGWINDOW needs a hop interval")),
            Some(i) if i > spec.length => {
                return Err(Error::plan("HOPPINGWINDOW hop must not exceed its length"));
            }
            Some(_) => {}
        },
        WindowKind::Sliding | WindowKind::Count => {
            if spec.interval.is_some_and(|i| i > spec.length) {
                return Err(Error::plan(format!(
                    "{} interval must not exceed its length",
                    spec.kind
                )));
            }
        }
        WindowKind::Session => {
            if spec.interval.is_some_and(|max| max < spec.length) {
                return Err(Error::plan(
                    "SESSIONWINDOW max duration must not be shorter than its gap",
                ));
            }
        }
        WindowKind::Tumbling => {}
    }
    let (length, interval) = match spec.kind {
        WindowKind::Count => (spec.length, spec.interval),
        _ => (
            spec.unit.to_millis(spec.length),
            spec.interval.map(|i| spec.unit.to_millis(i)),
        ),
    };
    Ok(WindowConfig {
        kind: spec.kind,
        length,
        interval,
        late_tolerance: opts.late_tolerance,
        is_event_time: opts.is_event_time,
    })
}
