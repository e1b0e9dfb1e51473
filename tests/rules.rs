//! Rule lifecycle end to end over memory connectors.

mod common;

use anyhow::Result;
use common::{WAIT, eventually};
use std::sync::Arc;
use streamrule::ast::{BinaryOp, Expr, Field};
use streamrule::config::{EngineConfig, RuleOptions};
use streamrule::error::Error;
use streamrule::functions::{FunctionPlugin, FunctionRegistry};
use streamrule::testing::{TestEngine, column, memory_rule, msg, select};
use streamrule::value::Value;
use tempfile::tempdir;

const FILTER_SQL: &str = "SELECT x FROM demo WHERE x > 3";

fn engine(dir: &std::path::Path) -> TestEngine {
    common::init_tracing();
    let engine = TestEngine::new(dir);
    let mut stmt = select("demo", &["x"]);
    stmt.condition = Some(Expr::binary(BinaryOp::Gt, Expr::field("x"), Expr::lit(3)));
    engine.define(FILTER_SQL, stmt);
    engine
}

fn push_x(log: &streamrule::testing::MemoryLog, xs: &[i64]) {
    for x in xs {
        log.push_message(msg(&[("x", Value::Int(*x))]));
    }
}

#[tokio::test]
async fn test_filter_rule_delivers_matches_in_order() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");

    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    engine.manager.start("r1").await?;
    push_x(&log, &[2, 5, 4]);

    assert!(sink.wait_for_records(2, WAIT).await);
    assert_eq!(column(&sink.records(), "x"), vec![Value::Int(5), Value::Int(4)]);
    // one delivery per input tuple
    assert_eq!(sink.results().len(), 2);

    let status = engine.manager.status("r1").await;
    assert_eq!(status.status, "Running");
    assert!(status.is_running());
    let manager = &engine.manager;
    assert!(
        eventually(WAIT, || async move {
            let m = manager.status("r1").await.metrics;
            m.get("sink_memory_0_0_records_in_total") == Some(&serde_json::json!(2))
        })
        .await
    );
    let metrics = engine.manager.status("r1").await.metrics;
    assert_eq!(metrics["source_demo_0_records_in_total"], 3);
    assert_eq!(metrics["op_filter_0_records_in_total"], 3);
    assert_eq!(metrics["op_filter_0_records_out_total"], 2);

    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_status_strings() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    engine.stream("demo");

    assert_eq!(engine.manager.status("nope").await.status, "Stopped: not found");

    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    assert_eq!(engine.manager.status("r1").await.status, "Stopped: canceled manually");

    engine.manager.start("r1").await?;
    assert_eq!(engine.manager.status("r1").await.status, "Running");

    engine.manager.stop("r1").await?;
    let status = engine.manager.status("r1").await;
    assert_eq!(status.status, "Stopped: canceled manually");
    assert!(status.metrics.is_empty());

    assert!(matches!(engine.manager.start("nope").await, Err(Error::NotFound(_))));
    assert!(matches!(engine.manager.stop("nope").await, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_start_and_stop_are_idempotent() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;

    engine.manager.start("r1").await?;
    engine.manager.start("r1").await?;
    assert!(engine.manager.registry().live_topologies() <= 1);

    push_x(&log, &[10]);
    assert!(sink.wait_for_records(1, WAIT).await);
    // a second start must not add a second reader
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(sink.records().len(), 1);

    engine.manager.stop("r1").await?;
    engine.manager.stop("r1").await?;
    assert_eq!(engine.manager.registry().live_topologies(), 0);

    engine.manager.restart("r1").await?;
    assert_eq!(engine.manager.status("r1").await.status, "Running");
    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_topology_graph() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    engine.stream("demo");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;

    let graph = engine.manager.topology("r1")?;
    assert_eq!(graph.sources, vec!["source_demo"]);
    let edges: Vec<(&str, Vec<&str>)> = graph
        .edges
        .iter()
        .map(|(k, v)| (k.as_str(), v.iter().map(String::as_str).collect()))
        .collect();
    assert_eq!(
        edges,
        vec![
            ("source_demo", vec!["op_demo_preprocess"]),
            ("op_demo_preprocess", vec!["op_filter"]),
            ("op_filter", vec!["op_project"]),
            ("op_project", vec!["sink_memory_0"]),
        ]
    );
    assert!(matches!(engine.manager.topology("nope"), Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_create_rejects_bad_rules() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    engine.stream("demo");

    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    assert!(matches!(
        engine.manager.create(memory_rule("r1", FILTER_SQL, "out")),
        Err(Error::Config(_))
    ));
    // unknown SQL
    assert!(matches!(
        engine.manager.create(memory_rule("r2", "SELECT nonsense", "out")),
        Err(Error::Plan(_))
    ));
    // no actions
    let bare = streamrule::Rule::new("r3", FILTER_SQL);
    assert!(matches!(engine.manager.create(bare), Err(Error::Config(_))));
    // unknown sink type
    let rule = streamrule::Rule::new("r4", FILTER_SQL).with_action(streamrule::Action::new("kafka"));
    assert!(engine.manager.create(rule).is_err());
    // invalid options
    let rule = memory_rule("r5", FILTER_SQL, "out").with_options(RuleOptions {
        concurrency: 0,
        ..RuleOptions::default()
    });
    assert!(matches!(engine.manager.create(rule), Err(Error::Config(_))));

    let ids: Vec<String> = engine.manager.list().await.into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["r1"]);
    Ok(())
}

#[tokio::test]
async fn test_update_and_delete() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let first = engine.sink("first");
    let second = engine.sink("second");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "first"))?;
    engine.manager.start("r1").await?;

    push_x(&log, &[7]);
    assert!(first.wait_for_records(1, WAIT).await);

    // a failing update leaves the old definition in place
    let broken = memory_rule("r1", "SELECT nonsense", "second");
    assert!(engine.manager.update(broken).await.is_err());
    assert_eq!(engine.manager.view("r1")?.sql, FILTER_SQL);

    engine.manager.update(memory_rule("r1", FILTER_SQL, "second")).await?;
    assert_eq!(engine.manager.status("r1").await.status, "Running");
    // qos 0 keeps no offsets: the new topology reads the log from the start
    push_x(&log, &[9]);
    assert!(second.wait_for_records(2, WAIT).await);
    assert_eq!(column(&second.records(), "x"), vec![Value::Int(7), Value::Int(9)]);

    engine.manager.delete("r1").await?;
    assert_eq!(engine.manager.status("r1").await.status, "Stopped: not found");
    assert!(engine.manager.list().await.is_empty());
    assert!(matches!(engine.manager.delete("r1").await, Err(Error::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_errors_reach_the_sink() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    engine.manager.start("r1").await?;

    log.push_message(msg(&[("x", Value::from("abc"))]));
    push_x(&log, &[8]);
    assert!(sink.wait_for_records(2, WAIT).await);

    let records = sink.records();
    assert!(records[0].contains_key("error"));
    assert_eq!(records[1]["x"], Value::Int(8));
    let metrics = engine.manager.status("r1").await.metrics;
    assert_eq!(metrics["op_filter_0_exceptions_total"], 1);
    // errors passing through are not counted again
    assert_eq!(metrics["op_project_0_exceptions_total"], 0);
    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_sink_retries_then_caches() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    engine.manager.start("r1").await?;

    // fails twice, third attempt succeeds
    sink.fail_next(2);
    push_x(&log, &[5]);
    assert!(sink.wait_for_records(1, WAIT).await);

    // fails the first attempt and all three retries: cached, resent before
    // the next result
    sink.fail_next(4);
    push_x(&log, &[6]);
    let manager = &engine.manager;
    assert!(
        eventually(WAIT, || async move {
            manager.status("r1").await.metrics.get("sink_memory_0_0_exceptions_total")
                == Some(&serde_json::json!(1))
        })
        .await
    );
    push_x(&log, &[7]);
    assert!(sink.wait_for_records(3, WAIT).await);
    assert_eq!(
        column(&sink.records(), "x"),
        vec![Value::Int(5), Value::Int(6), Value::Int(7)]
    );
    engine.manager.shutdown().await;
    Ok(())
}

#[cfg(feature = "checkpointing")]
#[tokio::test]
async fn test_checkpoint_now_requires_checkpointing_qos() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    engine.stream("demo");
    engine.manager.create(memory_rule("r1", FILTER_SQL, "out"))?;
    assert!(matches!(engine.manager.checkpoint_now("nope").await, Err(Error::NotFound(_))));

    engine.manager.start("r1").await?;
    assert!(matches!(engine.manager.checkpoint_now("r1").await, Err(Error::Config(_))));

    let rule = memory_rule("r2", FILTER_SQL, "out2").with_options(RuleOptions {
        qos: streamrule::config::Qos::AtLeastOnce,
        checkpoint_interval: 3_600_000,
        ..RuleOptions::default()
    });
    engine.manager.create(rule)?;
    engine.manager.start("r2").await?;
    let id = engine.manager.checkpoint_now("r2").await?;
    assert!(id > 0);
    let manager = &engine.manager;
    assert!(
        eventually(WAIT, || async move { manager.status("r2").await.last_checkpoint_id == Some(id) })
            .await
    );
    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_integer_overflow_is_a_tuple_error() -> Result<()> {
    let dir = tempdir()?;
    let engine = engine(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    let sql = "SELECT mod(x, -1) AS m FROM demo";
    let mut stmt = select("demo", &[]);
    stmt.fields = vec![Field::new("m", Expr::call("mod", vec![Expr::field("x"), Expr::lit(-1)]))];
    engine.define(sql, stmt);
    engine.manager.create(memory_rule("r1", sql, "out"))?;
    engine.manager.start("r1").await?;

    push_x(&log, &[i64::MIN, 7]);
    assert!(sink.wait_for_records(2, WAIT).await);
    let records = sink.records();
    assert!(records[0].contains_key("error"));
    assert_eq!(records[1]["m"], Value::Int(0));
    assert_eq!(engine.manager.status("r1").await.status, "Running");
    engine.manager.shutdown().await;
    Ok(())
}

/// Plugin that panics on every call.
struct Explode;

impl FunctionPlugin for Explode {
    fn name(&self) -> &str {
        "explode"
    }

    fn exec(&self, _args: &[Value]) -> anyhow::Result<Value> {
        panic!("explode called")
    }
}

#[tokio::test]
async fn test_panicking_operator_stops_the_rule() -> Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let functions = FunctionRegistry::new().with_plugin(Arc::new(Explode));
    let engine = TestEngine::with_functions(EngineConfig::default().with_data_dir(dir.path()), functions);
    let log = engine.stream("demo");
    engine.sink("out");
    let sql = "SELECT explode(x) AS y FROM demo";
    let mut stmt = select("demo", &[]);
    stmt.fields = vec![Field::new("y", Expr::call("explode", vec![Expr::field("x")]))];
    engine.define(sql, stmt);
    engine.manager.create(memory_rule("r1", sql, "out"))?;
    engine.manager.start("r1").await?;

    push_x(&log, &[1]);
    let manager = &engine.manager;
    assert!(
        eventually(WAIT, || async move {
            manager.status("r1").await.status.starts_with("Stopped: ")
        })
        .await
    );
    let status = engine.manager.status("r1").await.status;
    assert!(status.contains("panicked"), "{status}");
    engine.manager.shutdown().await;
    Ok(())
}
