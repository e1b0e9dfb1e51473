//! Checkpointed rules resuming after a restart.

#![cfg(feature = "checkpointing")]

mod common;

use anyhow::Result;
use common::{WAIT, eventually};
use streamrule::ast::{Dimensions, WindowSpec};
use streamrule::config::{Qos, RuleOptions};
use streamrule::testing::{MemoryLog, TestEngine, column, memory_rule, msg, select};
use streamrule::value::Value;
use streamrule::window::{TimeUnit, WindowKind};
use tempfile::tempdir;

fn options(qos: Qos) -> RuleOptions {
    RuleOptions {
        qos,
        // checkpoints only when a test asks for one
        checkpoint_interval: 3_600_000,
        ..RuleOptions::default()
    }
}

fn push_x(log: &MemoryLog, xs: &[i64]) {
    for x in xs {
        log.push_message(msg(&[("x", Value::Int(*x))]));
    }
}

fn xs(values: Vec<Value>) -> Vec<i64> {
    values.iter().filter_map(Value::as_i64).collect()
}

#[tokio::test]
async fn test_exactly_once_replay_is_deduplicated() -> Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let engine = TestEngine::new(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    engine.define("SELECT x FROM demo", select("demo", &["x"]));

    let mut rule = memory_rule("r1", "SELECT x FROM demo", "out").with_options(options(Qos::ExactlyOnce));
    rule.actions[0]
        .props
        .insert("dedup".into(), serde_json::Value::Bool(true));
    engine.manager.create(rule)?;
    engine.manager.start("r1").await?;

    push_x(&log, &[1, 2, 3]);
    assert!(sink.wait_for_records(3, WAIT).await);
    let first_id = engine.manager.checkpoint_now("r1").await?;

    // delivered after the checkpoint: replayed on restart
    push_x(&log, &[4, 5]);
    assert!(sink.wait_for_records(5, WAIT).await);

    engine.manager.stop("r1").await?;
    engine.manager.start("r1").await?;

    let probe = sink.clone();
    assert!(eventually(WAIT, || {
        let probe = probe.clone();
        async move { probe.duplicates() == 2 }
    })
    .await);
    assert_eq!(xs(column(&sink.records(), "x")), vec![1, 2, 3, 4, 5]);

    push_x(&log, &[6]);
    assert!(sink.wait_for_records(6, WAIT).await);
    assert_eq!(xs(column(&sink.records(), "x")), vec![1, 2, 3, 4, 5, 6]);
    assert_eq!(sink.duplicates(), 2);

    let second_id = engine.manager.checkpoint_now("r1").await?;
    assert!(second_id > first_id);
    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_at_least_once_restores_window_and_offset() -> Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let engine = TestEngine::new(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");

    let mut stmt = select("demo", &["x"]);
    stmt.dimensions = Some(Dimensions {
        exprs: Vec::new(),
        window: Some(WindowSpec::new(WindowKind::Count, TimeUnit::Second, 3)),
    });
    engine.define("SELECT x FROM demo GROUP BY COUNTWINDOW(3)", stmt);
    let rule = memory_rule("r1", "SELECT x FROM demo GROUP BY COUNTWINDOW(3)", "out")
        .with_options(options(Qos::AtLeastOnce));
    engine.manager.create(rule)?;
    engine.manager.start("r1").await?;

    push_x(&log, &[1, 2]);
    let manager = &engine.manager;
    assert!(
        eventually(WAIT, || async move {
            manager.status("r1").await.metrics.get("op_window_0_records_in_total")
                == Some(&serde_json::json!(2))
        })
        .await
    );
    engine.manager.checkpoint_now("r1").await?;
    engine.manager.restart("r1").await?;

    // the two buffered tuples survived; the source does not read them again
    push_x(&log, &[3]);
    assert!(sink.wait_for_records(3, WAIT).await);
    assert_eq!(sink.results().len(), 1);
    assert_eq!(xs(column(&sink.records(), "x")), vec![1, 2, 3]);
    engine.manager.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_delete_removes_checkpoints() -> Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    let engine = TestEngine::new(dir.path());
    let log = engine.stream("demo");
    let sink = engine.sink("out");
    engine.define("SELECT x FROM demo", select("demo", &["x"]));

    let rule = || memory_rule("r1", "SELECT x FROM demo", "out").with_options(options(Qos::AtLeastOnce));
    engine.manager.create(rule())?;
    engine.manager.start("r1").await?;
    push_x(&log, &[1]);
    assert!(sink.wait_for_records(1, WAIT).await);
    engine.manager.checkpoint_now("r1").await?;

    let rule_dir = dir.path().join("checkpoints").join("r1");
    assert!(rule_dir.exists());
    engine.manager.delete("r1").await?;
    assert!(!rule_dir.exists());

    // a recreated rule starts from scratch and reads the whole log again
    engine.manager.create(rule())?;
    engine.manager.start("r1").await?;
    assert!(sink.wait_for_records(2, WAIT).await);
    assert_eq!(xs(column(&sink.records(), "x")), vec![1, 1]);
    engine.manager.shutdown().await;
    Ok(())
}
