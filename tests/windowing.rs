//! Window state machine scenarios, driven with explicit clocks.

use streamrule::ast::{Expr, Field};
use streamrule::expr::Evaluator;
use streamrule::operators::window::WindowOperator;
use streamrule::operators::{AggregateOp, OpContext, Operator, ProjectOp};
use streamrule::testing::msg;
use streamrule::tuple::{Data, Tuple, WindowTuples};
use streamrule::value::Value;
use streamrule::window::{Window, WindowConfig, WindowKind};

fn config(kind: WindowKind, length: i64, interval: Option<i64>) -> WindowConfig {
    WindowConfig {
        kind,
        length,
        interval,
        late_tolerance: 0,
        is_event_time: false,
    }
}

fn tuple(x: i64, ts: i64) -> Tuple {
    Tuple::new("s", msg(&[("x", Value::Int(x))]), ts)
}

fn xs(w: &WindowTuples) -> Vec<i64> {
    w.tuples
        .iter()
        .map(|t| t.message["x"].as_i64().unwrap())
        .collect()
}

/// Feed each tuple with the wall clock at its own timestamp.
fn feed(op: &mut WindowOperator, tuples: Vec<Tuple>) -> Vec<WindowTuples> {
    let mut out = Vec::new();
    for t in tuples {
        let now = t.timestamp;
        out.extend(op.on_tuple(t, now));
    }
    out
}

#[test]
fn test_hopping_window_counts() {
    // HOPPINGWINDOW(ss, 2, 1) fed at 10.0s, 10.5s and 11.2s
    let mut op = WindowOperator::new(config(WindowKind::Hopping, 2_000, Some(1_000)));
    let mut fired = feed(&mut op, vec![tuple(1, 10_000), tuple(2, 10_500), tuple(3, 11_200)]);
    fired.extend(op.on_tick(13_000));

    let windows: Vec<Window> = fired.iter().map(|w| w.window).collect();
    assert_eq!(
        windows,
        vec![
            Window::new(9_000, 11_000),
            Window::new(10_000, 12_000),
            Window::new(11_000, 13_000)
        ]
    );

    let ev = Evaluator::default();
    let agg = AggregateOp::new(Vec::new(), ev.clone());
    let project = ProjectOp::new(
        vec![Field::new("count", Expr::call("count", vec![Expr::field("x")]))],
        false,
        ev,
    );
    let ctx = OpContext::new("r1", "window", 0);
    let counts: Vec<Value> = fired
        .into_iter()
        .map(|w| {
            let grouped = agg.apply(&ctx, Data::Window(w)).unwrap();
            match project.apply(&ctx, grouped) {
                Some(Data::Rows(rows)) => {
                    assert_eq!(rows.len(), 1);
                    rows[0]["count"].clone()
                }
                other => panic!("unexpected {other:?}"),
            }
        })
        .collect();
    assert_eq!(counts, vec![Value::Int(2), Value::Int(3), Value::Int(1)]);
}

#[test]
fn test_tumbling_window_closes_on_tick() {
    let mut op = WindowOperator::new(config(WindowKind::Tumbling, 1_000, None));
    assert!(feed(&mut op, vec![tuple(1, 100), tuple(2, 900)]).is_empty());
    assert_eq!(op.next_deadline(), Some(1_000));

    let fired = op.on_tick(1_000);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, Window::new(0, 1_000));
    assert_eq!(xs(&fired[0]), vec![1, 2]);
    assert!(op.state().buffer.is_empty());
    assert_eq!(op.next_deadline(), None);

    // empty windows are never emitted
    assert!(op.on_tick(5_000).is_empty());
}

#[test]
fn test_event_time_drops_late_tuples() {
    let mut cfg = config(WindowKind::Tumbling, 1_000, None);
    cfg.is_event_time = true;
    let mut op = WindowOperator::new(cfg);

    assert!(op.on_tuple(tuple(1, 100), 0).is_empty());
    assert!(op.on_tuple(tuple(2, 900), 0).is_empty());
    let fired = op.on_tuple(tuple(3, 1_200), 0);
    assert_eq!(fired.len(), 1);
    assert_eq!(xs(&fired[0]), vec![1, 2]);
    assert_eq!(op.watermark(), Some(1_200));

    // behind the watermark
    assert!(op.on_tuple(tuple(4, 500), 0).is_empty());
    assert_eq!(op.state().buffer.len(), 1);
    // ticks never close event-time windows
    assert!(op.on_tick(i64::MAX / 2).is_empty());
}

#[test]
fn test_late_tolerance_holds_window_open() {
    let mut cfg = config(WindowKind::Tumbling, 1_000, None);
    cfg.is_event_time = true;
    cfg.late_tolerance = 500;
    let mut op = WindowOperator::new(cfg);

    assert!(op.on_tuple(tuple(1, 900), 0).is_empty());
    // watermark 700: window [0, 1000) stays open
    assert!(op.on_tuple(tuple(2, 1_200), 0).is_empty());
    // within tolerance, still lands in the first window
    assert!(op.on_tuple(tuple(3, 800), 0).is_empty());
    let fired = op.on_tuple(tuple(4, 1_600), 0);
    assert_eq!(fired.len(), 1);
    assert_eq!(xs(&fired[0]), vec![1, 3]);
}

#[test]
fn test_session_window_splits_on_gap() {
    let mut op = WindowOperator::new(config(WindowKind::Session, 2_000, Some(10_000)));
    let fired = feed(&mut op, vec![tuple(1, 1_000), tuple(2, 1_500), tuple(3, 5_000)]);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, Window::new(1_000, 3_500));
    assert_eq!(xs(&fired[0]), vec![1, 2]);

    assert_eq!(op.next_deadline(), Some(7_000));
    let fired = op.on_tick(7_000);
    assert_eq!(fired.len(), 1);
    assert_eq!(xs(&fired[0]), vec![3]);
}

#[test]
fn test_event_time_session_waits_for_watermark() {
    let mut cfg = config(WindowKind::Session, 1_000, None);
    cfg.is_event_time = true;
    cfg.late_tolerance = 5_000;
    let mut op = WindowOperator::new(cfg);

    assert!(op.on_tuple(tuple(1, 0), 0).is_empty());
    // a later session exists, but the watermark (-2000) has not passed the first
    assert!(op.on_tuple(tuple(2, 3_000), 0).is_empty());
    // late, within tolerance: joins the first session
    assert!(op.on_tuple(tuple(3, 800), 0).is_empty());
    assert_eq!(op.state().buffer.len(), 3);

    // watermark 2000 closes [0, 1800) only
    let fired = op.on_tuple(tuple(4, 7_000), 0);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, Window::new(0, 1_800));
    assert_eq!(xs(&fired[0]), vec![1, 3]);
    assert_eq!(op.state().buffer.len(), 2);
}

#[test]
fn test_sliding_window_triggers_per_tuple() {
    let mut op = WindowOperator::new(config(WindowKind::Sliding, 1_000, None));
    let fired = feed(&mut op, vec![tuple(1, 100), tuple(2, 600), tuple(3, 1_500)]);
    let contents: Vec<Vec<i64>> = fired.iter().map(xs).collect();
    assert_eq!(contents, vec![vec![1], vec![1, 2], vec![2, 3]]);
}

#[test]
fn test_sliding_window_delay() {
    let mut op = WindowOperator::new(config(WindowKind::Sliding, 1_000, Some(500)));
    assert!(feed(&mut op, vec![tuple(1, 100)]).is_empty());
    assert_eq!(op.next_deadline(), Some(600));
    assert!(feed(&mut op, vec![tuple(2, 400)]).is_empty());

    let fired = op.on_tick(600);
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].window, Window::new(-900, 600));
    assert_eq!(xs(&fired[0]), vec![1, 2]);
}

#[test]
fn test_count_window() {
    let mut op = WindowOperator::new(config(WindowKind::Count, 3, None));
    let fired = feed(&mut op, (1..=7).map(|i| tuple(i, i * 10)).collect());
    let contents: Vec<Vec<i64>> = fired.iter().map(xs).collect();
    assert_eq!(contents, vec![vec![1, 2, 3], vec![4, 5, 6]]);
    assert_eq!(op.state().buffer.len(), 1);
}

#[test]
fn test_count_window_with_interval() {
    let mut op = WindowOperator::new(config(WindowKind::Count, 3, Some(1)));
    let fired = feed(&mut op, (1..=5).map(|i| tuple(i, i)).collect());
    let contents: Vec<Vec<i64>> = fired.iter().map(xs).collect();
    assert_eq!(contents, vec![vec![1, 2, 3], vec![2, 3, 4], vec![3, 4, 5]]);
}

#[test]
fn test_restored_state_continues() {
    let cfg = config(WindowKind::Count, 2, None);
    let mut op = WindowOperator::new(cfg);
    assert!(feed(&mut op, vec![tuple(1, 1)]).is_empty());

    let mut restored = WindowOperator::restore(cfg, op.state().clone());
    let fired = feed(&mut restored, vec![tuple(2, 2)]);
    assert_eq!(fired.len(), 1);
    assert_eq!(xs(&fired[0]), vec![1, 2]);
}
