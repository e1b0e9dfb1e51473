//! Stateless operators over every data shape they accept.

use streamrule::ast::{BinaryOp, Expr, Field, Join, JoinKind, SortField};
use streamrule::catalog::{FieldType, StreamDefinition};
use streamrule::expr::Evaluator;
use streamrule::operators::{
    AggregateOp, FilterOp, HavingOp, JoinOp, META_KEY, OpContext, Operator, OrderOp, PreprocessOp, ProjectOp,
};
use streamrule::testing::{column, msg};
use streamrule::tuple::{Data, Tuple, WindowTuples};
use streamrule::value::{Message, Value};
use streamrule::window::Window;

fn ctx() -> OpContext {
    OpContext::new("r1", "test", 0)
}

fn tuple(stream: &str, fields: &[(&str, Value)]) -> Tuple {
    Tuple::new(stream, msg(fields), 0)
}

fn rows(data: Option<Data>) -> Vec<Message> {
    match data {
        Some(Data::Rows(rows)) => rows,
        other => panic!("expected rows, got {other:?}"),
    }
}

#[test]
fn test_filter_keeps_matching_tuples_in_order() {
    let op = FilterOp::new(
        Expr::binary(BinaryOp::Gt, Expr::field("x"), Expr::lit(3)),
        Evaluator::default(),
    );
    let project = ProjectOp::new(vec![Field::new("x", Expr::field("x"))], false, Evaluator::default());
    let out: Vec<Message> = [2, 5, 4]
        .into_iter()
        .filter_map(|x| op.apply(&ctx(), Data::Tuple(tuple("s", &[("x", Value::Int(x))]))))
        .flat_map(|d| rows(project.apply(&ctx(), d)))
        .collect();
    assert_eq!(column(&out, "x"), vec![Value::Int(5), Value::Int(4)]);
}

#[test]
fn test_filter_type_error_becomes_error_data() {
    let op = FilterOp::new(
        Expr::binary(BinaryOp::Gt, Expr::field("x"), Expr::lit(3)),
        Evaluator::default(),
    );
    let out = op.apply(&ctx(), Data::Tuple(tuple("s", &[("x", Value::from("abc"))])));
    assert!(matches!(out, Some(Data::Error(_))));

    // errors pass through untouched
    let passed = op.apply(&ctx(), Data::Error("boom".into()));
    assert_eq!(passed, Some(Data::Error("boom".into())));
}

#[test]
fn test_filter_on_window_drops_empty_result() {
    let op = FilterOp::new(
        Expr::binary(BinaryOp::Gt, Expr::field("x"), Expr::lit(10)),
        Evaluator::default(),
    );
    let w = WindowTuples {
        window: Window::new(0, 10),
        tuples: vec![tuple("s", &[("x", Value::Int(1))])],
    };
    assert_eq!(op.apply(&ctx(), Data::Window(w)), None);
}

#[test]
fn test_preprocess_conforms_to_schema() {
    let stream = StreamDefinition::new("typed", "memory")
        .with_field("x", FieldType::Bigint)
        .with_field("ts", FieldType::Bigint)
        .with_timestamp("ts");
    let op = PreprocessOp::new(stream, true);
    let input = Tuple::new(
        "raw",
        msg(&[("X", Value::from("42")), ("ts", Value::Int(1_000)), ("extra", Value::Bool(true))]),
        5,
    );
    match op.apply(&ctx(), Data::Tuple(input)) {
        Some(Data::Tuple(t)) => {
            assert_eq!(t.emitter, "typed");
            assert_eq!(t.timestamp, 1_000);
            assert_eq!(t.message["x"], Value::Int(42));
            assert!(!t.message.contains_key("extra"));
        }
        other => panic!("unexpected {other:?}"),
    }

    let bad = Tuple::new("raw", msg(&[("x", Value::from("nope")), ("ts", Value::Int(1))]), 5);
    assert!(matches!(op.apply(&ctx(), Data::Tuple(bad)), Some(Data::Error(_))));
}

#[test]
fn test_group_having_order_project() {
    let ev = Evaluator::default();
    let w = WindowTuples {
        window: Window::new(0, 1_000),
        tuples: vec![
            tuple("s", &[("color", Value::from("red")), ("size", Value::Int(1))]),
            tuple("s", &[("color", Value::from("blue")), ("size", Value::Int(5))]),
            tuple("s", &[("color", Value::from("red")), ("size", Value::Int(2))]),
            tuple("s", &[("color", Value::from("green")), ("size", Value::Int(9))]),
            tuple("s", &[("color", Value::from("blue")), ("size", Value::Int(7))]),
        ],
    };
    let count = || Expr::call("count", vec![Expr::field("size")]);

    let grouped = AggregateOp::new(vec![Expr::field("color")], ev.clone())
        .apply(&ctx(), Data::Window(w))
        .unwrap();
    let having = HavingOp::new(Expr::binary(BinaryOp::GtEq, count(), Expr::lit(2)), ev.clone())
        .apply(&ctx(), grouped)
        .unwrap();
    let ordered = OrderOp::new(
        vec![SortField { expr: Expr::call("max", vec![Expr::field("size")]), ascending: false }],
        ev.clone(),
    )
    .apply(&ctx(), having)
    .unwrap();
    let out = rows(
        ProjectOp::new(
            vec![
                Field::new("color", Expr::field("color")),
                Field::new("count", count()).with_alias("c"),
                Field::new("window_end", Expr::call("window_end", vec![])),
            ],
            false,
            ev,
        )
        .apply(&ctx(), ordered),
    );

    assert_eq!(column(&out, "color"), vec![Value::from("blue"), Value::from("red")]);
    assert_eq!(column(&out, "c"), vec![Value::Int(2), Value::Int(2)]);
    assert_eq!(column(&out, "window_end"), vec![Value::Int(1_000), Value::Int(1_000)]);
}

#[test]
fn test_window_join_kinds() {
    let ev = Evaluator::default();
    let w = WindowTuples {
        window: Window::new(0, 1_000),
        tuples: vec![
            tuple("a", &[("id", Value::Int(1)), ("l", Value::from("a1"))]),
            tuple("a", &[("id", Value::Int(2)), ("l", Value::from("a2"))]),
            tuple("b", &[("id", Value::Int(1)), ("r", Value::from("b1"))]),
            tuple("b", &[("id", Value::Int(3)), ("r", Value::from("b3"))]),
        ],
    };
    let on = Expr::binary(BinaryOp::Eq, Expr::qualified("a", "id"), Expr::qualified("b", "id"));
    let join = |kind| {
        JoinOp::new(
            "a".into(),
            vec![Join { stream: "b".into(), kind, condition: Some(on.clone()) }],
            ev.clone(),
        )
    };
    let project = ProjectOp::new(
        vec![
            Field::new("l", Expr::qualified("a", "l")),
            Field::new("r", Expr::qualified("b", "r")),
        ],
        false,
        ev.clone(),
    );
    let run = |kind| rows(project.apply(&ctx(), join(kind).apply(&ctx(), Data::Window(w.clone())).unwrap()));

    let inner = run(JoinKind::Inner);
    assert_eq!(column(&inner, "l"), vec![Value::from("a1")]);
    assert_eq!(column(&inner, "r"), vec![Value::from("b1")]);

    let left = run(JoinKind::Left);
    assert_eq!(column(&left, "l"), vec![Value::from("a1"), Value::from("a2")]);
    assert_eq!(column(&left, "r"), vec![Value::from("b1"), Value::Null]);

    let full = run(JoinKind::Full);
    assert_eq!(full.len(), 3);
    assert_eq!(column(&full, "r"), vec![Value::from("b1"), Value::Null, Value::from("b3")]);

    let cross = JoinOp::new(
        "a".into(),
        vec![Join { stream: "b".into(), kind: JoinKind::Cross, condition: None }],
        ev,
    );
    match cross.apply(&ctx(), Data::Window(w)) {
        Some(Data::Joined(j)) => assert_eq!(j.rows.len(), 4),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_project_wildcard_alias_and_meta() {
    let ev = Evaluator::default();
    let t = tuple("s", &[("a", Value::Int(1)), ("b", Value::Int(2))])
        .with_metadata(msg(&[("topic", Value::from("sensors"))]));

    let op = ProjectOp::new(
        vec![
            Field::new("*", Expr::Wildcard { stream: None }),
            Field::new("a", Expr::binary(BinaryOp::Mul, Expr::field("a"), Expr::lit(10))).with_alias("ten_a"),
            Field::new("meta", Expr::call("meta", vec![Expr::field("topic")])).with_alias("topic"),
        ],
        true,
        ev,
    );
    let out = rows(op.apply(&ctx(), Data::Tuple(t)));
    assert_eq!(out.len(), 1);
    let rec = &out[0];
    assert_eq!(rec["a"], Value::Int(1));
    assert_eq!(rec["b"], Value::Int(2));
    assert_eq!(rec["ten_a"], Value::Int(10));
    assert_eq!(rec["topic"], Value::from("sensors"));
    assert_eq!(rec[META_KEY], Value::Object(msg(&[("topic", Value::from("sensors"))])));
}
