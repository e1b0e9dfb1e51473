//! Function resolution, built-in calls and plugins through the evaluator.

use std::sync::Arc;
use streamrule::ast::Expr;
use streamrule::error::Error;
use streamrule::expr::{Evaluator, Scope};
use streamrule::functions::{Builtin, FunctionPlugin, FunctionRegistry, MathFunc, Resolved};
use streamrule::testing::msg;
use streamrule::tuple::{RowItem, Tuple};
use streamrule::value::Value;
use streamrule::window::Window;

struct Double;

impl FunctionPlugin for Double {
    fn name(&self) -> &str {
        "double"
    }

    fn validate(&self, arg_count: usize) -> anyhow::Result<()> {
        anyhow::ensure!(arg_count == 1, "double takes one argument");
        Ok(())
    }

    fn exec(&self, args: &[Value]) -> anyhow::Result<Value> {
        let n = args[0].as_i64().ok_or_else(|| anyhow::anyhow!("not an integer"))?;
        Ok(Value::Int(n * 2))
    }
}

/// Aggregate plugin: max minus min of its single column.
struct Spread;

impl FunctionPlugin for Spread {
    fn name(&self) -> &str {
        "spread"
    }

    fn is_aggregate(&self) -> bool {
        true
    }

    fn exec(&self, args: &[Value]) -> anyhow::Result<Value> {
        let Value::Array(column) = &args[0] else {
            anyhow::bail!("expected a column");
        };
        let ints: Vec<i64> = column.iter().filter_map(Value::as_i64).collect();
        let hi = ints.iter().max().copied().unwrap_or_default();
        let lo = ints.iter().min().copied().unwrap_or_default();
        Ok(Value::Int(hi - lo))
    }
}

/// A plugin trying to shadow a built-in.
struct FakeAbs;

impl FunctionPlugin for FakeAbs {
    fn name(&self) -> &str {
        "ABS"
    }

    fn exec(&self, _args: &[Value]) -> anyhow::Result<Value> {
        Ok(Value::Int(-1))
    }
}

fn registry() -> Arc<FunctionRegistry> {
    Arc::new(
        FunctionRegistry::new()
            .with_plugin(Arc::new(Double))
            .with_plugin(Arc::new(Spread))
            .with_plugin(Arc::new(FakeAbs)),
    )
}

fn row(x: i64, name: &str) -> Tuple {
    Tuple::new("s", msg(&[("x", Value::Int(x)), ("name", Value::from(name))]), 0)
}

#[test]
fn test_resolution_order_and_case() {
    let r = registry();
    assert!(matches!(r.resolve("ABS"), Ok(Resolved::Builtin(Builtin::Math(MathFunc::Abs)))));
    assert!(matches!(r.resolve("Double"), Ok(Resolved::Plugin(_))));
    assert!(matches!(r.resolve("nope"), Err(Error::Plan(_))));

    assert!(r.is_aggregate("COUNT"));
    assert!(r.is_aggregate("spread"));
    assert!(!r.is_aggregate("double"));
    assert!(!r.is_aggregate("nope"));

    let nested = Expr::call("abs", vec![Expr::call("sum", vec![Expr::field("x")])]);
    assert!(r.has_aggregate(&nested));
    assert!(!r.has_aggregate(&Expr::call("upper", vec![Expr::field("name")])));
}

#[test]
fn test_validate_arity() {
    let r = registry();
    assert!(r.validate(&Expr::call("substring", vec![Expr::field("name"), Expr::lit(1)])).is_ok());
    assert!(matches!(
        r.validate(&Expr::call("upper", vec![])),
        Err(Error::Plan(_))
    ));
    assert!(matches!(
        r.validate(&Expr::call("double", vec![Expr::lit(1), Expr::lit(2)])),
        Err(Error::Plan(_))
    ));
    // the failing call is found inside nested expressions
    let nested = Expr::call("abs", vec![Expr::call("window_end", vec![Expr::lit(1)])]);
    assert!(r.validate(&nested).is_err());
}

#[test]
fn test_scalar_builtins_and_plugins() {
    let ev = Evaluator::new(registry());
    let t = row(-21, "Hello");
    let scope = Scope::row(&t);
    let eval = |e: Expr| ev.eval(&e, &scope).unwrap();

    assert_eq!(eval(Expr::call("abs", vec![Expr::field("x")])), Value::Int(21));
    assert_eq!(eval(Expr::call("upper", vec![Expr::field("name")])), Value::from("HELLO"));
    assert_eq!(
        eval(Expr::call("concat", vec![Expr::field("name"), Expr::lit("!"), Expr::lit(Value::Null)])),
        Value::from("Hello!")
    );
    assert_eq!(eval(Expr::call("length", vec![Expr::field("name")])), Value::Int(5));
    assert_eq!(
        eval(Expr::call("sha256", vec![Expr::lit("abc")])),
        Value::from("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );
    assert_eq!(eval(Expr::call("double", vec![Expr::field("x")])), Value::Int(-42));
    assert_eq!(eval(Expr::call("coalesce", vec![Expr::field("missing"), Expr::lit(7)])), Value::Int(7));
    assert_eq!(eval(Expr::call("window_start", vec![])), Value::Null);

    // plugin errors surface as runtime errors
    let err = ev
        .eval(&Expr::call("double", vec![Expr::field("name")]), &scope)
        .unwrap_err();
    assert!(matches!(err, Error::Runtime(_)), "{err}");
}

#[test]
fn test_aggregates_fold_over_group() {
    let ev = Evaluator::new(registry());
    let rows: Vec<RowItem> = [3, 9, 4, 1]
        .into_iter()
        .map(|x| RowItem::Tuple(row(x, "n")))
        .collect();
    let scope = Scope::group(&rows).with_window(Some(Window::new(100, 200)));
    let eval = |e: Expr| ev.eval(&e, &scope).unwrap();

    assert_eq!(eval(Expr::call("count", vec![Expr::field("x")])), Value::Int(4));
    assert_eq!(eval(Expr::call("sum", vec![Expr::field("x")])), Value::Int(17));
    assert_eq!(eval(Expr::call("max", vec![Expr::field("x")])), Value::Int(9));
    assert_eq!(eval(Expr::call("min", vec![Expr::field("x")])), Value::Int(1));
    assert_eq!(eval(Expr::call("spread", vec![Expr::field("x")])), Value::Int(8));
    // plain references read the first row of the group
    assert_eq!(eval(Expr::field("x")), Value::Int(3));
    assert_eq!(eval(Expr::call("window_end", vec![])), Value::Int(200));
}
