//! Expression evaluation over rows and groups.
//!
//! An [`Evaluator`] resolves function calls through a [`FunctionRegistry`] and
//! evaluates [`Expr`] trees against a [`Scope`]. A scope is either a single
//! row, or a group of rows in which aggregate calls fold over every row and
//! plain field references read the first row.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::error::{Error, Result};
use crate::functions::{Builtin, FuncEnv, FunctionRegistry, OtherFunc, Resolved};
use crate::tuple::{Row, RowItem};
use crate::value::Value;
use crate::window::Window;
use regex::Regex;
use std::cmp::Ordering;
use std::sync::Arc;

/// What an expression is evaluated against.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    row: Option<&'a dyn Row>,
    group: Option<&'a [RowItem]>,
    window: Option<Window>,
}

impl<'a> Scope<'a> {
    #[must_use]
    pub fn row(row: &'a dyn Row) -> Self {
        Self { row: Some(row), group: None, window: None }
    }

    /// A group of rows. Non-aggregate references read the first row.
    #[must_use]
    pub fn group(rows: &'a [RowItem]) -> Self {
        Self {
            row: rows.first().map(|r| r as &dyn Row),
            group: Some(rows),
            window: None,
        }
    }

    #[must_use]
    pub fn with_window(mut self, window: Option<Window>) -> Self {
        self.window = window;
        self
    }

    fn env(&self) -> FuncEnv<'a> {
        FuncEnv { row: self.row, window: self.window }
    }
}

/// Evaluates expressions; cheap to clone.
#[derive(Clone, Debug, Default)]
pub struct Evaluator {
    registry: Arc<FunctionRegistry>,
}

impl Evaluator {
    #[must_use]
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Evaluate `expr` in `scope`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when a function fails or operand types do
    /// not fit the operator.
    pub fn eval(&self, expr: &Expr, scope: &Scope<'_>) -> Result<Value> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Field { stream, name } => Ok(scope
                .row
                .and_then(|r| r.value(stream.as_deref(), name))
                .unwrap_or_default()),
            Expr::Wildcard { stream } => Ok(Value::Object(
                scope.row.map(|r| r.all(stream.as_deref())).unwrap_or_default(),
            )),
            Expr::Unary { op, expr } => {
                let v = self.eval(expr, scope)?;
                match (op, v) {
                    (_, Value::Null) => Ok(Value::Null),
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => Ok(Value::Int(-i)),
                    (UnaryOp::Neg, Value::Float(f)) => Ok(Value::float(-f.0)),
                    (op, v) => Err(Error::runtime(format!(
                        "invalid operand {} for {op:?}",
                        v.type_name()
                    ))),
                }
            }
            Expr::Binary { op, left, right } => self.eval_binary(*op, left, right, scope),
            Expr::Member { expr, key } => Ok(match self.eval(expr, scope)? {
                Value::Object(mut m) => m.swap_remove(key).unwrap_or_default(),
                _ => Value::Null,
            }),
            Expr::Index { expr, index } => {
                let target = self.eval(expr, scope)?;
                let idx = self.eval(index, scope)?;
                Ok(match (target, idx.as_i64()) {
                    (Value::Array(a), Some(i)) => {
                        let len = i64::try_from(a.len()).unwrap_or(i64::MAX);
                        let i = if i < 0 { len + i } else { i };
                        usize::try_from(i)
                            .ok()
                            .and_then(|i| a.into_iter().nth(i))
                            .unwrap_or_default()
                    }
                    _ => Value::Null,
                })
            }
            Expr::Call { name, args } => self.eval_call(name, args, scope),
        }
    }

    /// Evaluate a condition. Anything other than `true` (including null and
    /// non-boolean results) counts as false.
    ///
    /// # Errors
    ///
    /// Propagates evaluation errors.
    pub fn eval_bool(&self, expr: &Expr, scope: &Scope<'_>) -> Result<bool> {
        Ok(matches!(self.eval(expr, scope)?, Value::Bool(true)))
    }

    fn eval_call(&self, name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value> {
        match self.registry.resolve(name)? {
            Resolved::Builtin(Builtin::Aggregate(func)) => {
                let arg = args
                    .first()
                    .ok_or_else(|| Error::runtime(format!("{name} expects one argument")))?;
                let mut acc = func.create();
                for row in scope_rows(scope) {
                    let v = self.eval(arg, &Scope::row(row).with_window(scope.window))?;
                    acc.add_input(&v)?;
                }
                Ok(acc.finish())
            }
            Resolved::Builtin(Builtin::Other(OtherFunc::Meta)) => {
                let (stream, key) = match args.first() {
                    Some(Expr::Field { stream, name }) => (stream.clone(), name.clone()),
                    Some(other) => match self.eval(other, scope)? {
                        Value::String(s) => (None, s),
                        v => {
                            return Err(Error::runtime(format!(
                                "meta: key must be a string, got {}",
                                v.type_name()
                            )));
                        }
                    },
                    None => return Err(Error::runtime("meta expects one argument")),
                };
                Ok(scope
                    .row
                    .and_then(|r| r.meta(stream.as_deref(), &key))
                    .unwrap_or_default())
            }
            Resolved::Builtin(b) => {
                let values = self.eval_args(args, scope)?;
                b.call(&values, &scope.env())
            }
            Resolved::Plugin(p) if p.is_aggregate() => {
                let mut columns = vec![Vec::new(); args.len()];
                for row in scope_rows(scope) {
                    let row_scope = Scope::row(row).with_window(scope.window);
                    for (col, a) in columns.iter_mut().zip(args) {
                        col.push(self.eval(a, &row_scope)?);
                    }
                }
                let values: Vec<Value> = columns.into_iter().map(Value::Array).collect();
                p.exec(&values)
                    .map_err(|e| Error::runtime(format!("{name}: {e}")))
            }
            Resolved::Plugin(p) => {
                let values = self.eval_args(args, scope)?;
                p.exec(&values)
                    .map_err(|e| Error::runtime(format!("{name}: {e}")))
            }
        }
    }

    fn eval_args(&self, args: &[Expr], scope: &Scope<'_>) -> Result<Vec<Value>> {
        args.iter().map(|a| self.eval(a, scope)).collect()
    }

    fn eval_binary(&self, op: BinaryOp, left: &Expr, right: &Expr, scope: &Scope<'_>) -> Result<Value> {
        let l = self.eval(left, scope)?;
        // short-circuit logic
        match (op, &l) {
            (BinaryOp::And, Value::Bool(false)) => return Ok(Value::Bool(false)),
            (BinaryOp::Or, Value::Bool(true)) => return Ok(Value::Bool(true)),
            _ => {}
        }
        let r = self.eval(right, scope)?;
        match op {
            BinaryOp::And | BinaryOp::Or => match (&l, &r) {
                (Value::Bool(_), Value::Bool(b)) => Ok(Value::Bool(*b)),
                (Value::Null, _) | (_, Value::Null) => Ok(Value::Null),
                _ => Err(type_error(op, &l, &r)),
            },
            _ if l.is_null() || r.is_null() => Ok(Value::Null),
            BinaryOp::Eq => Ok(Value::Bool(equal(&l, &r))),
            BinaryOp::NotEq => Ok(Value::Bool(!equal(&l, &r))),
            BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
                let ord = l.compare(&r).ok_or_else(|| type_error(op, &l, &r))?;
                Ok(Value::Bool(match op {
                    BinaryOp::Lt => ord == Ordering::Less,
                    BinaryOp::LtEq => ord != Ordering::Greater,
                    BinaryOp::Gt => ord == Ordering::Greater,
                    _ => ord != Ordering::Less,
                }))
            }
            BinaryOp::Like => match (&l, &r) {
                (Value::String(s), Value::String(p)) => Ok(Value::Bool(like(p)?.is_match(s))),
                _ => Err(type_error(op, &l, &r)),
            },
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => match (&l, &r) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(match op {
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    _ => a ^ b,
                })),
                _ => Err(type_error(op, &l, &r)),
            },
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                arithmetic(op, &l, &r)
            }
        }
    }
}

fn scope_rows<'a>(scope: &Scope<'a>) -> Vec<&'a dyn Row> {
    match (scope.group, scope.row) {
        (Some(rows), _) => rows.iter().map(|r| r as &dyn Row).collect(),
        (None, Some(row)) => vec![row],
        (None, None) => Vec::new(),
    }
}

fn equal(l: &Value, r: &Value) -> bool {
    l.compare(r).map_or_else(|| l == r, Ordering::is_eq)
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    if let (Value::Int(a), Value::Int(b)) = (l, r) {
        let res = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Div if *b == 0 => return Err(Error::runtime("division by zero")),
            BinaryOp::Div => a.checked_div(*b),
            BinaryOp::Mod if *b == 0 => return Err(Error::runtime("division by zero")),
            _ => a.checked_rem(*b),
        };
        return res
            .map(Value::Int)
            .ok_or_else(|| Error::runtime(format!("integer overflow in {a} {op} {b}")));
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(type_error(op, l, r));
    };
    Ok(Value::float(match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        _ => a % b,
    }))
}

fn type_error(op: BinaryOp, l: &Value, r: &Value) -> Error {
    Error::runtime(format!(
        "invalid operation {} {op} {}",
        l.type_name(),
        r.type_name()
    ))
}

/// Translate a SQL `LIKE` pattern (`%`, `_`, `\` escape) into an anchored regex.
fn like(pattern: &str) -> Result<Regex> {
    let mut re = String::from("(?s)^");
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            '\\' => {
                if let Some(n) = chars.next() {
                    re.push_str(&regex::escape(&n.to_string()));
                }
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    crate::utils::cached_regex(&re).map_err(|e| Error::runtime(format!("invalid LIKE pattern {pattern}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_translates_wildcards() {
        let re = like("ab%_z").unwrap();
        assert!(re.is_match("abXYz"));
        assert!(!re.is_match("abz"));
        assert!(like("50\\%").unwrap().is_match("50%"));
    }

    #[test]
    fn mixed_arithmetic_promotes() {
        let v = arithmetic(BinaryOp::Add, &Value::Int(1), &Value::float(0.5)).unwrap();
        assert_eq!(v, Value::float(1.5));
        assert!(arithmetic(BinaryOp::Div, &Value::Int(1), &Value::Int(0)).is_err());
    }
}
