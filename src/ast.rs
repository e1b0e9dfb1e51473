//! Statement model: the shape a parsed `SELECT` takes inside the engine.
//!
//! The grammar itself lives outside this crate (see
//! [`StatementParser`](crate::rule::StatementParser)); this module only defines
//! the tree and a few helpers the query compiler needs.

use crate::value::Value;
use crate::window::{TimeUnit, WindowKind};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectStatement {
    pub fields: Vec<Field>,
    /// FROM streams. Only the first one is the primary stream; others must be
    /// introduced through `joins`.
    pub sources: Vec<String>,
    pub joins: Vec<Join>,
    pub condition: Option<Expr>,
    pub dimensions: Option<Dimensions>,
    pub having: Option<Expr>,
    pub sort_fields: Vec<SortField>,
}

impl SelectStatement {
    /// Window clause of GROUP BY, if any.
    #[must_use]
    pub fn window(&self) -> Option<&WindowSpec> {
        self.dimensions.as_ref().and_then(|d| d.window.as_ref())
    }

    /// Non-window GROUP BY expressions.
    #[must_use]
    pub fn group_exprs(&self) -> &[Expr] {
        self.dimensions.as_ref().map_or(&[], |d| d.exprs.as_slice())
    }

    /// Every stream referenced in FROM and JOIN, in declaration order,
    /// without duplicates.
    #[must_use]
    pub fn stream_names(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for s in self.sources.iter().chain(self.joins.iter().map(|j| &j.stream)) {
            if !out.iter().any(|o| o.eq_ignore_ascii_case(s)) {
                out.push(s.clone());
            }
        }
        out
    }
}

/// One projected column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Default output name (the column or function name).
    pub name: String,
    pub alias: Option<String>,
    pub expr: Expr,
}

impl Field {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        Self { name: name.into(), alias: None, expr }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Name of the column in the output record.
    #[must_use]
    pub fn output_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Dimensions {
    pub exprs: Vec<Expr>,
    pub window: Option<WindowSpec>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub kind: WindowKind,
    pub unit: TimeUnit,
    /// Window length in `unit`; for count windows, the number of tuples.
    pub length: i64,
    /// Hop size for hopping windows, max duration for session windows, or
    /// emit interval for count windows.
    pub interval: Option<i64>,
    /// `FILTER (WHERE ...)` applied to tuples before they enter the window.
    pub filter: Option<Expr>,
}

impl WindowSpec {
    pub fn new(kind: WindowKind, unit: TimeUnit, length: i64) -> Self {
        Self { kind, unit, length, interval: None, filter: None }
    }

    #[must_use]
    pub fn with_interval(mut self, interval: i64) -> Self {
        self.interval = Some(interval);
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Expr) -> Self {
        self.filter = Some(filter);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinKind {
    Inner,
    Left,
    Right,
    Full,
    Cross,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Join {
    pub stream: String,
    pub kind: JoinKind,
    pub condition: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub expr: Expr,
    pub ascending: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Like,
    BitAnd,
    BitOr,
    BitXor,
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::And => "AND",
            Self::Or => "OR",
            Self::Like => "LIKE",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A column, optionally qualified: `s.x` or `x`.
    Field { stream: Option<String>, name: String },
    /// `*` or `s.*`.
    Wildcard { stream: Option<String> },
    Literal(Value),
    Unary { op: UnaryOp, expr: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    /// `expr -> key` on an object value.
    Member { expr: Box<Expr>, key: String },
    /// `expr[i]` on an array value.
    Index { expr: Box<Expr>, index: Box<Expr> },
    Call { name: String, args: Vec<Expr> },
}

impl Expr {
    pub fn field(name: impl Into<String>) -> Self {
        Self::Field { stream: None, name: name.into() }
    }

    pub fn qualified(stream: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Field { stream: Some(stream.into()), name: name.into() }
    }

    pub fn lit(v: impl Into<Value>) -> Self {
        Self::Literal(v.into())
    }

    pub fn call(name: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call { name: name.into(), args }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Self::Binary { op, left: Box::new(left), right: Box::new(right) }
    }

    /// Visit this expression and all sub-expressions, depth first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Self::Unary { expr, .. } | Self::Member { expr, .. } => expr.walk(f),
            Self::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            Self::Index { expr, index } => {
                expr.walk(f);
                index.walk(f);
            }
            Self::Call { args, .. } => {
                for a in args {
                    a.walk(f);
                }
            }
            Self::Field { .. } | Self::Wildcard { .. } | Self::Literal(_) => {}
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Field { stream: Some(s), name } => write!(f, "{s}.{name}"),
            Self::Field { stream: None, name } => f.write_str(name),
            Self::Wildcard { stream: Some(s) } => write!(f, "{s}.*"),
            Self::Wildcard { stream: None } => f.write_str("*"),
            Self::Literal(Value::String(s)) => write!(f, "\"{s}\""),
            Self::Literal(v) => write!(f, "{v}"),
            Self::Unary { op: UnaryOp::Not, expr } => write!(f, "NOT {expr}"),
            Self::Unary { op: UnaryOp::Neg, expr } => write!(f, "-{expr}"),
            Self::Binary { op, left, right } => write!(f, "{left} {op} {right}"),
            Self::Member { expr, key } => write!(f, "{expr}->{key}"),
            Self::Index { expr, index } => write!(f, "{expr}[{index}]"),
            Self::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str(")")
            }
        }
    }
}
