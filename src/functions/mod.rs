//! Built-in and plugin function resolution.
//!
//! Function names resolve through the built-in categories in a fixed order
//! (math, string, conversion, hash, json, other, aggregate) and only then
//! through registered [`FunctionPlugin`]s. The first category that knows a
//! name wins, so a plugin can never replace a built-in.
//!
//! A [`FunctionRegistry`] is an ordinary value: build one, register plugins on
//! it, and hand it to the query compiler. Nothing here is global.
//!
//! ```
//! use streamrule::functions::{FunctionRegistry, Resolved};
//!
//! let registry = FunctionRegistry::new();
//! assert!(matches!(registry.resolve("abs"), Ok(Resolved::Builtin(_))));
//! assert!(registry.is_aggregate("count"));
//! assert!(registry.resolve("no_such_fn").is_err());
//! ```

pub mod aggregate;
pub mod conversion;
pub mod hash;
pub mod json;
pub mod math;
pub mod other;
pub mod strings;

use crate::ast::Expr;
use crate::error::{Error, Result};
use crate::tuple::Row;
use crate::value::Value;
use crate::window::Window;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter, Result as FormatResult};
use std::sync::Arc;

pub use aggregate::{Accumulator, AggregateFunc};
pub use conversion::ConversionFunc;
pub use hash::HashFunc;
pub use json::JsonFunc;
pub use math::MathFunc;
pub use other::OtherFunc;
pub use strings::StringFunc;

/// User-provided function loaded alongside the built-ins.
pub trait FunctionPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Aggregate plugins receive one array per argument holding that
    /// argument's value for every row of the group.
    fn is_aggregate(&self) -> bool {
        false
    }

    fn validate(&self, _arg_count: usize) -> anyhow::Result<()> {
        Ok(())
    }

    fn exec(&self, args: &[Value]) -> anyhow::Result<Value>;
}

/// A built-in function, tagged by category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Builtin {
    Math(MathFunc),
    Str(StringFunc),
    Conversion(ConversionFunc),
    Hash(HashFunc),
    Json(JsonFunc),
    Other(OtherFunc),
    Aggregate(AggregateFunc),
}

impl Builtin {
    /// Look a name up through the built-in tables in resolution order.
    #[must_use]
    pub fn lookup(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        let n = lower.as_str();
        MathFunc::from_name(n)
            .map(Self::Math)
            .or_else(|| StringFunc::from_name(n).map(Self::Str))
            .or_else(|| ConversionFunc::from_name(n).map(Self::Conversion))
            .or_else(|| HashFunc::from_name(n).map(Self::Hash))
            .or_else(|| JsonFunc::from_name(n).map(Self::Json))
            .or_else(|| OtherFunc::from_name(n).map(Self::Other))
            .or_else(|| AggregateFunc::from_name(n).map(Self::Aggregate))
    }

    /// Accepted argument count range (inclusive).
    #[must_use]
    pub fn arity(&self) -> (usize, usize) {
        match self {
            Self::Math(f) => f.arity(),
            Self::Str(f) => f.arity(),
            Self::Conversion(f) => f.arity(),
            Self::Hash(_) => (1, 1),
            Self::Json(_) => (2, 2),
            Self::Other(f) => f.arity(),
            Self::Aggregate(f) => f.arity(),
        }
    }

    /// Evaluate a scalar built-in. Aggregates go through [`Accumulator`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] on bad argument types.
    pub fn call(&self, args: &[Value], env: &FuncEnv<'_>) -> Result<Value> {
        match self {
            Self::Math(f) => f.call(args),
            Self::Str(f) => f.call(args),
            Self::Conversion(f) => f.call(args),
            Self::Hash(f) => f.call(args),
            Self::Json(f) => f.call(args),
            Self::Other(f) => f.call(args, env),
            Self::Aggregate(f) => Err(Error::runtime(format!(
                "aggregate function {f:?} used outside an aggregate context"
            ))),
        }
    }
}

/// Evaluation context visible to context-aware functions (`meta`,
/// `window_start`, `window_end`).
#[derive(Clone, Copy, Default)]
pub struct FuncEnv<'a> {
    pub row: Option<&'a dyn Row>,
    pub window: Option<Window>,
}

/// Result of resolving a function name.
#[derive(Clone)]
pub enum Resolved {
    Builtin(Builtin),
    Plugin(Arc<dyn FunctionPlugin>),
}

impl Resolved {
    #[must_use]
    pub fn is_aggregate(&self) -> bool {
        match self {
            Self::Builtin(Builtin::Aggregate(_)) => true,
            Self::Builtin(_) => false,
            Self::Plugin(p) => p.is_aggregate(),
        }
    }
}

impl Debug for Resolved {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        match self {
            Self::Builtin(b) => write!(f, "Builtin({b:?})"),
            Self::Plugin(p) => write!(f, "Plugin({})", p.name()),
        }
    }
}

/// Resolves function names for the compiler and the evaluator.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    plugins: HashMap<String, Arc<dyn FunctionPlugin>>,
}

impl FunctionRegistry {
    /// Registry with only the built-in functions.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin. Names are case-insensitive; a later plugin with the same
    /// name replaces the earlier one.
    pub fn register(&mut self, plugin: Arc<dyn FunctionPlugin>) {
        self.plugins
            .insert(plugin.name().to_ascii_lowercase(), plugin);
    }

    #[must_use]
    pub fn with_plugin(mut self, plugin: Arc<dyn FunctionPlugin>) -> Self {
        self.register(plugin);
        self
    }

    /// Resolve a function name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Plan`] for an unknown function.
    pub fn resolve(&self, name: &str) -> Result<Resolved> {
        if let Some(b) = Builtin::lookup(name) {
            return Ok(Resolved::Builtin(b));
        }
        self.plugins
            .get(&name.to_ascii_lowercase())
            .map(|p| Resolved::Plugin(Arc::clone(p)))
            .ok_or_else(|| Error::plan(format!("unknown function {name}")))
    }

    #[must_use]
    pub fn is_aggregate(&self, name: &str) -> bool {
        self.resolve(name).is_ok_and(|r| r.is_aggregate())
    }

    /// Whether the expression contains an aggregate call anywhere inside it.
    #[must_use]
    pub fn has_aggregate(&self, expr: &Expr) -> bool {
        let mut found = false;
        expr.walk(&mut |e| {
            if let Expr::Call { name, .. } = e
                && self.is_aggregate(name)
            {
                found = true;
            }
        });
        found
    }

    /// Check every call inside `expr`: the name must resolve and the argument
    /// count must be accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Plan`] describing the first invalid call.
    pub fn validate(&self, expr: &Expr) -> Result<()> {
        let mut first_err = None;
        expr.walk(&mut |e| {
            if first_err.is_some() {
                return;
            }
            if let Expr::Call { name, args } = e {
                let res = self.resolve(name).and_then(|r| match r {
                    Resolved::Builtin(b) => {
                        let (lo, hi) = b.arity();
                        if args.len() < lo || args.len() > hi {
                            Err(Error::plan(format!(
                                "function {name} expects {lo}..={hi} arguments, got {}",
                                args.len()
                            )))
                        } else {
                            Ok(())
                        }
                    }
                    Resolved::Plugin(p) => p
                        .validate(args.len())
                        .map_err(|e| Error::plan(format!("function {name}: {e}"))),
                });
                if let Err(e) = res {
                    first_err = Some(e);
                }
            }
        });
        first_err.map_or(Ok(()), Err)
    }
}

impl Debug for FunctionRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let mut names: Vec<_> = self.plugins.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("plugins", &names)
            .finish()
    }
}

/* ---------- shared argument helpers ---------- */

pub(crate) fn num_arg(name: &str, args: &[Value], i: usize) -> Result<f64> {
    args.get(i)
        .and_then(Value::as_f64)
        .ok_or_else(|| Error::runtime(format!("{name}: argument {} must be numeric", i + 1)))
}

pub(crate) fn int_arg(name: &str, args: &[Value], i: usize) -> Result<i64> {
    args.get(i)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::runtime(format!("{name}: argument {} must be an integer", i + 1)))
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a str> {
    args.get(i)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::runtime(format!("{name}: argument {} must be a string", i + 1)))
}
