//! Operator library: one transform per compiled [`Stage`].
//!
//! Operators are stateless with respect to the stream. They take one [`Data`]
//! value and return the transformed value, or `None` when the input is
//! dropped (a filter that evaluates to false). Per-tuple failures come back as
//! [`Data::Error`]; incoming errors pass through untouched so sinks see them.
//!
//! Windowing keeps state across tuples and is driven by its own node (see
//! [`window`]), so it is not an [`Operator`].
//!
//! ```
//! use std::sync::Arc;
//! use streamrule::ast::{BinaryOp, Expr};
//! use streamrule::expr::Evaluator;
//! use streamrule::operators::{FilterOp, OpContext, Operator};
//! use streamrule::tuple::{Data, Tuple};
//! use streamrule::value::{Message, Value};
//!
//! let op = FilterOp::new(
//!     Expr::binary(BinaryOp::Gt, Expr::field("x"), Expr::lit(3)),
//!     Evaluator::default(),
//! );
//! let ctx = OpContext::new("r1", "filter", 0);
//! let mut m = Message::new();
//! m.insert("x".into(), Value::Int(5));
//! assert!(op.apply(&ctx, Data::Tuple(Tuple::new("s", m, 0))).is_some());
//! ```

mod aggregate;
mod filter;
mod join;
mod order;
mod preprocess;
mod project;
pub mod window;

pub use aggregate::AggregateOp;
pub use filter::{FilterOp, HavingOp};
pub use join::JoinOp;
pub use order::OrderOp;
pub use preprocess::PreprocessOp;
pub use project::{META_KEY, ProjectOp};

use crate::expr::Evaluator;
use crate::planner::Stage;
use crate::tuple::Data;
use std::sync::Arc;

/// Identifies the operator instance a call runs in, for logging.
#[derive(Clone, Debug)]
pub struct OpContext {
    pub rule: String,
    pub op: String,
    pub instance: usize,
}

impl OpContext {
    pub fn new(rule: impl Into<String>, op: impl Into<String>, instance: usize) -> Self {
        Self {
            rule: rule.into(),
            op: op.into(),
            instance,
        }
    }
}

/// A transform unit implementing one stage.
pub trait Operator: Send + Sync {
    fn apply(&self, ctx: &OpContext, data: Data) -> Option<Data>;
}

/// Build the operator for a stateless stage. Returns `None` for the window
/// stage, which runs in its own node.
#[must_use]
pub fn build_operator(stage: &Stage, evaluator: &Evaluator) -> Option<Arc<dyn Operator>> {
    let ev = evaluator.clone();
    let op: Arc<dyn Operator> = match stage {
        Stage::Preprocess { stream, is_event_time } => {
            Arc::new(PreprocessOp::new(stream.clone(), *is_event_time))
        }
        Stage::WindowFilter { condition } | Stage::Filter { condition } => {
            Arc::new(FilterOp::new(condition.clone(), ev))
        }
        Stage::Window { .. } => return None,
        Stage::Join { from, joins } => Arc::new(JoinOp::new(from.clone(), joins.clone(), ev)),
        Stage::Aggregate { dimensions } => Arc::new(AggregateOp::new(dimensions.clone(), ev)),
        Stage::Having { condition } => Arc::new(HavingOp::new(condition.clone(), ev)),
        Stage::Order { sort_fields } => Arc::new(OrderOp::new(sort_fields.clone(), ev)),
        Stage::Project { fields, send_meta, .. } => {
            Arc::new(ProjectOp::new(fields.clone(), *send_meta, ev))
        }
    };
    Some(op)
}
