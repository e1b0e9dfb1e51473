use super::{OpContext, Operator};
use crate::ast::{Join, JoinKind};
use crate::error::Result;
use crate::expr::{Evaluator, Scope};
use crate::tuple::{Data, JoinTuple, JoinTuples, Tuple, WindowTuples};
use crate::window::Window;

/// Joins the tuples of one window across streams.
///
/// All streams share the same window. The first FROM stream seeds the rows;
/// each join then combines the current rows with the tuples of its stream.
pub struct JoinOp {
    from: String,
    joins: Vec<Join>,
    evaluator: Evaluator,
}

impl JoinOp {
    #[must_use]
    pub fn new(from: String, joins: Vec<Join>, evaluator: Evaluator) -> Self {
        Self { from, joins, evaluator }
    }

    fn matches(&self, join: &Join, row: &JoinTuple, window: Window) -> Result<bool> {
        match &join.condition {
            None => Ok(true),
            Some(c) => self
                .evaluator
                .eval_bool(c, &Scope::row(row).with_window(Some(window))),
        }
    }

    fn join(&self, w: WindowTuples) -> Result<JoinTuples> {
        let of_stream = |name: &str| -> Vec<Tuple> {
            w.tuples
                .iter()
                .filter(|t| t.emitter.eq_ignore_ascii_case(name))
                .cloned()
                .collect()
        };
        let mut rows: Vec<JoinTuple> = of_stream(&self.from).into_iter().map(JoinTuple::single).collect();

        for join in &self.joins {
            let right = of_stream(&join.stream);
            let mut next = Vec::new();
            let mut right_matched = vec![false; right.len()];
            for left in &rows {
                let mut matched = false;
                for (i, r) in right.iter().enumerate() {
                    let candidate = left.with(r.clone());
                    if join.kind == JoinKind::Cross || self.matches(join, &candidate, w.window)? {
                        matched = true;
                        right_matched[i] = true;
                        next.push(candidate);
                    }
                }
                if !matched && matches!(join.kind, JoinKind::Left | JoinKind::Full) {
                    next.push(left.clone());
                }
            }
            if matches!(join.kind, JoinKind::Right | JoinKind::Full) {
                for (r, _) in right.into_iter().zip(&right_matched).filter(|(_, m)| !**m) {
                    next.push(JoinTuple::single(r));
                }
            }
            rows = next;
        }
        Ok(JoinTuples { window: w.window, rows })
    }
}

impl Operator for JoinOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        match data {
            Data::Window(w) => match self.join(w) {
                Ok(j) if j.rows.is_empty() => None,
                Ok(j) => Some(Data::Joined(j)),
                Err(e) => Some(Data::Error(e.to_string())),
            },
            other => Some(other),
        }
    }
}
