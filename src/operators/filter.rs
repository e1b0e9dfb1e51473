use super::{OpContext, Operator};
use crate::ast::Expr;
use crate::error::Result;
use crate::expr::{Evaluator, Scope};
use crate::tuple::{Data, GroupedTuplesSet, JoinTuples, Row, RowItem, WindowTuples};

/// `WHERE` (and window `FILTER`): keeps rows whose condition is true.
///
/// On a collection, rows are filtered individually and an empty result is
/// dropped.
pub struct FilterOp {
    condition: Expr,
    evaluator: Evaluator,
}

impl FilterOp {
    #[must_use]
    pub fn new(condition: Expr, evaluator: Evaluator) -> Self {
        Self { condition, evaluator }
    }

    fn keep(&self, row: &dyn Row, window: Option<crate::window::Window>) -> Result<bool> {
        self.evaluator
            .eval_bool(&self.condition, &Scope::row(row).with_window(window))
    }

    fn filter(&self, data: Data) -> Result<Option<Data>> {
        Ok(match data {
            Data::Tuple(t) => self.keep(&t, None)?.then_some(Data::Tuple(t)),
            Data::Window(WindowTuples { window, tuples }) => {
                let mut kept = Vec::with_capacity(tuples.len());
                for t in tuples {
                    if self.keep(&t, Some(window))? {
                        kept.push(t);
                    }
                }
                (!kept.is_empty()).then_some(Data::Window(WindowTuples { window, tuples: kept }))
            }
            Data::Joined(JoinTuples { window, rows }) => {
                let mut kept = Vec::with_capacity(rows.len());
                for r in rows {
                    if self.keep(&r, Some(window))? {
                        kept.push(r);
                    }
                }
                (!kept.is_empty()).then_some(Data::Joined(JoinTuples { window, rows: kept }))
            }
            other => Some(other),
        })
    }
}

impl Operator for FilterOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        if data.is_error() {
            return Some(data);
        }
        self.filter(data).unwrap_or_else(|e| Some(Data::Error(e.to_string())))
    }
}

/// `HAVING`: filters groups after aggregation. Without a preceding aggregate
/// stage the whole collection is one group.
pub struct HavingOp {
    condition: Expr,
    evaluator: Evaluator,
}

impl HavingOp {
    #[must_use]
    pub fn new(condition: Expr, evaluator: Evaluator) -> Self {
        Self { condition, evaluator }
    }

    fn keep_group(&self, rows: &[RowItem], window: Option<crate::window::Window>) -> Result<bool> {
        self.evaluator
            .eval_bool(&self.condition, &Scope::group(rows).with_window(window))
    }

    fn filter(&self, data: Data) -> Result<Option<Data>> {
        Ok(match data {
            Data::Grouped(GroupedTuplesSet { window, groups }) => {
                let mut kept = Vec::with_capacity(groups.len());
                for g in groups {
                    if self.keep_group(&g.rows, window)? {
                        kept.push(g);
                    }
                }
                (!kept.is_empty()).then_some(Data::Grouped(GroupedTuplesSet { window, groups: kept }))
            }
            Data::Window(w) => {
                let rows: Vec<RowItem> = w.tuples.iter().cloned().map(RowItem::Tuple).collect();
                self.keep_group(&rows, Some(w.window))?.then_some(Data::Window(w))
            }
            Data::Joined(j) => {
                let rows: Vec<RowItem> = j.rows.iter().cloned().map(RowItem::Joined).collect();
                self.keep_group(&rows, Some(j.window))?.then_some(Data::Joined(j))
            }
            Data::Tuple(t) => self
                .evaluator
                .eval_bool(&self.condition, &Scope::row(&t))?
                .then_some(Data::Tuple(t)),
            other => Some(other),
        })
    }
}

impl Operator for HavingOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        if data.is_error() {
            return Some(data);
        }
        self.filter(data).unwrap_or_else(|e| Some(Data::Error(e.to_string())))
    }
}
