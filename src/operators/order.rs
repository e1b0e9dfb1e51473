use super::{OpContext, Operator};
use crate::ast::SortField;
use crate::error::Result;
use crate::expr::{Evaluator, Scope};
use crate::tuple::Data;
use crate::value::Value;
use std::cmp::Ordering;

/// `ORDER BY`: stable sort of a collection's rows (or groups).
pub struct OrderOp {
    sort_fields: Vec<SortField>,
    evaluator: Evaluator,
}

impl OrderOp {
    #[must_use]
    pub fn new(sort_fields: Vec<SortField>, evaluator: Evaluator) -> Self {
        Self { sort_fields, evaluator }
    }

    fn keys(&self, scope: &Scope<'_>) -> Result<Vec<Value>> {
        self.sort_fields
            .iter()
            .map(|s| self.evaluator.eval(&s.expr, scope))
            .collect()
    }

    fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for ((x, y), field) in a.iter().zip(b).zip(&self.sort_fields) {
            let ord = x.sort_cmp(y);
            let ord = if field.ascending { ord } else { ord.reverse() };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Sort `items` by precomputed keys.
    fn sort_by_keys<T>(&self, items: Vec<T>, keys: Vec<Vec<Value>>) -> Vec<T> {
        let mut keyed: Vec<(Vec<Value>, T)> = keys.into_iter().zip(items).collect();
        keyed.sort_by(|(a, _), (b, _)| self.compare(a, b));
        keyed.into_iter().map(|(_, t)| t).collect()
    }

    fn order(&self, data: Data) -> Result<Data> {
        Ok(match data {
            Data::Window(mut w) => {
                let keys = w
                    .tuples
                    .iter()
                    .map(|t| self.keys(&Scope::row(t).with_window(Some(w.window))))
                    .collect::<Result<Vec<_>>>()?;
                w.tuples = self.sort_by_keys(w.tuples, keys);
                Data::Window(w)
            }
            Data::Joined(mut j) => {
                let keys = j
                    .rows
                    .iter()
                    .map(|r| self.keys(&Scope::row(r).with_window(Some(j.window))))
                    .collect::<Result<Vec<_>>>()?;
                j.rows = self.sort_by_keys(j.rows, keys);
                Data::Joined(j)
            }
            Data::Grouped(mut g) => {
                let keys = g
                    .groups
                    .iter()
                    .map(|grp| self.keys(&Scope::group(&grp.rows).with_window(g.window)))
                    .collect::<Result<Vec<_>>>()?;
                g.groups = self.sort_by_keys(g.groups, keys);
                Data::Grouped(g)
            }
            other => other,
        })
    }
}

impl Operator for OrderOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        Some(self.order(data).unwrap_or_else(|e| Data::Error(e.to_string())))
    }
}
