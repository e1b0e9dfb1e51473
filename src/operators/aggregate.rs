use super::{OpContext, Operator};
use crate::ast::Expr;
use crate::error::Result;
use crate::expr::{Evaluator, Scope};
use crate::tuple::{Data, GroupedTuples, GroupedTuplesSet, Row, RowItem};
use crate::value::Value;
use crate::window::Window;
use indexmap::IndexMap;

/// Groups rows by the `GROUP BY` expressions, preserving first-seen group
/// order. With no expressions the whole collection is one group.
pub struct AggregateOp {
    dimensions: Vec<Expr>,
    evaluator: Evaluator,
}

impl AggregateOp {
    #[must_use]
    pub fn new(dimensions: Vec<Expr>, evaluator: Evaluator) -> Self {
        Self { dimensions, evaluator }
    }

    fn key(&self, row: &dyn Row, window: Option<Window>) -> Result<Vec<Value>> {
        let scope = Scope::row(row).with_window(window);
        self.dimensions
            .iter()
            .map(|d| self.evaluator.eval(d, &scope))
            .collect()
    }

    fn group(&self, rows: Vec<RowItem>, window: Option<Window>) -> Result<GroupedTuplesSet> {
        let mut groups: IndexMap<Vec<Value>, Vec<RowItem>> = IndexMap::new();
        for row in rows {
            let key = self.key(&row, window)?;
            groups.entry(key).or_default().push(row);
        }
        Ok(GroupedTuplesSet {
            window,
            groups: groups
                .into_iter()
                .map(|(key, rows)| GroupedTuples { key, rows })
                .collect(),
        })
    }
}

impl Operator for AggregateOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        let (rows, window) = match data {
            Data::Tuple(t) => (vec![RowItem::Tuple(t)], None),
            Data::Window(w) => (w.tuples.into_iter().map(RowItem::Tuple).collect(), Some(w.window)),
            Data::Joined(j) => (j.rows.into_iter().map(RowItem::Joined).collect(), Some(j.window)),
            other => return Some(other),
        };
        Some(match self.group(rows, window) {
            Ok(set) => Data::Grouped(set),
            Err(e) => Data::Error(e.to_string()),
        })
    }
}
