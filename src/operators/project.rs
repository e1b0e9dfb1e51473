use super::{OpContext, Operator};
use crate::ast::{Expr, Field};
use crate::error::Result;
use crate::expr::{Evaluator, Scope};
use crate::tuple::{Data, Row};
use crate::value::{Message, Value};

/// Key under which source metadata is attached when `sendMetaToSink` is set.
pub const META_KEY: &str = "__meta";

/// Evaluates the `SELECT` list into sink-bound records.
///
/// A single tuple yields one record, a window or joined collection yields one
/// record per row, and a grouped set yields one record per group.
pub struct ProjectOp {
    fields: Vec<Field>,
    send_meta: bool,
    evaluator: Evaluator,
}

impl ProjectOp {
    #[must_use]
    pub fn new(fields: Vec<Field>, send_meta: bool, evaluator: Evaluator) -> Self {
        Self { fields, send_meta, evaluator }
    }

    fn record(&self, scope: &Scope<'_>) -> Result<Message> {
        let mut out = Message::with_capacity(self.fields.len());
        for f in &self.fields {
            match (&f.expr, self.evaluator.eval(&f.expr, scope)?) {
                (Expr::Wildcard { .. }, Value::Object(m)) if f.alias.is_none() => out.extend(m),
                (_, v) => {
                    out.insert(f.output_name().to_string(), v);
                }
            }
        }
        Ok(out)
    }

    fn project(&self, data: Data) -> Result<Vec<Message>> {
        match data {
            Data::Tuple(t) => {
                let mut rec = self.record(&Scope::row(&t))?;
                if self.send_meta {
                    rec.insert(META_KEY.to_string(), Value::Object(t.metadata));
                }
                Ok(vec![rec])
            }
            Data::Window(w) => w
                .tuples
                .iter()
                .map(|t| self.record(&Scope::row(t).with_window(Some(w.window))))
                .collect(),
            Data::Joined(j) => j
                .rows
                .iter()
                .map(|r| self.record(&Scope::row(r as &dyn Row).with_window(Some(j.window))))
                .collect(),
            Data::Grouped(g) => g
                .groups
                .iter()
                .map(|grp| self.record(&Scope::group(&grp.rows).with_window(g.window)))
                .collect(),
            Data::Rows(rows) => Ok(rows),
            Data::Error(e) => Err(crate::error::Error::Runtime(e)),
        }
    }
}

impl Operator for ProjectOp {
    fn apply(&self, _ctx: &OpContext, data: Data) -> Option<Data> {
        if data.is_error() {
            return Some(data);
        }
        Some(match self.project(data) {
            Ok(rows) => Data::Rows(rows),
            Err(e) => Data::Error(e.to_string()),
        })
    }
}
