//! Aggregate functions.
//!
//! Each aggregate is folded with an [`Accumulator`]: `create` an empty one per
//! group, `add_input` every row's argument value, then `finish`. Null inputs are
//! skipped by every aggregate except `collect`.

use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateFunc {
    Avg,
    Count,
    Max,
    Min,
    Sum,
    Collect,
    Deduplicate,
    Stddev,
    Var,
}

impl AggregateFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "avg" => Self::Avg,
            "count" => Self::Count,
            "max" => Self::Max,
            "min" => Self::Min,
            "sum" => Self::Sum,
            "collect" => Self::Collect,
            "deduplicate" => Self::Deduplicate,
            "stddev" => Self::Stddev,
            "var" => Self::Var,
            _ => return None,
        })
    }

    pub fn arity(self) -> (usize, usize) {
        (1, 1)
    }

    /// Fresh accumulator for one group.
    #[must_use]
    pub fn create(self) -> Accumulator {
        match self {
            Self::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            Self::Count => Accumulator::Count(0),
            Self::Max => Accumulator::Max(None),
            Self::Min => Accumulator::Min(None),
            Self::Sum => Accumulator::Sum(None),
            Self::Collect => Accumulator::Collect(Vec::new()),
            Self::Deduplicate => Accumulator::Deduplicate(Vec::new()),
            Self::Stddev => Accumulator::Moments { n: 0, mean: 0.0, m2: 0.0, stddev: true },
            Self::Var => Accumulator::Moments { n: 0, mean: 0.0, m2: 0.0, stddev: false },
        }
    }

    /// Fold all `values` into a single result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when a value has the wrong type for the
    /// aggregate (for example `sum` over strings).
    pub fn fold<'a>(self, values: impl IntoIterator<Item = &'a Value>) -> Result<Value> {
        let mut acc = self.create();
        for v in values {
            acc.add_input(v)?;
        }
        Ok(acc.finish())
    }
}

/// Running state of one aggregate over one group.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Accumulator {
    Avg { sum: f64, n: u64 },
    Count(i64),
    Max(Option<Value>),
    Min(Option<Value>),
    Sum(Option<Value>),
    Collect(Vec<Value>),
    Deduplicate(Vec<Value>),
    /// Welford running moments.
    Moments { n: u64, mean: f64, m2: f64, stddev: bool },
}

impl Accumulator {
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] for non-numeric input to a numeric aggregate.
    pub fn add_input(&mut self, v: &Value) -> Result<()> {
        if let Self::Collect(items) = self {
            items.push(v.clone());
            return Ok(());
        }
        if v.is_null() {
            return Ok(());
        }
        match self {
            Self::Count(n) => *n += 1,
            Self::Avg { sum, n } => {
                *sum += numeric("avg", v)?;
                *n += 1;
            }
            Self::Max(cur) => {
                if cur.as_ref().is_none_or(|c| v.sort_cmp(c).is_gt()) {
                    *cur = Some(v.clone());
                }
            }
            Self::Min(cur) => {
                if cur.as_ref().is_none_or(|c| v.sort_cmp(c).is_lt()) {
                    *cur = Some(v.clone());
                }
            }
            Self::Sum(cur) => {
                numeric("sum", v)?;
                *cur = Some(match (cur.take(), v) {
                    (None, v) => v.clone(),
                    (Some(Value::Int(a)), Value::Int(b)) => Value::Int(a.wrapping_add(*b)),
                    (Some(a), b) => {
                        Value::float(a.as_f64().unwrap_or_default() + b.as_f64().unwrap_or_default())
                    }
                });
            }
            Self::Deduplicate(items) => {
                if !items.contains(v) {
                    items.push(v.clone());
                }
            }
            Self::Moments { n, mean, m2, .. } => {
                let x = numeric("var", v)?;
                *n += 1;
                let delta = x - *mean;
                #[allow(clippy::cast_precision_loss)]
                {
                    *mean += delta / *n as f64;
                }
                *m2 += delta * (x - *mean);
            }
            Self::Collect(_) => {}
        }
        Ok(())
    }

    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn finish(self) -> Value {
        match self {
            Self::Count(n) => Value::Int(n),
            Self::Avg { n: 0, .. } => Value::Null,
            Self::Avg { sum, n } => Value::float(sum / n as f64),
            Self::Max(v) | Self::Min(v) | Self::Sum(v) => v.unwrap_or_default(),
            Self::Collect(items) | Self::Deduplicate(items) => Value::Array(items),
            Self::Moments { n: 0, .. } => Value::Null,
            Self::Moments { n, m2, stddev, .. } => {
                let var = m2 / n as f64;
                Value::float(if stddev { var.sqrt() } else { var })
            }
        }
    }
}

fn numeric(name: &str, v: &Value) -> Result<f64> {
    v.as_f64()
        .ok_or_else(|| Error::runtime(format!("{name}: expected a number, got {}", v.type_name())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_skips_nulls() {
        let vals = [Value::Int(1), Value::Null, Value::Int(3)];
        assert_eq!(AggregateFunc::Count.fold(&vals).unwrap(), Value::Int(2));
    }

    #[test]
    fn sum_promotes_to_float() {
        let vals = [Value::Int(1), Value::float(0.5)];
        assert_eq!(AggregateFunc::Sum.fold(&vals).unwrap(), Value::float(1.5));
    }

    #[test]
    fn var_is_population_variance() {
        let vals = [Value::Int(2), Value::Int(4), Value::Int(4), Value::Int(4), Value::Int(5),
            Value::Int(5), Value::Int(7), Value::Int(9)];
        let var = AggregateFunc::Var.fold(&vals).unwrap().as_f64().unwrap();
        let sd = AggregateFunc::Stddev.fold(&vals).unwrap().as_f64().unwrap();
        assert!((var - 4.0).abs() < 1e-9);
        assert!((sd - 2.0).abs() < 1e-9);
    }
}
