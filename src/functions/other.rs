//! Miscellaneous functions, including the ones that read the evaluation
//! context (row metadata and the current window).

use super::{FuncEnv, str_arg};
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtherFunc {
    IsNull,
    Coalesce,
    Nanvl,
    Cardinality,
    Tstamp,
    Meta,
    WindowStart,
    WindowEnd,
}

impl OtherFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "isnull" => Self::IsNull,
            "coalesce" => Self::Coalesce,
            "nanvl" => Self::Nanvl,
            "cardinality" => Self::Cardinality,
            "tstamp" => Self::Tstamp,
            "meta" => Self::Meta,
            "window_start" => Self::WindowStart,
            "window_end" => Self::WindowEnd,
            _ => return None,
        })
    }

    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::IsNull | Self::Cardinality | Self::Meta => (1, 1),
            Self::Coalesce => (1, usize::MAX),
            Self::Nanvl => (2, 2),
            Self::Tstamp | Self::WindowStart | Self::WindowEnd => (0, 0),
        }
    }

    pub fn call(self, args: &[Value], env: &FuncEnv<'_>) -> Result<Value> {
        match self {
            Self::IsNull => Ok(Value::Bool(args[0].is_null())),
            Self::Coalesce => Ok(args
                .iter()
                .find(|v| !v.is_null())
                .cloned()
                .unwrap_or_default()),
            Self::Nanvl => match &args[0] {
                Value::Float(f) if f.0.is_nan() => Ok(args[1].clone()),
                other => Ok(other.clone()),
            },
            Self::Cardinality => match &args[0] {
                Value::Array(a) => Ok(Value::Int(i64::try_from(a.len()).unwrap_or(i64::MAX))),
                Value::Object(m) => Ok(Value::Int(i64::try_from(m.len()).unwrap_or(i64::MAX))),
                Value::Null => Ok(Value::Int(0)),
                other => Err(Error::runtime(format!(
                    "cardinality: expected array, got {}",
                    other.type_name()
                ))),
            },
            Self::Tstamp => Ok(Value::Int(crate::utils::now_ms())),
            Self::Meta => {
                let key = str_arg("meta", args, 0)?;
                Ok(env
                    .row
                    .and_then(|r| r.meta(None, key))
                    .unwrap_or_default())
            }
            Self::WindowStart => Ok(env.window.map_or(Value::Null, |w| Value::Int(w.start))),
            Self::WindowEnd => Ok(env.window.map_or(Value::Null, |w| Value::Int(w.end))),
        }
    }
}
