//! Type conversion functions.

use super::{int_arg, str_arg};
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConversionFunc {
    Cast,
    Chr,
    Trunc,
    ToJson,
    ParseJson,
}

impl ConversionFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "cast" => Self::Cast,
            "chr" => Self::Chr,
            "trunc" => Self::Trunc,
            "to_json" => Self::ToJson,
            "parse_json" => Self::ParseJson,
            _ => return None,
        })
    }

    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Cast | Self::Trunc => (2, 2),
            Self::Chr | Self::ToJson | Self::ParseJson => (1, 1),
        }
    }

    pub fn call(self, args: &[Value]) -> Result<Value> {
        match self {
            Self::Cast => cast(&args[0], str_arg("cast", args, 1)?),
            Self::Chr => {
                let code = match &args[0] {
                    Value::String(s) => s.chars().next().map(u32::from),
                    other => other.as_i64().and_then(|i| u32::try_from(i).ok()),
                };
                code.and_then(char::from_u32)
                    .map(|c| Value::String(c.to_string()))
                    .ok_or_else(|| Error::runtime("chr: argument is not a valid code point"))
            }
            Self::Trunc => {
                let x = args[0]
                    .as_f64()
                    .ok_or_else(|| Error::runtime("trunc: argument 1 must be numeric"))?;
                let digits = i32::try_from(int_arg("trunc", args, 1)?)
                    .map_err(|_| Error::runtime("trunc: digits out of range"))?;
                let p = 10f64.powi(digits);
                Ok(Value::float((x * p).trunc() / p))
            }
            Self::ToJson => Ok(Value::String(args[0].to_json().to_string())),
            Self::ParseJson => {
                let s = str_arg("parse_json", args, 0)?;
                serde_json::from_str::<serde_json::Value>(s)
                    .map(Value::from)
                    .map_err(|e| Error::runtime(format!("parse_json: {e}")))
            }
        }
    }
}

/// Convert a value to the named type (`bigint`, `float`, `string`, `boolean`,
/// `datetime`).
///
/// # Errors
///
/// Returns [`Error::Runtime`] when the value cannot be represented in the
/// target type.
pub fn cast(v: &Value, target: &str) -> Result<Value> {
    let fail = || Error::runtime(format!("cannot cast {} {v} to {target}", v.type_name()));
    if v.is_null() {
        return Ok(Value::Null);
    }
    match target.to_ascii_lowercase().as_str() {
        "bigint" | "datetime" => match v {
            Value::Int(i) => Ok(Value::Int(*i)),
            #[allow(clippy::cast_possible_truncation)]
            Value::Float(f) => Ok(Value::Int(f.0 as i64)),
            Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::Int)
                .map_err(|_| fail()),
            _ => Err(fail()),
        },
        "float" => match v {
            Value::Bool(b) => Ok(Value::float(if *b { 1.0 } else { 0.0 })),
            Value::String(s) => s.trim().parse::<f64>().map(Value::float).map_err(|_| fail()),
            other => other.as_f64().map(Value::float).ok_or_else(fail),
        },
        "string" => Ok(Value::String(v.to_string())),
        "boolean" => match v {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::Int(i) => Ok(Value::Bool(*i != 0)),
            Value::Float(f) => Ok(Value::Bool(f.0 != 0.0)),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "t" => Ok(Value::Bool(true)),
                "false" | "0" | "f" => Ok(Value::Bool(false)),
                _ => Err(fail()),
            },
            _ => Err(fail()),
        },
        other => Err(Error::runtime(format!("cast: unknown type {other}"))),
    }
}
