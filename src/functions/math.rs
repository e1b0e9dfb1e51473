//! Math functions.

use super::{int_arg, num_arg};
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MathFunc {
    Abs,
    Acos,
    Asin,
    Atan,
    Atan2,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    Ceil,
    Cos,
    Cosh,
    Exp,
    Floor,
    Ln,
    Log,
    Mod,
    Power,
    Rand,
    Round,
    Sign,
    Sin,
    Sinh,
    Sqrt,
    Tan,
    Tanh,
}

impl MathFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "abs" => Self::Abs,
            "acos" => Self::Acos,
            "asin" => Self::Asin,
            "atan" => Self::Atan,
            "atan2" => Self::Atan2,
            "bitand" => Self::BitAnd,
            "bitor" => Self::BitOr,
            "bitxor" => Self::BitXor,
            "bitnot" => Self::BitNot,
            "ceil" | "ceiling" => Self::Ceil,
            "cos" => Self::Cos,
            "cosh" => Self::Cosh,
            "exp" => Self::Exp,
            "floor" => Self::Floor,
            "ln" => Self::Ln,
            "log" => Self::Log,
            "mod" => Self::Mod,
            "power" => Self::Power,
            "rand" => Self::Rand,
            "round" => Self::Round,
            "sign" => Self::Sign,
            "sin" => Self::Sin,
            "sinh" => Self::Sinh,
            "sqrt" => Self::Sqrt,
            "tan" => Self::Tan,
            "tanh" => Self::Tanh,
            _ => return None,
        })
    }

    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Rand => (0, 0),
            Self::Atan2 | Self::BitAnd | Self::BitOr | Self::BitXor | Self::Mod | Self::Power => {
                (2, 2)
            }
            Self::Log | Self::Round => (1, 2),
            _ => (1, 1),
        }
    }

    pub fn call(self, args: &[Value]) -> Result<Value> {
        let name = format!("{self:?}").to_ascii_lowercase();
        let unary = |f: fn(f64) -> f64| -> Result<Value> {
            Ok(Value::float(f(num_arg(&name, args, 0)?)))
        };
        match self {
            Self::Abs => match &args[0] {
                Value::Int(i) => Ok(Value::Int(i.wrapping_abs())),
                _ => unary(f64::abs),
            },
            Self::Acos => unary(f64::acos),
            Self::Asin => unary(f64::asin),
            Self::Atan => unary(f64::atan),
            Self::Atan2 => Ok(Value::float(
                num_arg(&name, args, 0)?.atan2(num_arg(&name, args, 1)?),
            )),
            Self::BitAnd => Ok(Value::Int(int_arg(&name, args, 0)? & int_arg(&name, args, 1)?)),
            Self::BitOr => Ok(Value::Int(int_arg(&name, args, 0)? | int_arg(&name, args, 1)?)),
            Self::BitXor => Ok(Value::Int(int_arg(&name, args, 0)? ^ int_arg(&name, args, 1)?)),
            Self::BitNot => Ok(Value::Int(!int_arg(&name, args, 0)?)),
            Self::Ceil => unary(f64::ceil),
            Self::Cos => unary(f64::cos),
            Self::Cosh => unary(f64::cosh),
            Self::Exp => unary(f64::exp),
            Self::Floor => unary(f64::floor),
            Self::Ln => unary(f64::ln),
            Self::Log => {
                if args.len() == 2 {
                    let base = num_arg(&name, args, 0)?;
                    Ok(Value::float(num_arg(&name, args, 1)?.log(base)))
                } else {
                    unary(f64::log10)
                }
            }
            Self::Mod => match (&args[0], &args[1]) {
                (Value::Int(_), Value::Int(0)) => Err(Error::runtime("mod: division by zero")),
                (Value::Int(a), Value::Int(b)) => a
                    .checked_rem(*b)
                    .map(Value::Int)
                    .ok_or_else(|| Error::runtime("mod: integer overflow")),
                _ => Ok(Value::float(num_arg(&name, args, 0)? % num_arg(&name, args, 1)?)),
            },
            Self::Power => Ok(Value::float(
                num_arg(&name, args, 0)?.powf(num_arg(&name, args, 1)?),
            )),
            Self::Rand => Ok(Value::float(pseudo_random())),
            Self::Round => {
                let x = num_arg(&name, args, 0)?;
                if args.len() == 2 {
                    let digits = i32::try_from(int_arg(&name, args, 1)?)
                        .map_err(|_| Error::runtime("round: digits out of range"))?;
                    let p = 10f64.powi(digits);
                    Ok(Value::float((x * p).round() / p))
                } else {
                    Ok(Value::float(x.round()))
                }
            }
            Self::Sign => {
                let x = num_arg(&name, args, 0)?;
                let s = if x > 0.0 {
                    1
                } else if x < 0.0 {
                    -1
                } else {
                    0
                };
                Ok(Value::Int(s))
            }
            Self::Sin => unary(f64::sin),
            Self::Sinh => unary(f64::sinh),
            Self::Sqrt => unary(f64::sqrt),
            Self::Tan => unary(f64::tan),
            Self::Tanh => unary(f64::tanh),
        }
    }
}

/// Cheap non-cryptographic random in [0, 1) seeded from the clock.
fn pseudo_random() -> f64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};
    let mut h = RandomState::new().build_hasher();
    h.write_i64(crate::utils::now_ms());
    #[allow(clippy::cast_precision_loss)]
    let r = (h.finish() >> 11) as f64 / (1u64 << 53) as f64;
    r
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mod_overflow_is_an_error() {
        let err = MathFunc::Mod
            .call(&[Value::Int(i64::MIN), Value::Int(-1)])
            .unwrap_err();
        assert!(matches!(err, Error::Runtime(_)), "{err}");
        let r = MathFunc::Mod.call(&[Value::Int(-7), Value::Int(3)]).unwrap();
        assert_eq!(r, Value::Int(-1));
    }
}
