//! String functions.

use super::{int_arg, str_arg};
use crate::error::{Error, Result};
use crate::value::Value;
use regex::Regex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StringFunc {
    Concat,
    EndsWith,
    IndexOf,
    Length,
    Lower,
    Lpad,
    Ltrim,
    NumBytes,
    RegexpMatches,
    RegexpReplace,
    RegexpSubstr,
    Rpad,
    Rtrim,
    SplitValue,
    StartsWith,
    Substring,
    Trim,
    Upper,
}

impl StringFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "concat" => Self::Concat,
            "endswith" => Self::EndsWith,
            "indexof" => Self::IndexOf,
            "length" => Self::Length,
            "lower" => Self::Lower,
            "lpad" => Self::Lpad,
            "ltrim" => Self::Ltrim,
            "numbytes" => Self::NumBytes,
            "regexp_matches" => Self::RegexpMatches,
            "regexp_replace" => Self::RegexpReplace,
            "regexp_substr" => Self::RegexpSubstr,
            "rpad" => Self::Rpad,
            "rtrim" => Self::Rtrim,
            "split_value" => Self::SplitValue,
            "startswith" => Self::StartsWith,
            "substring" => Self::Substring,
            "trim" => Self::Trim,
            "upper" => Self::Upper,
            _ => return None,
        })
    }

    pub fn arity(self) -> (usize, usize) {
        match self {
            Self::Concat => (1, usize::MAX),
            Self::Length | Self::Lower | Self::Ltrim | Self::NumBytes | Self::Rtrim | Self::Trim
            | Self::Upper => (1, 1),
            Self::EndsWith
            | Self::IndexOf
            | Self::Lpad
            | Self::Rpad
            | Self::RegexpMatches
            | Self::RegexpSubstr
            | Self::StartsWith => (2, 2),
            Self::Substring => (2, 3),
            Self::RegexpReplace | Self::SplitValue => (3, 3),
        }
    }

    pub fn call(self, args: &[Value]) -> Result<Value> {
        let name = format!("{self:?}").to_ascii_lowercase();
        let s = |i| str_arg(&name, args, i);
        let v = match self {
            Self::Concat => {
                let mut out = String::new();
                for a in args {
                    if !a.is_null() {
                        out.push_str(&a.to_string());
                    }
                }
                Value::String(out)
            }
            Self::EndsWith => Value::Bool(s(0)?.ends_with(s(1)?)),
            Self::StartsWith => Value::Bool(s(0)?.starts_with(s(1)?)),
            Self::IndexOf => {
                let hay = s(0)?;
                let idx = hay
                    .find(s(1)?)
                    .map_or(-1, |b| char_len(&hay[..b]));
                Value::Int(idx)
            }
            Self::Length => Value::Int(char_len(s(0)?)),
            Self::NumBytes => Value::Int(i64::try_from(s(0)?.len()).unwrap_or(i64::MAX)),
            Self::Lower => Value::String(s(0)?.to_lowercase()),
            Self::Upper => Value::String(s(0)?.to_uppercase()),
            Self::Trim => Value::String(s(0)?.trim().to_string()),
            Self::Ltrim => Value::String(s(0)?.trim_start().to_string()),
            Self::Rtrim => Value::String(s(0)?.trim_end().to_string()),
            Self::Lpad => {
                let n = pad_width(&name, args)?;
                Value::String(format!("{}{}", " ".repeat(n), s(0)?))
            }
            Self::Rpad => {
                let n = pad_width(&name, args)?;
                Value::String(format!("{}{}", s(0)?, " ".repeat(n)))
            }
            Self::RegexpMatches => Value::Bool(regex(s(1)?)?.is_match(s(0)?)),
            Self::RegexpReplace => {
                Value::String(regex(s(1)?)?.replace_all(s(0)?, s(2)?).into_owned())
            }
            Self::RegexpSubstr => regex(s(1)?)?
                .find(s(0)?)
                .map_or(Value::Null, |m| Value::String(m.as_str().to_string())),
            Self::SplitValue => {
                let sep = s(1)?;
                if sep.is_empty() {
                    return Err(Error::runtime("split_value: separator must not be empty"));
                }
                let idx = count(&name, args, 2)?;
                s(0)?
                    .split(sep)
                    .nth(idx)
                    .map_or(Value::Null, |p| Value::String(p.to_string()))
            }
            Self::Substring => {
                let chars: Vec<char> = s(0)?.chars().collect();
                let start = count(&name, args, 1)?.min(chars.len());
                let end = if args.len() == 3 {
                    count(&name, args, 2)?.clamp(start, chars.len())
                } else {
                    chars.len()
                };
                Value::String(chars[start..end].iter().collect())
            }
        };
        Ok(v)
    }
}

fn char_len(s: &str) -> i64 {
    i64::try_from(s.chars().count()).unwrap_or(i64::MAX)
}

fn count(name: &str, args: &[Value], i: usize) -> Result<usize> {
    let n = int_arg(name, args, i)?;
    usize::try_from(n)
        .map_err(|_| Error::runtime(format!("{name}: argument {} must not be negative", i + 1)))
}

/// Padding longer than this is rejected rather than allocated.
const MAX_PAD: usize = 1 << 20;

fn pad_width(name: &str, args: &[Value]) -> Result<usize> {
    let n = count(name, args, 1)?;
    if n > MAX_PAD {
        return Err(Error::runtime(format!("{name}: padding {n} exceeds {MAX_PAD}")));
    }
    Ok(n)
}

fn regex(pattern: &str) -> Result<Regex> {
    crate::utils::cached_regex(pattern).map_err(|e| Error::runtime(format!("invalid regular expression: {e}")))
}
