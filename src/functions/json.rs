//! JSON path functions.
//!
//! Supports the common JSONPath subset: `$`, `.key`, `['key']`, `[n]`
//! (negative indexes count from the end) and `[*]` / `.*` wildcards.

use super::str_arg;
use crate::error::{Error, Result};
use crate::value::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JsonFunc {
    PathExists,
    PathQuery,
    PathQueryFirst,
}

impl JsonFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "json_path_exists" => Self::PathExists,
            "json_path_query" => Self::PathQuery,
            "json_path_query_first" => Self::PathQueryFirst,
            _ => return None,
        })
    }

    pub fn call(self, args: &[Value]) -> Result<Value> {
        let root = match &args[0] {
            Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
                .map_or_else(|_| args[0].clone(), Value::from),
            other => other.clone(),
        };
        let path = parse_path(str_arg("json_path", args, 1)?)?;
        let matches = select(&root, &path);
        Ok(match self {
            Self::PathExists => Value::Bool(!matches.is_empty()),
            Self::PathQuery => match matches.len() {
                0 => Value::Null,
                1 if !path.iter().any(Segment::is_wildcard) => matches[0].clone(),
                _ => Value::Array(matches.into_iter().cloned().collect()),
            },
            Self::PathQueryFirst => matches.first().map_or(Value::Null, |v| (*v).clone()),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
}

impl Segment {
    fn is_wildcard(&self) -> bool {
        matches!(self, Self::Wildcard)
    }
}

fn parse_path(path: &str) -> Result<Vec<Segment>> {
    let bad = || Error::runtime(format!("invalid json path {path}"));
    let rest = path.trim().strip_prefix('$').ok_or_else(bad)?;
    let chars: Vec<char> = rest.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '.' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && chars[end] != '.' && chars[end] != '[' {
                    end += 1;
                }
                let key: String = chars[start..end].iter().collect();
                if key.is_empty() {
                    return Err(bad());
                }
                out.push(if key == "*" { Segment::Wildcard } else { Segment::Key(key) });
                i = end;
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(bad)?;
                let inner: String = chars[i + 1..close].iter().collect();
                let inner = inner.trim();
                let seg = if inner == "*" {
                    Segment::Wildcard
                } else if let Some(q) = inner
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                {
                    Segment::Key(q.to_string())
                } else {
                    Segment::Index(inner.parse().map_err(|_| bad())?)
                };
                out.push(seg);
                i = close + 1;
            }
            _ => return Err(bad()),
        }
    }
    Ok(out)
}

fn select<'a>(root: &'a Value, path: &[Segment]) -> Vec<&'a Value> {
    let mut current = vec![root];
    for seg in path {
        let mut next = Vec::new();
        for v in current {
            match (seg, v) {
                (Segment::Key(k), Value::Object(m)) => next.extend(m.get(k)),
                (Segment::Index(i), Value::Array(a)) => {
                    let len = i64::try_from(a.len()).unwrap_or(i64::MAX);
                    let idx = if *i < 0 { len + i } else { *i };
                    if let Ok(idx) = usize::try_from(idx) {
                        next.extend(a.get(idx));
                    }
                }
                (Segment::Wildcard, Value::Array(a)) => next.extend(a.iter()),
                (Segment::Wildcard, Value::Object(m)) => next.extend(m.values()),
                _ => {}
            }
        }
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_path() {
        let p = parse_path("$.a['b'][0][*].c").unwrap();
        assert_eq!(
            p,
            vec![
                Segment::Key("a".into()),
                Segment::Key("b".into()),
                Segment::Index(0),
                Segment::Wildcard,
                Segment::Key("c".into()),
            ]
        );
    }

    #[test]
    fn rejects_missing_root() {
        assert!(parse_path("a.b").is_err());
    }
}
