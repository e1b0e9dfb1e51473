//! Small helpers shared across the engine.

use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock time in milliseconds since the Unix epoch.
///
/// ```
/// let t = streamrule::utils::now_ms();
/// assert!(t > 1_600_000_000_000);
/// ```
#[must_use]
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}

/// Identity of one node instance in barrier alignment and acks:
/// `<node>_<instance>`.
#[must_use]
pub fn origin(node: &str, instance: usize) -> String {
    format!("{node}_{instance}")
}

const REGEX_CACHE_LIMIT: usize = 256;

static REGEX_CACHE: LazyLock<Mutex<HashMap<String, Regex>>> = LazyLock::new(Default::default);

/// Compile `pattern`, reusing an earlier compilation of the same pattern.
/// The cache is cleared once it holds more than a few hundred patterns.
pub fn cached_regex(pattern: &str) -> Result<Regex, regex::Error> {
    if let Some(re) = REGEX_CACHE.lock().get(pattern) {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    let mut cache = REGEX_CACHE.lock();
    if cache.len() >= REGEX_CACHE_LIMIT {
        cache.clear();
    }
    cache.insert(pattern.to_string(), re.clone());
    Ok(re)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_regex_reuses_compilations() {
        let a = cached_regex("^a+b$").unwrap();
        let b = cached_regex("^a+b$").unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert!(b.is_match("aab"));
        assert!(REGEX_CACHE.lock().contains_key("^a+b$"));
        assert!(cached_regex("(").is_err());
    }
}
