use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FormatResult};

/// Milliseconds since UNIX epoch (UTC).
pub type TimestampMs = i64;

/// A closed-open time range: [start, end).
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl Window {
    #[inline]
    pub fn new(start: TimestampMs, end: TimestampMs) -> Self {
        debug_assert!(end >= start);
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, ts: TimestampMs) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Next multiple of `step_ms` strictly after `ts`.
    #[inline]
    pub fn next_boundary(ts: TimestampMs, step_ms: i64) -> TimestampMs {
        (div_floor(ts, step_ms) + 1) * step_ms
    }
}

impl Display for Window {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Floor division for i64 (unlike `/` which truncates toward zero).
#[inline]
pub(crate) fn div_floor(a: i64, b: i64) -> i64 {
    let q = a / b;
    let r = a % b;
    if (r != 0) && ((r > 0) != (b > 0)) { q - 1 } else { q }
}

/// Kind of window clause in GROUP BY.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowKind {
    Tumbling,
    Hopping,
    Sliding,
    Session,
    Count,
}

impl Display for WindowKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FormatResult {
        let s = match self {
            Self::Tumbling => "TUMBLINGWINDOW",
            Self::Hopping => "HOPPINGWINDOW",
            Self::Sliding => "SLIDINGWINDOW",
            Self::Session => "SESSIONWINDOW",
            Self::Count => "COUNTWINDOW",
        };
        f.write_str(s)
    }
}

/// Time unit for window lengths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeUnit {
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
}

impl TimeUnit {
    #[inline]
    pub fn to_millis(self, n: i64) -> i64 {
        match self {
            Self::Millisecond => n,
            Self::Second => n * 1_000,
            Self::Minute => n * 60_000,
            Self::Hour => n * 3_600_000,
            Self::Day => n * 86_400_000,
        }
    }
}

/// Resolved window parameters for one rule.
///
/// Time-based kinds carry milliseconds; count windows carry tuple counts in
/// `length` and `interval`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    pub kind: WindowKind,
    /// Window size; the inactivity gap for session windows.
    pub length: i64,
    /// Hop for hopping windows, max duration for session windows, emit
    /// interval for count windows.
    pub interval: Option<i64>,
    pub late_tolerance: i64,
    pub is_event_time: bool,
}
