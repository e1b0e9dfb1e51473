//! Window state machine.
//!
//! [`WindowOperator`] buffers tuples and decides when a window closes. It does
//! not read the clock itself: the window node calls [`WindowOperator::on_tuple`]
//! for every tuple and [`WindowOperator::on_tick`] when the deadline reported
//! by [`WindowOperator::next_deadline`] passes. This keeps the state machine
//! deterministic and easy to test.
//!
//! Time advances differently per mode:
//!
//! - **processing time**: the clock is wall time passed in by the caller.
//! - **event time**: the clock is the watermark, the smallest of each
//!   emitter's largest timestamp minus the late tolerance. Tuples older than
//!   the watermark are dropped as late.
//!
//! Only non-empty windows are emitted.
//!
//! | kind     | closes when                                             |
//! |----------|---------------------------------------------------------|
//! | tumbling | clock reaches the window end                            |
//! | hopping  | clock reaches the end of each overlapping window        |
//! | sliding  | every tuple triggers `(ts - length, ts + delay]`        |
//! | session  | clock passes last tuple + gap, or start + max duration  |
//! | count    | `interval` tuples arrived and `length` are buffered     |

use crate::tuple::{Tuple, WindowTuples};
use crate::window::{TimestampMs, Window, WindowConfig, WindowKind, div_floor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Checkpointed part of a window operator.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowState {
    /// Buffered tuples, in arrival order.
    pub buffer: Vec<Tuple>,
    /// Everything that closes at or before this instant has been emitted.
    pub fired_until: Option<TimestampMs>,
    /// Largest timestamp seen per emitter (event time only).
    pub emitter_max: BTreeMap<String, TimestampMs>,
    /// Sliding window triggers not yet emitted.
    pub pending: Vec<TimestampMs>,
    /// Tuples since the last count window emission.
    pub since_emit: i64,
}

/// Buffers tuples and emits closed windows.
#[derive(Clone, Debug)]
pub struct WindowOperator {
    config: WindowConfig,
    state: WindowState,
}

impl WindowOperator {
    #[must_use]
    pub fn new(config: WindowConfig) -> Self {
        Self::restore(config, WindowState::default())
    }

    /// Resume from a checkpointed state.
    #[must_use]
    pub fn restore(config: WindowConfig, state: WindowState) -> Self {
        Self { config, state }
    }

    #[must_use]
    pub fn state(&self) -> &WindowState {
        &self.state
    }

    #[must_use]
    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Current event-time watermark, once any tuple has been seen.
    #[must_use]
    pub fn watermark(&self) -> Option<TimestampMs> {
        self.state
            .emitter_max
            .values()
            .min()
            .map(|m| m - self.config.late_tolerance)
    }

    /// Feed one tuple. `now` is wall time, used only in processing time.
    pub fn on_tuple(&mut self, tuple: Tuple, now: TimestampMs) -> Vec<WindowTuples> {
        if self.config.kind == WindowKind::Count {
            return self.on_count_tuple(tuple);
        }
        if self.config.is_event_time {
            if let Some(wm) = self.watermark()
                && tuple.timestamp < wm
            {
                debug!(ts = tuple.timestamp, watermark = wm, "dropping late tuple");
                return Vec::new();
            }
            let entry = self
                .state
                .emitter_max
                .entry(tuple.emitter.clone())
                .or_insert(tuple.timestamp);
            *entry = (*entry).max(tuple.timestamp);
        }
        if self.is_expired(tuple.timestamp) {
            debug!(ts = tuple.timestamp, "dropping tuple for an already closed window");
            return Vec::new();
        }
        if self.config.kind == WindowKind::Sliding {
            self.state.pending.push(tuple.timestamp);
        }
        self.state.buffer.push(tuple);
        let clock = self.clock(now);
        clock.map_or_else(Vec::new, |c| self.advance(c))
    }

    /// Close every window due at `now` (processing time). In event time the
    /// watermark drives closing and ticks do nothing.
    pub fn on_tick(&mut self, now: TimestampMs) -> Vec<WindowTuples> {
        if self.config.is_event_time || self.config.kind == WindowKind::Count {
            return Vec::new();
        }
        self.advance(now)
    }

    /// Next processing-time instant at which [`on_tick`](Self::on_tick) would
    /// emit something, if any.
    #[must_use]
    pub fn next_deadline(&self) -> Option<TimestampMs> {
        if self.config.is_event_time || self.state.buffer.is_empty() {
            return None;
        }
        match self.config.kind {
            WindowKind::Tumbling | WindowKind::Hopping => {
                let min_ts = self.state.buffer.iter().map(|t| t.timestamp).min()?;
                Some(self.first_end_after(self.state.fired_until, min_ts))
            }
            WindowKind::Sliding => self
                .state
                .pending
                .iter()
                .min()
                .map(|p| p + self.config.interval.unwrap_or(0)),
            WindowKind::Session => {
                let sessions = self.sessions();
                sessions.first().map(|s| self.session_close(s))
            }
            WindowKind::Count => None,
        }
    }

    fn clock(&self, now: TimestampMs) -> Option<TimestampMs> {
        if self.config.is_event_time {
            self.watermark()
        } else {
            Some(now)
        }
    }

    fn step(&self) -> i64 {
        match self.config.kind {
            WindowKind::Hopping => self.config.interval.unwrap_or(self.config.length),
            _ => self.config.length,
        }
    }

    /// Whether every window `ts` could belong to has already closed.
    fn is_expired(&self, ts: TimestampMs) -> bool {
        let Some(fired) = self.state.fired_until else {
            return false;
        };
        match self.config.kind {
            WindowKind::Tumbling | WindowKind::Hopping => {
                ts < fired + self.step() - self.config.length
            }
            WindowKind::Session => ts < fired,
            WindowKind::Sliding | WindowKind::Count => false,
        }
    }

    /// First tumbling/hopping window end strictly after `fired` whose window
    /// can contain `min_ts`.
    fn first_end_after(&self, fired: Option<TimestampMs>, min_ts: TimestampMs) -> TimestampMs {
        let step = self.step();
        let length = self.config.length;
        // earliest window containing min_ts starts at the first multiple of
        // step greater than min_ts - length
        let first_start = Window::next_boundary(min_ts - length, step);
        let by_tuple = first_start + length;
        match fired {
            Some(f) => {
                let after_fired = Window::next_boundary(f - length, step) + length;
                by_tuple.max(after_fired)
            }
            None => by_tuple,
        }
    }

    fn advance(&mut self, clock: TimestampMs) -> Vec<WindowTuples> {
        match self.config.kind {
            WindowKind::Tumbling | WindowKind::Hopping => self.advance_fixed(clock),
            WindowKind::Sliding => self.advance_sliding(clock),
            WindowKind::Session => self.advance_session(clock),
            WindowKind::Count => Vec::new(),
        }
    }

    fn advance_fixed(&mut self, clock: TimestampMs) -> Vec<WindowTuples> {
        let step = self.step();
        let length = self.config.length;
        let mut out = Vec::new();
        loop {
            let Some(min_ts) = self.state.buffer.iter().map(|t| t.timestamp).min() else {
                break;
            };
            let end = self.first_end_after(self.state.fired_until, min_ts);
            if end > clock {
                break;
            }
            let window = Window::new(end - length, end);
            let tuples: Vec<Tuple> = self
                .state
                .buffer
                .iter()
                .filter(|t| window.contains(t.timestamp))
                .cloned()
                .collect();
            if !tuples.is_empty() {
                out.push(WindowTuples { window, tuples });
            }
            self.state.fired_until = Some(end);
            let keep_from = end + step - length;
            self.state.buffer.retain(|t| t.timestamp >= keep_from);
        }
        // nothing buffered: the clock still closes empty windows
        if self.state.buffer.is_empty() {
            let closed = div_floor(clock - length, step) * step + length;
            if self.state.fired_until.is_none_or(|f| closed > f) {
                self.state.fired_until = Some(closed);
            }
        }
        out
    }

    fn advance_sliding(&mut self, clock: TimestampMs) -> Vec<WindowTuples> {
        let delay = self.config.interval.unwrap_or(0);
        let length = self.config.length;
        let mut due: Vec<TimestampMs> = Vec::new();
        self.state.pending.retain(|p| {
            if p + delay <= clock {
                due.push(*p);
                false
            } else {
                true
            }
        });
        due.sort_unstable();
        let mut out = Vec::new();
        for p in due {
            let window = Window::new(p - length, p + delay);
            let tuples: Vec<Tuple> = self
                .state
                .buffer
                .iter()
                .filter(|t| t.timestamp > window.start && t.timestamp <= window.end)
                .cloned()
                .collect();
            if !tuples.is_empty() {
                out.push(WindowTuples { window, tuples });
            }
        }
        let horizon = self.state.pending.iter().min().copied().unwrap_or(clock);
        self.state.buffer.retain(|t| t.timestamp > horizon - length);
        out
    }

    /// Buffered tuples split into sessions, ordered by time.
    fn sessions(&self) -> Vec<Vec<Tuple>> {
        let gap = self.config.length;
        let max = self.config.interval;
        let mut sorted = self.state.buffer.clone();
        sorted.sort_by_key(|t| t.timestamp);
        let mut sessions: Vec<Vec<Tuple>> = Vec::new();
        for t in sorted {
            let split = sessions.last().is_none_or(|s| {
                let start = s[0].timestamp;
                let last = s[s.len() - 1].timestamp;
                t.timestamp - last >= gap || max.is_some_and(|m| t.timestamp - start >= m)
            });
            if split {
                sessions.push(vec![t]);
            } else if let Some(s) = sessions.last_mut() {
                s.push(t);
            }
        }
        sessions
    }

    fn session_close(&self, session: &[Tuple]) -> TimestampMs {
        let start = session[0].timestamp;
        let last = session[session.len() - 1].timestamp;
        let by_gap = last + self.config.length;
        self.config.interval.map_or(by_gap, |m| by_gap.min(start + m))
    }

    fn advance_session(&mut self, clock: TimestampMs) -> Vec<WindowTuples> {
        let sessions = self.sessions();
        let count = sessions.len();
        let mut out = Vec::new();
        let mut remaining = Vec::new();
        for (i, s) in sessions.into_iter().enumerate() {
            let close = self.session_close(&s);
            // In processing time a later session means this one was split
            // off for good. In event time a late tuple within tolerance may
            // still join it, so only the watermark closes it.
            let split_off = !self.config.is_event_time && i + 1 < count;
            if close <= clock || split_off {
                let window = Window::new(s[0].timestamp, close);
                self.state.fired_until = Some(self.state.fired_until.map_or(close, |f| f.max(close)));
                out.push(WindowTuples { window, tuples: s });
            } else {
                remaining.extend(s);
            }
        }
        // keep arrival order for the open sessions
        self.state
            .buffer
            .retain(|t| remaining.iter().any(|r| r == t));
        out
    }

    fn on_count_tuple(&mut self, tuple: Tuple) -> Vec<WindowTuples> {
        let length = usize::try_from(self.config.length).unwrap_or(usize::MAX);
        let interval = self.config.interval.unwrap_or(self.config.length);
        self.state.buffer.push(tuple);
        if self.state.buffer.len() > length {
            let excess = self.state.buffer.len() - length;
            self.state.buffer.drain(..excess);
        }
        self.state.since_emit += 1;
        if self.state.since_emit < interval || self.state.buffer.len() < length {
            return Vec::new();
        }
        self.state.since_emit = 0;
        let tuples = self.state.buffer.clone();
        if interval >= self.config.length {
            self.state.buffer.clear();
        }
        let start = tuples.iter().map(|t| t.timestamp).min().unwrap_or_default();
        let end = tuples.iter().map(|t| t.timestamp).max().unwrap_or_default();
        vec![WindowTuples { window: Window::new(start, end), tuples }]
    }
}
