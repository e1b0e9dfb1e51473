//! Engine and rule configuration.
//!
//! Both types deserialize from JSON with camelCase keys; every field has a
//! default so partial documents are accepted:
//!
//! ```
//! use streamrule::config::{Qos, RuleOptions};
//!
//! let opts: RuleOptions = serde_json::from_str(r#"{"qos": 1, "bufferLength": 16}"#).unwrap();
//! assert_eq!(opts.qos, Qos::AtLeastOnce);
//! assert_eq!(opts.buffer_length, 16);
//! assert_eq!(opts.concurrency, 1);
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Delivery guarantee of a rule.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl Qos {
    /// Whether rules with this guarantee run a checkpoint coordinator.
    #[must_use]
    pub fn needs_checkpoint(self) -> bool {
        !matches!(self, Self::AtMostOnce)
    }
}

impl TryFrom<u8> for Qos {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactlyOnce),
            n => Err(format!("invalid qos {n}, expect 0, 1 or 2")),
        }
    }
}

impl From<Qos> for u8 {
    fn from(q: Qos) -> Self {
        match q {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

/// Per-rule execution options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuleOptions {
    /// Workers per operator node.
    pub concurrency: usize,
    /// Capacity of each node's input queue.
    pub buffer_length: usize,
    /// Milliseconds between checkpoints.
    pub checkpoint_interval: u64,
    /// Use the stream's timestamp field instead of arrival time.
    pub is_event_time: bool,
    /// Milliseconds an event-time window waits for late tuples.
    pub late_tolerance: i64,
    pub qos: Qos,
    /// Attach source metadata to every sink record.
    pub send_meta_to_sink: bool,
}

impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            buffer_length: 1024,
            checkpoint_interval: 300_000,
            is_event_time: false,
            late_tolerance: 1_000,
            qos: Qos::AtMostOnce,
            send_meta_to_sink: false,
        }
    }
}

impl RuleOptions {
    /// # Errors
    ///
    /// Returns [`Error::Config`] for zero concurrency, buffer length or
    /// checkpoint interval, or a negative late tolerance.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::config("concurrency must be at least 1"));
        }
        if self.buffer_length == 0 {
            return Err(Error::config("bufferLength must be at least 1"));
        }
        if self.qos.needs_checkpoint() && self.checkpoint_interval == 0 {
            return Err(Error::config("checkpointInterval must be positive"));
        }
        if self.late_tolerance < 0 {
            return Err(Error::config("lateTolerance must not be negative"));
        }
        Ok(())
    }

    #[must_use]
    pub fn checkpoint_period(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval)
    }
}

/// Process-wide engine settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Root directory of the persistent state store (one subdirectory per rule).
    pub data_dir: PathBuf,
    /// Committed checkpoints kept per rule.
    pub max_retained_checkpoints: usize,
    /// Times a status query retries to read a topology that is starting up.
    pub status_poll_attempts: u32,
    /// Milliseconds between status poll attempts.
    pub status_poll_interval: u64,
    /// Options applied to rules that do not set their own.
    pub rule: RuleOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            max_retained_checkpoints: 3,
            status_poll_attempts: 3,
            status_poll_interval: 10,
            rule: RuleOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Parse from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed input or invalid values.
    pub fn from_json(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| Error::config(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when retention is zero or the default rule
    /// options are invalid.
    pub fn validate(&self) -> Result<()> {
        if self.max_retained_checkpoints == 0 {
            return Err(Error::config("maxRetainedCheckpoints must be at least 1"));
        }
        self.rule.validate()
    }

    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}
