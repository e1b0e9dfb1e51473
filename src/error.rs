//! Error types for the rule engine.
//!
//! Errors are grouped by how the engine reacts to them:
//!
//! - [`Error::Plan`] and [`Error::Config`] are raised synchronously while a rule
//!   is compiled; the rule never starts.
//! - [`Error::Runtime`] is a per-tuple failure. Operators turn it into a
//!   [`Data::Error`](crate::tuple::Data::Error) value and keep running.
//! - [`Error::Connector`] and [`Error::Store`] are node-fatal: they surface on the
//!   topology error channel and cancel the topology.
//! - [`Error::Checkpoint`] only aborts the in-flight checkpoint.
//! - [`Error::NotFound`] is reported for lifecycle calls on unknown rules.

/// Errors produced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The statement cannot be turned into a plan (unknown stream, bad clause).
    #[error("plan error: {0}")]
    Plan(String),

    /// Invalid option combination or malformed configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A function call or type coercion failed for one tuple.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// A source or sink connector failed.
    #[error("connector error: {0}")]
    Connector(#[source] anyhow::Error),

    /// The state store could not be read or written.
    #[error("state store error: {0}")]
    Store(String),

    /// A checkpoint could not be completed.
    #[error("checkpoint {checkpoint_id} aborted: {reason}")]
    Checkpoint { checkpoint_id: u64, reason: String },

    /// The named rule (or stream) does not exist.
    #[error("{0} is not found")]
    NotFound(String),

    /// The rule or topology was cancelled.
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(String),
}

impl Error {
    pub fn plan(msg: impl Into<String>) -> Self {
        Self::Plan(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn runtime(msg: impl Into<String>) -> Self {
        Self::Runtime(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }
}

impl From<postcard::Error> for Error {
    fn from(e: postcard::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serde(e.to_string())
    }
}

/// Engine result alias.
pub type Result<T> = std::result::Result<T, Error>;
