use super::{OpContext, Operator};
use crate::catalog::StreamDefinition;
use crate::error::{Error, Result};
use crate::tuple::{Data, Tuple};
use crate::value::Value;
use crate::window::TimestampMs;
use tracing::trace;

/// Conforms raw tuples to their stream schema and, in event time, takes the
/// tuple timestamp from the stream's timestamp field.
pub struct PreprocessOp {
    stream: StreamDefinition,
    is_event_time: bool,
}

impl PreprocessOp {
    #[must_use]
    pub fn new(stream: StreamDefinition, is_event_time: bool) -> Self {
        Self { stream, is_event_time }
    }

    fn process(&self, t: Tuple) -> Result<Tuple> {
        let message = self.stream.conform(&t.message)?;
        let timestamp = match (&self.stream.timestamp_field, self.is_event_time) {
            (Some(field), true) => event_time(message.get(field), field)?,
            _ => t.timestamp,
        };
        Ok(Tuple {
            emitter: self.stream.name.clone(),
            message,
            timestamp,
            metadata: t.metadata,
        })
    }
}

fn event_time(v: Option<&Value>, field: &str) -> Result<TimestampMs> {
    match v {
        Some(Value::Int(i)) => Ok(*i),
        #[allow(clippy::cast_possible_truncation)]
        Some(Value::Float(f)) => Ok(f.0 as i64),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::runtime(format!("cannot convert timestamp field {field} value {s}"))),
        Some(other) => Err(Error::runtime(format!(
            "timestamp field {field} has type {}",
            other.type_name()
        ))),
        None => Err(Error::runtime(format!("timestamp field {field} is missing"))),
    }
}

impl Operator for PreprocessOp {
    fn apply(&self, ctx: &OpContext, data: Data) -> Option<Data> {
        match data {
            Data::Tuple(t) => {
                trace!(rule = %ctx.rule, op = %ctx.op, emitter = %t.emitter, "preprocess");
                Some(match self.process(t) {
                    Ok(t) => Data::Tuple(t),
                    Err(e) => Data::Error(e.to_string()),
                })
            }
            other => Some(other),
        }
    }
}
