//! Stream definitions and the catalog the compiler resolves them from.

use crate::connector::Properties;
use crate::error::{Error, Result};
use crate::functions::conversion::cast;
use crate::value::{Message, Value};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Declared type of one stream field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Bigint,
    Float,
    String,
    Boolean,
    Datetime,
    Array,
    Struct,
}

impl FieldType {
    fn name(self) -> &'static str {
        match self {
            Self::Bigint => "bigint",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Datetime => "datetime",
            Self::Array => "array",
            Self::Struct => "struct",
        }
    }

    /// Coerce `v` into this type. Nulls pass through.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] when the value cannot be converted.
    pub fn coerce(self, v: &Value) -> Result<Value> {
        match (self, v) {
            (_, Value::Null) => Ok(Value::Null),
            (Self::Array, Value::Array(_)) | (Self::Struct, Value::Object(_)) => Ok(v.clone()),
            (Self::Array | Self::Struct, _) => Err(Error::runtime(format!(
                "expect {} but got {}",
                self.name(),
                v.type_name()
            ))),
            (t, v) => cast(v, t.name()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldType,
}

/// A declared stream: where its data comes from and what it looks like.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamDefinition {
    pub name: String,
    /// Empty for schemaless streams.
    pub fields: Vec<FieldDef>,
    /// Field carrying the event time, used when a rule runs in event time.
    pub timestamp_field: Option<String>,
    /// Connector type name, resolved through the connector registry.
    pub source_type: String,
    /// Connector-specific resource name (topic, path, ...).
    pub datasource: String,
    pub props: Properties,
}

impl StreamDefinition {
    pub fn new(name: impl Into<String>, source_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_type: source_type.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.push(FieldDef { name: name.into(), ty });
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, field: impl Into<String>) -> Self {
        self.timestamp_field = Some(field.into());
        self
    }

    #[must_use]
    pub fn with_datasource(mut self, datasource: impl Into<String>) -> Self {
        self.datasource = datasource.into();
        self
    }

    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn is_schemaless(&self) -> bool {
        self.fields.is_empty()
    }

    /// Validate and coerce a raw message against the schema. Schemaless
    /// streams pass messages through unchanged; otherwise only declared
    /// fields are kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Runtime`] naming the first field that does not fit.
    pub fn conform(&self, message: &Message) -> Result<Message> {
        if self.is_schemaless() {
            return Ok(message.clone());
        }
        let mut out = Message::with_capacity(self.fields.len());
        for f in &self.fields {
            let v = message
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&f.name))
                .map(|(_, v)| v)
                .unwrap_or(&Value::Null);
            let coerced = f
                .ty
                .coerce(v)
                .map_err(|e| Error::runtime(format!("field {}: {e}", f.name)))?;
            out.insert(f.name.clone(), coerced);
        }
        Ok(out)
    }
}

/// Resolves stream names to their definitions.
pub trait StreamCatalog: Send + Sync {
    fn get(&self, name: &str) -> Option<StreamDefinition>;
}

/// In-process catalog keyed by case-insensitive stream name.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    streams: RwLock<HashMap<String, StreamDefinition>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, def: StreamDefinition) {
        self.streams.write().insert(def.name.to_ascii_lowercase(), def);
    }

    #[must_use]
    pub fn with_stream(self, def: StreamDefinition) -> Self {
        self.insert(def);
        self
    }

    pub fn remove(&self, name: &str) -> Option<StreamDefinition> {
        self.streams.write().remove(&name.to_ascii_lowercase())
    }
}

impl StreamCatalog for MemoryCatalog {
    fn get(&self, name: &str) -> Option<StreamDefinition> {
        self.streams.read().get(&name.to_ascii_lowercase()).cloned()
    }
}
