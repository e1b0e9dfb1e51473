//! Rule definitions and their lifecycle.

mod manager;
mod registry;

pub use manager::{RuleManager, RuleStatus, RuleSummary};
pub use registry::{RuleRegistry, RuleState};

use crate::ast::SelectStatement;
use crate::config::RuleOptions;
use crate::connector::Properties;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Turns SQL text into a statement. The grammar lives outside the engine.
pub trait StatementParser: Send + Sync {
    /// # Errors
    ///
    /// Returns [`Error::Plan`] for text that does not parse.
    fn parse(&self, sql: &str) -> Result<SelectStatement>;
}

/// One sink of a rule. Serialized as a single-key object,
/// `{"<sink type>": {<properties>}}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Properties>", into = "BTreeMap<String, Properties>")]
pub struct Action {
    pub kind: String,
    pub props: Properties,
}

impl Action {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            props: Properties::new(),
        }
    }

    #[must_use]
    pub fn with_prop(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.props.insert(key.into(), value);
        self
    }
}

impl TryFrom<BTreeMap<String, Properties>> for Action {
    type Error = String;

    fn try_from(m: BTreeMap<String, Properties>) -> std::result::Result<Self, Self::Error> {
        if m.len() != 1 {
            return Err(format!("an action must name exactly one sink, found {}", m.len()));
        }
        let (kind, props) = m.into_iter().next().ok_or("empty action")?;
        Ok(Self { kind, props })
    }
}

impl From<Action> for BTreeMap<String, Properties> {
    fn from(a: Action) -> Self {
        BTreeMap::from([(a.kind, a.props)])
    }
}

/// A rule as submitted by the user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub sql: String,
    pub actions: Vec<Action>,
    /// Engine defaults apply when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<RuleOptions>,
}

impl Rule {
    pub fn new(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            sql: sql.into(),
            actions: Vec::new(),
            options: None,
        }
    }

    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn with_options(mut self, options: RuleOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse a rule from its JSON definition.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on malformed JSON or a missing id or SQL.
    pub fn from_json(s: &str) -> Result<Self> {
        let rule: Self = serde_json::from_str(s).map_err(|e| Error::config(format!("invalid rule: {e}")))?;
        rule.validate()?;
        Ok(rule)
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when the id or SQL is empty.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::config("rule id is required"));
        }
        if self.sql.trim().is_empty() {
            return Err(Error::config(format!("rule {} has no sql", self.id)));
        }
        Ok(())
    }
}
