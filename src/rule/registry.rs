use super::Rule;
use crate::error::{Error, Result};
use crate::topo::Topology;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry entry of one rule.
#[derive(Debug)]
pub struct RuleState {
    pub rule: Rule,
    /// Built topology; `None` after a stop until the next start.
    pub topology: Option<Arc<Topology>>,
    /// Whether the rule is supposed to run.
    pub triggered: bool,
    pub stop_reason: Option<String>,
}

impl RuleState {
    #[must_use]
    pub fn new(rule: Rule, topology: Topology) -> Self {
        Self {
            rule,
            topology: Some(Arc::new(topology)),
            triggered: false,
            stop_reason: None,
        }
    }
}

/// Rule id to rule state. Readers run in parallel; every mutation takes the
/// write lock. Closures must not block or await.
#[derive(Debug, Default)]
pub struct RuleRegistry {
    rules: RwLock<HashMap<String, RuleState>>,
}

impl RuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] when the id is taken.
    pub fn insert(&self, state: RuleState) -> Result<()> {
        let mut rules = self.rules.write();
        if rules.contains_key(&state.rule.id) {
            return Err(Error::config(format!("rule {} already exists", state.rule.id)));
        }
        rules.insert(state.rule.id.clone(), state);
        Ok(())
    }

    pub fn read<R>(&self, id: &str, f: impl FnOnce(&RuleState) -> R) -> Option<R> {
        self.rules.read().get(id).map(f)
    }

    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut RuleState) -> R) -> Option<R> {
        self.rules.write().get_mut(id).map(f)
    }

    pub fn remove(&self, id: &str) -> Option<RuleState> {
        self.rules.write().remove(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.rules.read().contains_key(id)
    }

    /// Rule ids in sorted order.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rules.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of rules with a running topology.
    #[must_use]
    pub fn live_topologies(&self) -> usize {
        self.rules
            .read()
            .values()
            .filter(|s| s.topology.as_ref().is_some_and(|t| t.is_running()))
            .count()
    }
}
