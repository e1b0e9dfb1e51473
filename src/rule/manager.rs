//! Rule lifecycle: the single source of truth for whether a rule runs and on
//! which topology.
//!
//! Lifecycle calls never hold the registry lock across an await: a topology
//! is taken out of (or put into) the registry under the lock and closed or
//! opened outside it.

use super::registry::{RuleRegistry, RuleState};
use super::{Rule, StatementParser};
use crate::catalog::StreamCatalog;
use crate::config::{EngineConfig, RuleOptions};
use crate::connector::ConnectorRegistry;
use crate::error::{Error, Result};
use crate::expr::Evaluator;
use crate::functions::FunctionRegistry;
use crate::planner::{Plan, build_plan};
use crate::state::StoreFactory;
use crate::topo::{TopoGraph, Topology, TopologyBuilder, TopologyState};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const MANUAL_STOP: &str = "canceled manually";

/// Reported status of a rule.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleStatus {
    /// `Running`, `Stopped: <reason>` or `Stopped: not found`.
    pub status: String,
    /// Live node metrics while running.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub metrics: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checkpoint_id: Option<u64>,
}

impl RuleStatus {
    fn running(metrics: Map<String, Value>, last_checkpoint_id: Option<u64>) -> Self {
        Self {
            status: "Running".to_string(),
            metrics,
            last_checkpoint_id,
        }
    }

    fn stopped(reason: &str) -> Self {
        Self {
            status: format!("Stopped: {reason}"),
            metrics: Map::new(),
            last_checkpoint_id: None,
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == "Running"
    }
}

/// Entry of [`RuleManager::list`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub status: String,
}

/// Creates, runs and tears down rules.
pub struct RuleManager {
    config: EngineConfig,
    parser: Arc<dyn StatementParser>,
    catalog: Arc<dyn StreamCatalog>,
    evaluator: Evaluator,
    connectors: ConnectorRegistry,
    stores: Arc<StoreFactory>,
    registry: RuleRegistry,
}

impl RuleManager {
    #[must_use]
    pub fn new(
        config: EngineConfig,
        parser: Arc<dyn StatementParser>,
        catalog: Arc<dyn StreamCatalog>,
        functions: Arc<FunctionRegistry>,
        connectors: ConnectorRegistry,
    ) -> Self {
        let stores = Arc::new(StoreFactory::new(
            config.data_dir.clone(),
            config.max_retained_checkpoints,
        ));
        Self {
            config,
            parser,
            catalog,
            evaluator: Evaluator::new(functions),
            connectors,
            stores,
            registry: RuleRegistry::new(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RuleRegistry {
        &self.registry
    }

    #[must_use]
    pub fn stores(&self) -> &Arc<StoreFactory> {
        &self.stores
    }

    fn options(&self, rule: &Rule) -> RuleOptions {
        rule.options.clone().unwrap_or_else(|| self.config.rule.clone())
    }

    /// Parse and plan a rule without registering it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Plan`] or [`Error::Config`] for rules that cannot run.
    pub fn compile(&self, rule: &Rule) -> Result<Plan> {
        rule.validate()?;
        let options = self.options(rule);
        options.validate()?;
        let stmt = self.parser.parse(&rule.sql)?;
        build_plan(&stmt, &options, self.catalog.as_ref(), self.evaluator.registry())
    }

    fn build(&self, rule: &Rule) -> Result<Topology> {
        let plan = self.compile(rule)?;
        TopologyBuilder {
            rule: &rule.id,
            plan: &plan,
            actions: &rule.actions,
            connectors: &self.connectors,
            evaluator: &self.evaluator,
            options: &self.options(rule),
            stores: Arc::clone(&self.stores),
        }
        .build()
    }

    /// Build the rule's topology and register it without running it.
    ///
    /// # Errors
    ///
    /// Returns the compile error, or [`Error::Config`] if the id is taken.
    pub fn create(&self, rule: Rule) -> Result<()> {
        if self.registry.contains(&rule.id) {
            return Err(Error::config(format!("rule {} already exists", rule.id)));
        }
        let topology = self.build(&rule)?;
        let id = rule.id.clone();
        self.registry.insert(RuleState::new(rule, topology))?;
        info!(rule = %id, "rule created");
        Ok(())
    }

    /// Run a registered rule. Starting a running rule does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules and the build or open
    /// error otherwise; the rule is then left stopped with that reason.
    pub async fn start(&self, id: &str) -> Result<()> {
        // outer None: already running; inner: a finished topology to close
        let stale = self
            .registry
            .update(id, |s| {
                if s.triggered && s.topology.as_ref().is_some_and(|t| t.is_running()) {
                    return None;
                }
                match &s.topology {
                    Some(t) if t.state() == TopologyState::Idle => Some(None),
                    _ => Some(s.topology.take()),
                }
            })
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        let Some(stale) = stale else {
            debug!(rule = %id, "rule already running");
            return Ok(());
        };
        if let Some(old) = stale {
            old.close().await;
        }

        let rule = self
            .registry
            .read(id, |s| s.rule.clone())
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        let fresh = match self.registry.read(id, |s| s.topology.is_none()) {
            Some(true) => Some(Arc::new(self.build(&rule)?)),
            _ => None,
        };

        let opened = self
            .registry
            .update(id, |s| {
                if s.topology.is_none() {
                    s.topology = fresh;
                }
                let Some(t) = s.topology.clone() else {
                    return Err(Error::runtime(format!("rule {id} has no topology")));
                };
                match t.open() {
                    Ok(()) => {
                        s.triggered = true;
                        s.stop_reason = None;
                        Ok(())
                    }
                    Err(e) => {
                        s.triggered = false;
                        s.stop_reason = Some(e.to_string());
                        s.topology = None;
                        Err(e)
                    }
                }
            })
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        match &opened {
            Ok(()) => info!(rule = %id, "rule started"),
            Err(e) => warn!(rule = %id, error = %e, "rule failed to start"),
        }
        opened
    }

    /// Stop a rule and keep it registered. Stopping a stopped rule does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules.
    pub async fn stop(&self, id: &str) -> Result<()> {
        let topology = self
            .registry
            .update(id, |s| {
                s.triggered = false;
                s.stop_reason = Some(MANUAL_STOP.to_string());
                s.topology.take()
            })
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        if let Some(t) = topology {
            t.close().await;
            info!(rule = %id, "rule stopped");
        } else {
            debug!(rule = %id, "rule already stopped");
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules and any start error.
    pub async fn restart(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.start(id).await
    }

    /// Stop the rule, drop its checkpoints and sink caches and unregister it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules and [`Error::Store`] when
    /// its persisted state cannot be removed.
    pub async fn delete(&self, id: &str) -> Result<()> {
        self.stop(id).await?;
        self.registry.remove(id);
        self.stores.remove(id)?;
        info!(rule = %id, "rule deleted");
        Ok(())
    }

    /// Replace a rule's definition, restarting it if it was running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules and the compile error of
    /// the new definition, in which case the old one stays in place.
    pub async fn update(&self, rule: Rule) -> Result<()> {
        let id = rule.id.clone();
        let was_running = self
            .registry
            .read(&id, |s| s.triggered)
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        self.compile(&rule)?;
        self.stop(&id).await?;
        self.registry
            .update(&id, |s| {
                s.rule = rule;
                s.stop_reason = None;
            })
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        info!(rule = %id, "rule updated");
        if was_running {
            self.start(&id).await?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules.
    pub fn view(&self, id: &str) -> Result<Rule> {
        self.registry
            .read(id, |s| s.rule.clone())
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))
    }

    pub async fn list(&self) -> Vec<RuleSummary> {
        let mut out = Vec::new();
        for id in self.registry.ids() {
            let status = self.status(&id).await.status;
            out.push(RuleSummary { id, status });
        }
        out
    }

    /// Status of a rule. Unknown rules report `Stopped: not found`. A rule
    /// that is still starting is polled a bounded number of times.
    pub async fn status(&self, id: &str) -> RuleStatus {
        let attempts = self.config.status_poll_attempts.max(1);
        let interval = Duration::from_millis(self.config.status_poll_interval);
        for attempt in 0..attempts {
            let Some((triggered, topology, reason)) = self
                .registry
                .read(id, |s| (s.triggered, s.topology.clone(), s.stop_reason.clone()))
            else {
                return RuleStatus::stopped("not found");
            };
            if !triggered {
                return RuleStatus::stopped(reason.as_deref().unwrap_or(MANUAL_STOP));
            }
            if let Some(t) = topology {
                if let Some(failure) = t.failure() {
                    return RuleStatus::stopped(&failure);
                }
                match t.state() {
                    TopologyState::Open if t.is_running() => {
                        let last = t.checkpoint_stats().and_then(|s| s.last_completed_id());
                        return RuleStatus::running(t.metrics(), last);
                    }
                    TopologyState::Open | TopologyState::Cancelled => {
                        return RuleStatus::stopped(MANUAL_STOP);
                    }
                    TopologyState::Idle => {}
                }
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(interval).await;
            }
        }
        RuleStatus::stopped("topology is not ready")
    }

    /// DAG description of the rule's topology.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown rules, or the build error when
    /// a stopped rule's graph has to be rebuilt.
    pub fn topology(&self, id: &str) -> Result<TopoGraph> {
        let (rule, topology) = self
            .registry
            .read(id, |s| (s.rule.clone(), s.topology.clone()))
            .ok_or_else(|| Error::NotFound(format!("rule {id}")))?;
        match topology {
            Some(t) => Ok(t.graph().clone()),
            None => Ok(self.build(&rule)?.graph().clone()),
        }
    }

    /// Run a checkpoint of a running rule now.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown or stopped rules and the
    /// checkpoint error otherwise.
    pub async fn checkpoint_now(&self, id: &str) -> Result<u64> {
        let topology = self
            .registry
            .read(id, |s| s.topology.clone())
            .flatten()
            .ok_or_else(|| Error::NotFound(format!("running rule {id}")))?;
        topology.checkpoint_now().await
    }

    /// Stop every rule.
    pub async fn shutdown(&self) {
        for id in self.registry.ids() {
            if let Err(e) = self.stop(&id).await {
                warn!(rule = %id, error = %e, "rule did not stop cleanly");
            }
        }
    }
}

impl std::fmt::Debug for RuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleManager")
            .field("data_dir", &self.config.data_dir)
            .field("rules", &self.registry.ids())
            .finish_non_exhaustive()
    }
}
