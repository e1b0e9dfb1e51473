//! Turns a compiled [`Plan`] plus the rule's actions into a [`Topology`].
//!
//! Connector instances are created here, so an unknown source or sink type
//! fails the build rather than the start.

use super::{Blueprint, OpBlueprint, OpKind, SinkBlueprint, SourceBlueprint, TopoGraph, Topology};
use crate::config::RuleOptions;
use crate::connector::{ConnectorRegistry, SinkOptions};
use crate::error::{Error, Result};
use crate::expr::Evaluator;
use crate::operators::build_operator;
use crate::planner::{Plan, Stage};
use crate::rule::Action;
use crate::state::StoreFactory;
use indexmap::IndexMap;
use std::sync::Arc;

/// Inputs for building one rule's topology.
pub struct TopologyBuilder<'a> {
    pub rule: &'a str,
    pub plan: &'a Plan,
    pub actions: &'a [Action],
    pub connectors: &'a ConnectorRegistry,
    pub evaluator: &'a Evaluator,
    pub options: &'a RuleOptions,
    pub stores: Arc<StoreFactory>,
}

impl TopologyBuilder<'_> {
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a rule without actions or with invalid
    /// sink options, and [`Error::NotFound`] for unregistered connector types.
    pub fn build(self) -> Result<Topology> {
        if self.actions.is_empty() {
            return Err(Error::config(format!("rule {} has no actions", self.rule)));
        }

        let mut sources = Vec::new();
        for def in &self.plan.sources {
            if def.source_type.is_empty() {
                return Err(Error::config(format!("stream {} has no source type", def.name)));
            }
            sources.push(SourceBlueprint {
                name: def.name.clone(),
                stream: def.clone(),
                connector: self.connectors.source(&def.source_type)?,
            });
        }

        let mut preprocess = Vec::new();
        let mut chain = Vec::new();
        for stage in &self.plan.stages {
            let kind = match stage {
                Stage::Window { config } => OpKind::Window(*config),
                other => match build_operator(other, self.evaluator) {
                    Some(op) => OpKind::Stateless(op),
                    None => continue,
                },
            };
            let concurrency = match kind {
                OpKind::Window(_) => 1,
                OpKind::Stateless(_) => self.plan.concurrency,
            };
            let node = OpBlueprint {
                name: stage.name(),
                kind,
                concurrency,
            };
            if matches!(stage, Stage::Preprocess { .. }) {
                preprocess.push(node);
            } else {
                chain.push(node);
            }
        }

        let mut sinks = Vec::new();
        for (idx, action) in self.actions.iter().enumerate() {
            let options = SinkOptions::from_props(&action.props)?;
            let connectors = (0..options.concurrency)
                .map(|_| self.connectors.sink(&action.kind))
                .collect::<Result<Vec<_>>>()?;
            sinks.push(SinkBlueprint {
                name: format!("{}_{idx}", action.kind),
                options,
                props: action.props.clone(),
                connectors,
            });
        }

        let graph = graph(&sources, &preprocess, &chain, &sinks);
        Ok(Topology::new(
            self.rule.to_string(),
            self.options.clone(),
            self.stores,
            graph,
            Blueprint {
                sources,
                preprocess,
                chain,
                sinks,
            },
        ))
    }
}

fn graph(
    sources: &[SourceBlueprint],
    preprocess: &[OpBlueprint],
    chain: &[OpBlueprint],
    sinks: &[SinkBlueprint],
) -> TopoGraph {
    let mut edges: IndexMap<String, Vec<String>> = IndexMap::new();
    let sink_names: Vec<String> = sinks.iter().map(|s| format!("sink_{}", s.name)).collect();
    let first = chain.first().map(|c| format!("op_{}", c.name));

    for (src, pre) in sources.iter().zip(preprocess) {
        edges.insert(format!("source_{}", src.name), vec![format!("op_{}", pre.name)]);
        let next = first.clone().map_or_else(|| sink_names.clone(), |f| vec![f]);
        edges.insert(format!("op_{}", pre.name), next);
    }
    for pair in chain.windows(2) {
        edges.insert(format!("op_{}", pair[0].name), vec![format!("op_{}", pair[1].name)]);
    }
    if let Some(last) = chain.last() {
        edges.insert(format!("op_{}", last.name), sink_names);
    }

    TopoGraph {
        sources: sources.iter().map(|s| format!("source_{}", s.name)).collect(),
        edges,
    }
}
