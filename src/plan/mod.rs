//! Multi-node plans
//!
//! A plan file declares nodes, their splitters, combiners and upstream
//! links, plus the workflow-wide input values:
//!
//! ```yaml
//! nodes:
//!   - name: NA
//!     splitter: "[a, b]"
//!     combiner: a
//!   - name: NB
//!     splitter: d
//!     upstreams:
//!       - node: NA
//!         field: c
//! inputs:
//!   NA.a: [3, 5]
//!   NA.b: [10, 20]
//!   NB.d: [0, 1]
//! ```
//!
//! Nodes may be listed in any order; they are built upstream-first.

use crate::error::{ErrorCode, Result, StateError};
use crate::splitter::materialize::{Inputs, StateSpace};
use crate::splitter::Splitter;
use crate::state::{SpaceCache, State};
use anyhow::Context;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// A combiner given as one field or a list of fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldList {
    One(String),
    Many(Vec<String>),
}

impl FieldList {
    pub fn fields(&self) -> Vec<String> {
        match self {
            Self::One(field) => vec![field.clone()],
            Self::Many(fields) => fields.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub node: String,
    pub field: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub splitter: Option<Splitter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combiner: Option<FieldList>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstreams: Vec<UpstreamConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanConfig {
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub inputs: Inputs,
}

impl PlanConfig {
    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse plan YAML")
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("Failed to parse plan JSON")
    }

    /// Load a plan file; `.json` files are read as JSON, anything else as YAML.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan file: {}", path.display()))?;
        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        };
        parsed.with_context(|| format!("Invalid plan file: {}", path.display()))
    }
}

fn plan_error(message: impl Into<String>) -> StateError {
    StateError::configuration_with_code(ErrorCode::CONFIG_PLAN_GRAPH, message)
}

/// Order node configurations so every node follows its upstreams.
pub fn topological_order(nodes: &[NodeConfig]) -> Result<Vec<&NodeConfig>> {
    let mut graph: DiGraph<usize, ()> = DiGraph::new();
    let mut index: BTreeMap<&str, NodeIndex> = BTreeMap::new();
    for (position, node) in nodes.iter().enumerate() {
        if index.insert(&node.name, graph.add_node(position)).is_some() {
            return Err(plan_error(format!("node {} is declared twice", node.name)));
        }
    }
    for node in nodes {
        let target = index[node.name.as_str()];
        for upstream in &node.upstreams {
            let source = index.get(upstream.node.as_str()).ok_or_else(|| {
                plan_error(format!(
                    "node {} lists unknown upstream {}",
                    node.name, upstream.node
                ))
            })?;
            graph.add_edge(*source, target, ());
        }
    }
    let sorted = toposort(&graph, None).map_err(|cycle| {
        let name = &nodes[graph[cycle.node_id()]].name;
        plan_error(format!("node {} is part of a cycle", name))
    })?;
    Ok(sorted.into_iter().map(|ix| &nodes[graph[ix]]).collect())
}

/// Built node states of a plan, in upstream-first order.
#[derive(Debug, Clone)]
pub struct Plan {
    order: Vec<String>,
    states: BTreeMap<String, Arc<State>>,
    inputs: Inputs,
}

impl Plan {
    pub fn build(config: &PlanConfig) -> Result<Self> {
        let mut states: BTreeMap<String, Arc<State>> = BTreeMap::new();
        let mut order = Vec::with_capacity(config.nodes.len());

        for node in topological_order(&config.nodes)? {
            let mut builder = State::builder(&node.name);
            if let Some(splitter) = &node.splitter {
                builder = builder.splitter(splitter.clone());
            }
            if let Some(combiner) = &node.combiner {
                builder = builder.combiner(combiner.fields());
            }
            for upstream in &node.upstreams {
                let state = states
                    .get(&upstream.node)
                    .ok_or_else(|| plan_error(format!("upstream {} not built", upstream.node)))?;
                builder = builder.upstream(Arc::clone(state), upstream.field.clone());
            }
            let state = builder.build()?;
            debug!(node = %node.name, "Built plan node");
            order.push(node.name.clone());
            states.insert(node.name.clone(), Arc::new(state));
        }

        Ok(Self {
            order,
            states,
            inputs: config.inputs.clone(),
        })
    }

    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn state(&self, name: &str) -> Option<&Arc<State>> {
        self.states.get(name)
    }

    pub fn inputs(&self) -> &Inputs {
        &self.inputs
    }

    /// Materialize every node, upstream first, sharing upstream results.
    pub fn materialize(&self) -> Result<Vec<(Arc<State>, Arc<StateSpace>)>> {
        let mut cache = SpaceCache::new();
        let mut out = Vec::with_capacity(self.order.len());
        for name in &self.order {
            let state = self
                .states
                .get(name)
                .ok_or_else(|| plan_error(format!("node {} not built", name)))?;
            let space = state.materialize_cached(&self.inputs, &mut cache)?;
            out.push((Arc::clone(state), space));
        }
        info!(nodes = out.len(), "Materialized plan");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PLAN: &str = r#"
nodes:
  - name: NB
    splitter: d
    upstreams:
      - node: NA
        field: c
  - name: NA
    splitter: "[a, b]"
    combiner: a
inputs:
  NA.a: [3, 5]
  NA.b: [10, 20]
  NB.d: [0, 1]
"#;

    #[test]
    fn test_parse_yaml_plan() {
        let config = PlanConfig::from_yaml_str(PLAN).unwrap();
        assert_eq!(config.nodes.len(), 2);
        assert_eq!(config.nodes[1].combiner, Some(FieldList::One("a".to_string())));
        assert_eq!(config.nodes[1].splitter, Some(Splitter::parse("[a, b]").unwrap()));
        assert_eq!(config.inputs["NB.d"], json!([0, 1]));
    }

    #[test]
    fn test_build_orders_upstream_first() {
        let plan = Plan::build(&PlanConfig::from_yaml_str(PLAN).unwrap()).unwrap();
        assert_eq!(plan.order(), ["NA".to_string(), "NB".to_string()]);
        let nb = plan.state("NB").unwrap();
        assert_eq!(nb.splitter_rpn().to_strings(), vec!["NA.b", "NB.d", "*"]);
    }

    #[test]
    fn test_materialize_plan() {
        let plan = Plan::build(&PlanConfig::from_yaml_str(PLAN).unwrap()).unwrap();
        let spaces = plan.materialize().unwrap();
        assert_eq!(spaces[0].1.len(), 4);
        assert_eq!(spaces[0].1.final_len(), 2);
        assert_eq!(spaces[1].1.len(), 4);
    }

    #[test]
    fn test_unknown_upstream_and_cycle() {
        let config = PlanConfig::from_yaml_str(
            "nodes:\n  - name: NA\n    upstreams:\n      - {node: NX, field: a}\n",
        )
        .unwrap();
        let err = Plan::build(&config).unwrap_err();
        assert_eq!(err.code(), ErrorCode::CONFIG_PLAN_GRAPH);

        let config = PlanConfig::from_yaml_str(
            r#"
nodes:
  - name: NA
    upstreams: [{node: NB, field: a}]
  - name: NB
    upstreams: [{node: NA, field: b}]
"#,
        )
        .unwrap();
        let err = Plan::build(&config).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duplicate_node() {
        let config =
            PlanConfig::from_yaml_str("nodes:\n  - name: NA\n  - name: NA\n").unwrap();
        let err = Plan::build(&config).unwrap_err();
        assert!(err.to_string().contains("declared twice"));
    }

    #[test]
    fn test_json_plan_with_structured_splitter() {
        let config = PlanConfig::from_json_str(
            r#"{"nodes": [{"name": "NA", "splitter": {"zip": ["a", "b"]}, "combiner": ["a"]}],
                "inputs": {"NA.a": [1, 2], "NA.b": [3, 4]}}"#,
        )
        .unwrap();
        let plan = Plan::build(&config).unwrap();
        let na = plan.state("NA").unwrap();
        assert_eq!(na.combiner_all(), ["NA.a".to_string(), "NA.b".to_string()]);
        assert!(na.splitter_rpn_final().is_empty());
    }
}
