use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use remedy_types::Result;

use crate::validation::validate_or_raise;

/// Successor id that terminates a run.
pub const END: &str = "end";

/// Metadata key holding the cap on counted node executions per run.
pub const MAX_ITERATIONS_KEY: &str = "max_iterations";

pub const DEFAULT_MAX_ITERATIONS: u64 = 20;

/// A graph node: either a registered tool or a boolean branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    Tool { tool_name: String },
    Condition { expression: String },
}

impl Node {
    pub fn tool(tool_name: impl Into<String>) -> Self {
        Node::Tool {
            tool_name: tool_name.into(),
        }
    }

    pub fn condition(expression: impl Into<String>) -> Self {
        Node::Condition {
            expression: expression.into(),
        }
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, Node::Condition { .. })
    }
}

/// Outgoing edge of a node.
///
/// Tool nodes use a bare successor id; condition nodes use `{"true": .., "false": ..}`.
/// Branch targets are optional so that an incomplete branch can be reported by
/// validation instead of failing to parse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Edge {
    Next(String),
    Branch {
        #[serde(rename = "true", default, skip_serializing_if = "Option::is_none")]
        on_true: Option<String>,
        #[serde(rename = "false", default, skip_serializing_if = "Option::is_none")]
        on_false: Option<String>,
    },
}

impl Edge {
    pub fn next(target: impl Into<String>) -> Self {
        Edge::Next(target.into())
    }

    pub fn branch(on_true: impl Into<String>, on_false: impl Into<String>) -> Self {
        Edge::Branch {
            on_true: Some(on_true.into()),
            on_false: Some(on_false.into()),
        }
    }

    /// The successor for a condition outcome, if that branch is present.
    pub fn select(&self, result: bool) -> Option<&str> {
        match self {
            Edge::Branch { on_true, on_false } => {
                let target = if result { on_true } else { on_false };
                target.as_deref()
            }
            Edge::Next(_) => None,
        }
    }

    /// Every successor id named by this edge.
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Edge::Next(target) => vec![target.as_str()],
            Edge::Branch { on_true, on_false } => on_true
                .iter()
                .chain(on_false.iter())
                .map(String::as_str)
                .collect(),
        }
    }
}

/// Immutable workflow description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    pub nodes: BTreeMap<String, Node>,
    #[serde(default)]
    pub edges: BTreeMap<String, Edge>,
    pub start_node: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Graph {
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.get(id)
    }

    /// Successor ids of `id`, empty when it has no outgoing edge.
    pub fn successors(&self, id: &str) -> Vec<&str> {
        self.edges.get(id).map(Edge::targets).unwrap_or_default()
    }

    /// The configured iteration cap, defaulting when absent or not a
    /// non-negative integer. Validation rejects the latter case.
    pub fn max_iterations(&self) -> u64 {
        self.metadata
            .get(MAX_ITERATIONS_KEY)
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_MAX_ITERATIONS)
    }

    pub fn tool_names(&self) -> impl Iterator<Item = &str> {
        self.nodes.values().filter_map(|n| match n {
            Node::Tool { tool_name } => Some(tool_name.as_str()),
            Node::Condition { .. } => None,
        })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }
}

/// Incremental constructor; [`GraphBuilder::build`] validates the result.
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    graph: Graph,
}

impl GraphBuilder {
    pub fn new(start_node: impl Into<String>) -> Self {
        Self {
            graph: Graph {
                nodes: BTreeMap::new(),
                edges: BTreeMap::new(),
                start_node: start_node.into(),
                metadata: Map::new(),
            },
        }
    }

    pub fn tool(mut self, id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        self.graph.nodes.insert(id.into(), Node::tool(tool_name));
        self
    }

    pub fn condition(mut self, id: impl Into<String>, expression: impl Into<String>) -> Self {
        self.graph.nodes.insert(id.into(), Node::condition(expression));
        self
    }

    pub fn edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.graph.edges.insert(from.into(), Edge::next(to));
        self
    }

    pub fn branch(
        mut self,
        from: impl Into<String>,
        on_true: impl Into<String>,
        on_false: impl Into<String>,
    ) -> Self {
        self.graph
            .edges
            .insert(from.into(), Edge::branch(on_true, on_false));
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.graph.metadata.insert(key.into(), value);
        self
    }

    pub fn max_iterations(self, max: u64) -> Self {
        self.metadata(MAX_ITERATIONS_KEY, Value::from(max))
    }

    pub fn build(self) -> Result<Graph> {
        validate_or_raise(&self.graph)?;
        Ok(self.graph)
    }

    /// Return the graph without validating it.
    pub fn build_unchecked(self) -> Graph {
        self.graph
    }
}
