//! Graph validation: lint rules and diagnostics.
//!
//! Call [`validate`] for advisory diagnostics or [`validate_or_raise`] to fail
//! on any `Error`-severity issue.

use std::collections::{HashSet, VecDeque};

use serde::Serialize;

use remedy_types::{RemedyError, Result};

use crate::expression::parse_expression;
use crate::graph::{Edge, Graph, Node, END, MAX_ITERATIONS_KEY};

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl Diagnostic {
    fn error(rule: &str, node_id: Option<&str>, message: String, fix: Option<String>) -> Self {
        Self {
            rule: rule.into(),
            severity: Severity::Error,
            message,
            node_id: node_id.map(String::from),
            fix,
        }
    }

    fn warning(rule: &str, node_id: Option<&str>, message: String, fix: Option<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(rule, node_id, message, fix)
        }
    }
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct StartNodeRule;
impl LintRule for StartNodeRule {
    fn name(&self) -> &str { "start_node" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        if graph.node(&graph.start_node).is_some() {
            return vec![];
        }
        vec![Diagnostic::error(
            self.name(),
            None,
            format!("Start node '{}' is not defined", graph.start_node),
            Some("Set start_node to one of the graph's node ids".into()),
        )]
    }
}

struct EdgeSourceExistsRule;
impl LintRule for EdgeSourceExistsRule {
    fn name(&self) -> &str { "edge_source_exists" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .edges
            .keys()
            .filter(|from| graph.node(from).is_none())
            .map(|from| {
                Diagnostic::error(
                    self.name(),
                    Some(from.as_str()),
                    format!("Edge source '{from}' is not a node"),
                    Some(format!("Add node '{from}' or remove its edge")),
                )
            })
            .collect()
    }
}

struct EdgeTargetExistsRule;
impl LintRule for EdgeTargetExistsRule {
    fn name(&self) -> &str { "edge_target_exists" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (from, edge) in &graph.edges {
            for to in edge.targets() {
                if to != END && graph.node(to).is_none() {
                    diags.push(Diagnostic::error(
                        self.name(),
                        Some(from.as_str()),
                        format!("Edge {from} -> {to} references non-existent target '{to}'"),
                        Some(format!("Add node '{to}' or point the edge at '{END}'")),
                    ));
                }
            }
        }
        diags
    }
}

struct EdgeShapeRule;
impl LintRule for EdgeShapeRule {
    fn name(&self) -> &str { "edge_shape" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (id, node) in &graph.nodes {
            match (node, graph.edge(id)) {
                (Node::Tool { .. }, Some(Edge::Branch { .. })) => diags.push(Diagnostic::error(
                    self.name(),
                    Some(id.as_str()),
                    format!("Tool node '{id}' has a true/false branch edge"),
                    Some("Give tool nodes a single successor id".into()),
                )),
                (Node::Condition { .. }, None) => diags.push(Diagnostic::error(
                    self.name(),
                    Some(id.as_str()),
                    format!("Condition node '{id}' has no outgoing edge"),
                    Some(format!("Add {{\"true\": .., \"false\": ..}} for '{id}'")),
                )),
                (Node::Condition { .. }, Some(Edge::Next(_))) => diags.push(Diagnostic::error(
                    self.name(),
                    Some(id.as_str()),
                    format!("Condition node '{id}' has a single successor instead of branches"),
                    Some("Replace the edge with {\"true\": .., \"false\": ..}".into()),
                )),
                (Node::Condition { .. }, Some(edge @ Edge::Branch { .. })) => {
                    for (result, label) in [(true, "true"), (false, "false")] {
                        if edge.select(result).is_none() {
                            diags.push(Diagnostic::error(
                                self.name(),
                                Some(id.as_str()),
                                format!("Condition node '{id}' is missing its '{label}' branch"),
                                Some(format!("Add a '{label}' successor for '{id}'")),
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        diags
    }
}

struct ConditionSyntaxRule;
impl LintRule for ConditionSyntaxRule {
    fn name(&self) -> &str { "condition_syntax" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        graph
            .nodes
            .iter()
            .filter_map(|(id, node)| {
                let Node::Condition { expression } = node else {
                    return None;
                };
                let err = parse_expression(expression).err()?;
                Some(Diagnostic::error(
                    self.name(),
                    Some(id.as_str()),
                    format!("Condition node '{id}' has an invalid expression: {err}"),
                    Some("Only the name 'state' and the documented operators are allowed".into()),
                ))
            })
            .collect()
    }
}

struct MaxIterationsRule;
impl LintRule for MaxIterationsRule {
    fn name(&self) -> &str { "max_iterations" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        match graph.metadata.get(MAX_ITERATIONS_KEY) {
            Some(value) if value.as_u64().is_none() => vec![Diagnostic::error(
                self.name(),
                None,
                format!("metadata.{MAX_ITERATIONS_KEY} must be a non-negative integer, got {value}"),
                Some(format!("Set {MAX_ITERATIONS_KEY} to an integer such as 10")),
            )],
            _ => vec![],
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        if graph.node(&graph.start_node).is_none() {
            return vec![]; // StartNodeRule will catch this
        }

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(graph.start_node.as_str());
        queue.push_back(graph.start_node.as_str());

        while let Some(current) = queue.pop_front() {
            for next in graph.successors(current) {
                if next != END && visited.insert(next) {
                    queue.push_back(next);
                }
            }
        }

        graph
            .nodes
            .keys()
            .filter(|id| !visited.contains(id.as_str()))
            .map(|id| {
                Diagnostic::warning(
                    self.name(),
                    Some(id.as_str()),
                    format!("Node '{id}' is not reachable from the start node"),
                    Some(format!("Add an edge leading to '{id}' or remove it")),
                )
            })
            .collect()
    }
}

/// Warns about loops made only of condition nodes: they are not counted
/// against `max_iterations` under the default iteration policy.
struct ConditionCycleRule;
impl LintRule for ConditionCycleRule {
    fn name(&self) -> &str { "condition_cycle" }
    fn apply(&self, graph: &Graph) -> Vec<Diagnostic> {
        let is_condition = |id: &str| graph.node(id).is_some_and(Node::is_condition);

        graph
            .nodes
            .keys()
            .filter(|id| is_condition(id))
            .filter(|id| {
                let mut visited = HashSet::new();
                let mut queue: VecDeque<&str> = graph
                    .successors(id)
                    .into_iter()
                    .filter(|next| is_condition(next))
                    .collect();
                while let Some(current) = queue.pop_front() {
                    if current == id.as_str() {
                        return true;
                    }
                    if visited.insert(current) {
                        queue.extend(
                            graph
                                .successors(current)
                                .into_iter()
                                .filter(|next| is_condition(next)),
                        );
                    }
                }
                false
            })
            .map(|id| {
                Diagnostic::warning(
                    self.name(),
                    Some(id.as_str()),
                    format!("Condition node '{id}' is on a cycle with no tool node"),
                    Some("Route the loop through a tool node or count all nodes".into()),
                )
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run all built-in lint rules and return collected diagnostics.
pub fn validate(graph: &Graph) -> Vec<Diagnostic> {
    let rules: Vec<Box<dyn LintRule>> = vec![
        Box::new(StartNodeRule),
        Box::new(EdgeSourceExistsRule),
        Box::new(EdgeTargetExistsRule),
        Box::new(EdgeShapeRule),
        Box::new(ConditionSyntaxRule),
        Box::new(MaxIterationsRule),
        Box::new(ReachabilityRule),
        Box::new(ConditionCycleRule),
    ];

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &Graph) -> Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .map(|d| d.message.clone())
        .collect();
    if !errors.is_empty() {
        return Err(RemedyError::Validation(errors.join("; ")));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
