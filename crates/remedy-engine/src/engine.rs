//! Graph execution engine: the core traversal loop.
//!
//! Starting at `start_node`, tool nodes transform the state and follow their
//! single successor, condition nodes pick a branch, until the `end` sentinel is
//! reached or the iteration cap is exceeded. Exceeding the cap is not an
//! error: the run stops with a terminal log entry.

use std::sync::Arc;
use std::time::Instant;

use remedy_tools::{default_registry, ToolRegistry};
use remedy_types::{LogEntry, RemedyError, Result, RunResult, State};

use crate::events::{EventEmitter, RunEvent};
use crate::expression::evaluate_condition;
use crate::graph::{Edge, Graph, Node, END};

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Which node visits count against a graph's `max_iterations`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IterationPolicy {
    /// Only tool executions count; condition visits are free.
    #[default]
    ToolNodesOnly,
    /// Every node visit counts, so condition-only cycles also terminate.
    AllNodes,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    pub iteration_policy: IterationPolicy,
}

/// Drives graph traversal over a shared tool registry.
pub struct GraphExecutor {
    registry: Arc<ToolRegistry>,
    config: ExecutorConfig,
    events: Option<EventEmitter>,
}

// ---------------------------------------------------------------------------
// GraphExecutor
// ---------------------------------------------------------------------------

impl GraphExecutor {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            config: ExecutorConfig::default(),
            events: None,
        }
    }

    /// Create an executor pre-loaded with the built-in remediation tools.
    pub fn with_default_registry() -> Self {
        Self::new(Arc::new(default_registry()))
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Execute `graph` from its start node, threading `initial` through every
    /// node. The graph is assumed to be validated; structural problems met on
    /// the way surface as errors rather than panics.
    pub fn run(&self, graph: &Graph, initial: State) -> Result<RunResult> {
        let started = Instant::now();
        let max_iterations = graph.max_iterations();
        let count_conditions = self.config.iteration_policy == IterationPolicy::AllNodes;

        tracing::info!(
            start = %graph.start_node,
            nodes = graph.nodes.len(),
            max_iterations,
            "Run started"
        );
        self.emit(RunEvent::RunStarted {
            start_node: graph.start_node.clone(),
            node_count: graph.nodes.len(),
        });

        let mut state = initial;
        let mut logs: Vec<LogEntry> = Vec::new();
        let mut iteration: u64 = 0;
        let mut current = graph.start_node.clone();

        while current != END {
            let node = graph
                .node(&current)
                .ok_or_else(|| RemedyError::UnknownNode {
                    node: current.clone(),
                })?;

            let (next, counted) = match node {
                Node::Tool { tool_name } => {
                    let tool = self.registry.resolve(tool_name, &current)?;
                    let before = state.clone();
                    state = tool.apply(state)?;
                    logs.push(LogEntry::tool(current.as_str(), before, state.clone()));

                    let next = match graph.edge(&current) {
                        None => END.to_string(),
                        Some(Edge::Next(target)) => target.clone(),
                        Some(Edge::Branch { .. }) => {
                            return Err(RemedyError::Validation(format!(
                                "Tool node '{current}' has a branch edge"
                            )))
                        }
                    };
                    tracing::debug!(node = %current, tool = %tool_name, next = %next, "Applied tool");
                    self.emit(RunEvent::ToolApplied {
                        node_id: current.clone(),
                        tool_name: tool_name.clone(),
                        iteration: iteration + 1,
                    });
                    (next, true)
                }
                Node::Condition { expression } => {
                    let result = evaluate_condition(expression, &state)?;
                    logs.push(LogEntry::condition(current.as_str(), expression.as_str(), result));

                    let next = graph
                        .edge(&current)
                        .and_then(|edge| edge.select(result))
                        .ok_or_else(|| {
                            RemedyError::Validation(format!(
                                "Condition node '{current}' has no '{result}' branch"
                            ))
                        })?
                        .to_string();
                    tracing::debug!(node = %current, result, next = %next, "Evaluated condition");
                    self.emit(RunEvent::ConditionEvaluated {
                        node_id: current.clone(),
                        result,
                        next: next.clone(),
                    });
                    (next, count_conditions)
                }
            };

            let previous = std::mem::replace(&mut current, next);
            if counted {
                iteration += 1;
                if iteration > max_iterations {
                    tracing::warn!(node = %previous, max_iterations, "Max iterations exceeded");
                    logs.push(LogEntry::max_iterations_exceeded());
                    self.emit(RunEvent::MaxIterationsExceeded {
                        node_id: previous,
                        max_iterations,
                    });
                    break;
                }
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        tracing::info!(steps = logs.len(), iterations = iteration, duration_ms, "Run finished");
        self.emit(RunEvent::RunCompleted {
            steps: logs.len(),
            duration_ms,
        });

        Ok(RunResult {
            final_state: state,
            logs,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphBuilder;
    use serde_json::json;

    /// Registry with `inc` (adds 1 to `n`) and `mark` (sets `marked`).
    fn counting_registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register_fn("inc", "increment n", |mut s: State| {
            let n = s.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            s.set("n", json!(n + 1));
            Ok(s)
        });
        registry.register_fn("mark", "set marked", |mut s: State| {
            s.set("marked", json!(true));
            Ok(s)
        });
        Arc::new(registry)
    }

    fn executor() -> GraphExecutor {
        GraphExecutor::new(counting_registry())
    }

    #[test]
    fn linear_graph_logs_before_and_after() {
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .tool("b", "mark")
            .edge("a", "b")
            .edge("b", END)
            .build()
            .unwrap();

        let result = executor().run(&graph, State::new()).unwrap();

        assert_eq!(result.final_state.get("n"), Some(&json!(1)));
        assert_eq!(result.final_state.get("marked"), Some(&json!(true)));
        assert_eq!(result.logs.len(), 2);
        match &result.logs[0] {
            LogEntry::Tool { node, before, after } => {
                assert_eq!(node, "a");
                assert!(before.get("n").is_none());
                assert_eq!(after.get("n"), Some(&json!(1)));
            }
            other => panic!("expected tool entry, got {other:?}"),
        }
        assert_eq!(result.logs[1].node(), Some("b"));
    }

    #[test]
    fn tool_without_edge_routes_to_end() {
        let graph = GraphBuilder::new("a").tool("a", "inc").build().unwrap();
        let result = executor().run(&graph, State::new()).unwrap();
        assert_eq!(result.tool_steps(), 1);
        assert!(!result.hit_iteration_cap());
    }

    #[test]
    fn self_loop_stops_after_exceeding_cap() {
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .edge("a", "a")
            .max_iterations(3)
            .build()
            .unwrap();

        let result = executor().run(&graph, State::new()).unwrap();

        assert_eq!(result.tool_steps(), 4);
        assert!(result.hit_iteration_cap());
        assert_eq!(
            serde_json::to_value(result.logs.last().unwrap()).unwrap(),
            json!({"error": "Max iterations exceeded"})
        );
        assert_eq!(result.final_state.get("n"), Some(&json!(4)));
    }

    #[test]
    fn condition_branches_without_counting() {
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .condition("check", "state['n'] < 3")
            .edge("a", "check")
            .branch("check", "a", END)
            .max_iterations(3)
            .build()
            .unwrap();

        let result = executor().run(&graph, State::new()).unwrap();

        assert_eq!(result.final_state.get("n"), Some(&json!(3)));
        assert_eq!(result.tool_steps(), 3);
        assert!(!result.hit_iteration_cap());
        let conditions: Vec<bool> = result
            .logs
            .iter()
            .filter_map(|e| match e {
                LogEntry::Condition { result, .. } => Some(*result),
                _ => None,
            })
            .collect();
        assert_eq!(conditions, vec![true, true, false]);
        assert_eq!(
            serde_json::to_value(&result.logs[1]).unwrap(),
            json!({"node": "check", "type": "condition", "condition": "state['n'] < 3", "result": true})
        );
    }

    #[test]
    fn all_nodes_policy_counts_conditions() {
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .condition("check", "state['n'] < 3")
            .edge("a", "check")
            .branch("check", "a", END)
            .max_iterations(3)
            .build()
            .unwrap();

        let exec = executor().with_config(ExecutorConfig {
            iteration_policy: IterationPolicy::AllNodes,
        });
        let result = exec.run(&graph, State::new()).unwrap();

        // a, check, a, check: the fourth visit exceeds the cap.
        assert!(result.hit_iteration_cap());
        assert_eq!(result.tool_steps(), 2);
        assert_eq!(result.final_state.get("n"), Some(&json!(2)));
    }

    #[test]
    fn unknown_node_is_an_error() {
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .edge("a", "ghost")
            .build_unchecked();
        match executor().run(&graph, State::new()) {
            Err(RemedyError::UnknownNode { node }) => assert_eq!(node, "ghost"),
            other => panic!("Expected UnknownNode, got: {other:?}"),
        }
    }

    #[test]
    fn unknown_tool_is_an_error() {
        let graph = GraphBuilder::new("a").tool("a", "nope").build().unwrap();
        match executor().run(&graph, State::new()) {
            Err(RemedyError::UnknownTool { tool, node }) => {
                assert_eq!(tool, "nope");
                assert_eq!(node, "a");
            }
            other => panic!("Expected UnknownTool, got: {other:?}"),
        }
    }

    #[test]
    fn missing_branch_at_runtime_is_a_validation_error() {
        let graph: Graph = serde_json::from_value(json!({
            "nodes": {"c": {"kind": "condition", "expression": "False"}},
            "edges": {"c": {"true": "end"}},
            "start_node": "c"
        }))
        .unwrap();
        let err = executor().run(&graph, State::new()).unwrap_err();
        assert!(matches!(err, RemedyError::Validation(_)), "got: {err:?}");
    }

    #[test]
    fn tool_errors_abort_the_run() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("fail", "always fails", |_| {
            Err(RemedyError::Tool {
                tool: "fail".into(),
                message: "boom".into(),
            })
        });
        let graph = GraphBuilder::new("a").tool("a", "fail").build().unwrap();
        let err = GraphExecutor::new(Arc::new(registry))
            .run(&graph, State::new())
            .unwrap_err();
        assert!(matches!(err, RemedyError::Tool { .. }));
    }

    #[tokio::test]
    async fn emits_run_events() {
        let events = EventEmitter::new(32);
        let mut rx = events.subscribe();
        let graph = GraphBuilder::new("a")
            .tool("a", "inc")
            .condition("check", "False")
            .edge("a", "check")
            .branch("check", "a", END)
            .build()
            .unwrap();

        executor()
            .with_events(events)
            .run(&graph, State::new())
            .unwrap();

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            received.push(event);
        }
        assert!(matches!(received[0], RunEvent::RunStarted { node_count: 2, .. }));
        assert!(matches!(
            &received[1],
            RunEvent::ToolApplied { node_id, iteration: 1, .. } if node_id == "a"
        ));
        assert!(matches!(
            &received[2],
            RunEvent::ConditionEvaluated { result: false, next, .. } if next == END
        ));
        assert!(matches!(received[3], RunEvent::RunCompleted { steps: 2, .. }));
    }
}
