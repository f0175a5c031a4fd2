//! The canonical data-quality remediation workflow.

use remedy_tools::{ApplyRulesTool, GenerateRulesTool, IdentifyAnomaliesTool, ProfileDataTool};
use remedy_types::Result;

use crate::graph::{Graph, GraphBuilder, END};

pub const PROFILE_NODE: &str = "profile_data";
pub const DETECT_NODE: &str = "identify_anomalies";
pub const RULES_NODE: &str = "generate_rules";
pub const APPLY_NODE: &str = "apply_rules";
pub const CHECK_NODE: &str = "check_loop";

/// Loops back to detection while more anomalies remain than the threshold allows.
pub const LOOP_CONDITION: &str = "state['anomaly_count'] > state.get('threshold', 0)";

pub const CANONICAL_MAX_ITERATIONS: u64 = 10;

/// profile → detect → generate → apply → check, with `check` looping back to
/// detection on true and ending on false.
///
/// `apply_rules` resets `anomaly_count` to zero, so `check_loop` ends the run
/// right after the first pass.
pub fn canonical_graph() -> Result<Graph> {
    GraphBuilder::new(PROFILE_NODE)
        .tool(PROFILE_NODE, ProfileDataTool::NAME)
        .tool(DETECT_NODE, IdentifyAnomaliesTool::NAME)
        .tool(RULES_NODE, GenerateRulesTool::NAME)
        .tool(APPLY_NODE, ApplyRulesTool::NAME)
        .condition(CHECK_NODE, LOOP_CONDITION)
        .edge(PROFILE_NODE, DETECT_NODE)
        .edge(DETECT_NODE, RULES_NODE)
        .edge(RULES_NODE, APPLY_NODE)
        .edge(APPLY_NODE, CHECK_NODE)
        .branch(CHECK_NODE, DETECT_NODE, END)
        .max_iterations(CANONICAL_MAX_ITERATIONS)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Edge, Node};
    use crate::validation::validate;
    use serde_json::json;

    #[test]
    fn canonical_graph_shape() {
        let graph = canonical_graph().unwrap();
        assert_eq!(graph.start_node, PROFILE_NODE);
        assert_eq!(graph.nodes.len(), 5);
        assert_eq!(graph.max_iterations(), 10);
        assert_eq!(
            graph.node(CHECK_NODE),
            Some(&Node::condition(LOOP_CONDITION))
        );
        assert_eq!(graph.edge(CHECK_NODE), Some(&Edge::branch(DETECT_NODE, END)));
        assert!(validate(&graph).is_empty());
    }

    #[test]
    fn canonical_graph_json_contract() {
        let value = serde_json::to_value(canonical_graph().unwrap()).unwrap();
        assert_eq!(value["start_node"], json!("profile_data"));
        assert_eq!(
            value["nodes"]["apply_rules"],
            json!({"kind": "tool", "tool_name": "apply_rules"})
        );
        assert_eq!(value["edges"]["apply_rules"], json!("check_loop"));
        assert_eq!(
            value["edges"]["check_loop"],
            json!({"true": "identify_anomalies", "false": "end"})
        );
        assert_eq!(value["metadata"], json!({"max_iterations": 10}));
    }
}
