//! Tool trait, tool registry and the built-in data remediation tools.
//!
//! Provides the `Tool` trait, `ToolRegistry`, the statistics helpers shared by
//! the tools, typed views of the reserved state keys, and the four built-in
//! tools (profile_data, identify_anomalies, generate_rules, apply_rules).

pub mod builtin;
pub mod model;
pub mod stats;
pub mod tool;

pub use builtin::{
    default_registry, ApplyRulesTool, GenerateRulesTool, IdentifyAnomaliesTool, ProfileDataTool,
};
pub use model::{Anomaly, DetectionOptions, Issue, NumericStats, Profile, Rule, RuleAction};
pub use tool::{FnTool, Tool, ToolDefinition, ToolRegistry};

#[cfg(test)]
mod tests {
    use super::*;
    use remedy_types::{RemedyError, State};
    use serde_json::json;

    #[test]
    fn default_registry_has_all_builtin_tools() {
        let registry = default_registry();
        assert_eq!(registry.len(), 4);
        for name in [
            "profile_data",
            "identify_anomalies",
            "generate_rules",
            "apply_rules",
        ] {
            assert!(registry.has(name), "missing {name}");
        }
    }

    #[test]
    fn resolve_unknown_tool_names_the_node() {
        let registry = ToolRegistry::new();
        match registry.resolve("nope", "step_1") {
            Err(RemedyError::UnknownTool { tool, node }) => {
                assert_eq!(tool, "nope");
                assert_eq!(node, "step_1");
            }
            other => panic!("expected UnknownTool, got {:?}", other.map(|t| t.definition())),
        }
    }

    #[test]
    fn register_replaces_existing_name() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("mark", "first", |mut s: State| {
            s.set("mark", json!(1));
            Ok(s)
        });
        registry.register_fn("mark", "second", |mut s: State| {
            s.set("mark", json!(2));
            Ok(s)
        });

        assert_eq!(registry.len(), 1);
        let tool = registry.get("mark").unwrap();
        assert_eq!(tool.definition().description, "second");
        let out = tool.apply(State::new()).unwrap();
        assert_eq!(out.get("mark"), Some(&json!(2)));
    }

    #[test]
    fn tool_errors_propagate() {
        let mut registry = ToolRegistry::new();
        registry.register_fn("boom", "always fails", |_| {
            Err(RemedyError::Tool {
                tool: "boom".into(),
                message: "bad input".into(),
            })
        });
        let err = registry.get("boom").unwrap().apply(State::new()).unwrap_err();
        assert!(err.to_string().contains("bad input"));
    }

    #[test]
    fn builtin_tools_clean_a_dirty_column() {
        let registry = default_registry();
        let mut state = State::from_value(json!({
            "data": [{"x": -5}, {"x": null}, {"x": 1000}, {"x": 1}, {"x": 2}]
        }))
        .unwrap();

        for name in [
            "profile_data",
            "identify_anomalies",
            "generate_rules",
            "apply_rules",
        ] {
            state = registry.get(name).unwrap().apply(state).unwrap();
        }

        let xs: Vec<f64> = state
            .rows()
            .iter()
            .map(|row| row["x"].as_f64().unwrap())
            .collect();
        assert_eq!(xs, vec![1.0, 1.0, 629.5, 1.0, 2.0]);
        assert_eq!(state.get("anomaly_count"), Some(&json!(0)));

        let rules = state.get("rules").unwrap().as_array().unwrap();
        let actions: Vec<&str> = rules.iter().map(|r| r["action"].as_str().unwrap()).collect();
        assert_eq!(actions, vec!["fix_negative", "fill_missing", "fix_outlier"]);
    }

    #[test]
    fn profiling_again_after_cleanup_finds_nothing() {
        let registry = default_registry();
        let mut state = State::from_value(json!({
            "data": [{"v": 1}, {"v": 2}, {"v": 3}, {"v": 4}, {"v": 100}]
        }))
        .unwrap();
        for name in [
            "profile_data",
            "identify_anomalies",
            "generate_rules",
            "apply_rules",
            "profile_data",
            "identify_anomalies",
        ] {
            state = registry.get(name).unwrap().apply(state).unwrap();
        }
        // [1, 2, 3, 4, 7] re-profiles to bounds [-1, 7].
        assert_eq!(state.get("anomaly_count"), Some(&json!(0)));
    }
}
