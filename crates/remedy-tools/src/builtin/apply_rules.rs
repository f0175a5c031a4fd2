use serde_json::{json, Value};

use remedy_types::{Result, State, DATA_KEY};

use crate::model::{
    read_key, Profile, Rule, RuleAction, ANOMALIES_KEY, ANOMALY_COUNT_KEY, PROFILE_KEY, RULES_KEY,
};
use crate::stats::as_number;
use crate::tool::{Tool, ToolDefinition};

/// Applies generated rules to `data` and clears the anomaly list.
pub struct ApplyRulesTool;

impl ApplyRulesTool {
    pub const NAME: &'static str = "apply_rules";
}

impl Tool for ApplyRulesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Fill missing values, replace negatives and winsorize outliers, \
                          then reset the anomaly list."
                .to_string(),
        }
    }

    fn apply(&self, mut state: State) -> Result<State> {
        let rules: Vec<Rule> = read_key(&state, RULES_KEY, Self::NAME)?;
        let profile: Profile = read_key(&state, PROFILE_KEY, Self::NAME)?;

        if let Some(Value::Array(rows)) = state.get_mut(DATA_KEY) {
            let changed = apply_to_rows(rows, &rules, &profile);
            tracing::debug!(rules = rules.len(), changed, "Applied rules");
        }

        // Reset regardless of whether every flagged value was fixed.
        state.set(ANOMALIES_KEY, json!([]));
        state.set(ANOMALY_COUNT_KEY, json!(0));
        Ok(state)
    }
}

/// Apply every rule to every row, returning the number of values written.
///
/// `fix_outlier` clamps to the profile's IQR bounds; the rule's own `value`
/// is not used for it.
pub fn apply_to_rows(rows: &mut [Value], rules: &[Rule], profile: &Profile) -> usize {
    let mut changed = 0;

    for rule in rules {
        let column = rule.column.as_str();
        let bounds = profile.stats(column);
        if rule.action == RuleAction::FixOutlier && bounds.is_none() {
            tracing::debug!(column, "No IQR bounds for outlier rule, skipping");
            continue;
        }

        for row in rows.iter_mut() {
            let Some(row) = row.as_object_mut() else {
                continue;
            };
            let current = row.get(column);
            let replacement = match rule.action {
                RuleAction::FillMissing => current
                    .map_or(true, Value::is_null)
                    .then(|| rule.value.clone()),
                RuleAction::FixNegative => current
                    .and_then(as_number)
                    .filter(|x| *x < 0.0)
                    .map(|_| rule.value.clone()),
                RuleAction::FixOutlier => match (current.and_then(as_number), bounds) {
                    (Some(x), Some(stats)) if !stats.within_iqr(x) => {
                        Some(Value::from(stats.clamp(x)))
                    }
                    _ => None,
                },
            };
            if let Some(value) = replacement {
                row.insert(column.to_string(), value);
                changed += 1;
            }
        }
    }

    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NumericStats;
    use std::collections::BTreeMap;

    fn profile_with(column: &str, values: &[f64]) -> Profile {
        let mut numeric_stats = BTreeMap::new();
        numeric_stats.insert(column.to_string(), NumericStats::from_values(values));
        Profile {
            numeric_stats,
            ..Profile::default()
        }
    }

    #[test]
    fn fix_outlier_clamps_to_bounds_not_rule_value() {
        let profile = profile_with("v", &[1.0, 2.0, 3.0, 4.0, 100.0]);
        let mut rows = vec![json!({"v": 100}), json!({"v": -40}), json!({"v": 3})];
        let rules = vec![Rule::new("v", RuleAction::FixOutlier, json!(2.5))];

        let changed = apply_to_rows(&mut rows, &rules, &profile);

        assert_eq!(changed, 2);
        assert_eq!(rows[0]["v"], json!(7.0));
        assert_eq!(rows[1]["v"], json!(-1.0));
        assert_eq!(rows[2]["v"], json!(3));
    }

    #[test]
    fn fill_missing_only_touches_null_or_absent() {
        let profile = profile_with("x", &[1.0, 2.0]);
        let mut rows = vec![json!({"x": null}), json!({"x": 5}), json!({"y": 1})];
        let rules = vec![Rule::new("x", RuleAction::FillMissing, json!(1.5))];

        apply_to_rows(&mut rows, &rules, &profile);

        assert_eq!(rows[0]["x"], json!(1.5));
        assert_eq!(rows[1]["x"], json!(5));
        assert_eq!(rows[2]["x"], json!(1.5));
    }

    #[test]
    fn fix_negative_only_touches_negative_numbers() {
        let profile = profile_with("x", &[1.0, 2.0]);
        let mut rows = vec![json!({"x": -3}), json!({"x": 0}), json!({"x": "-3"}), json!({"x": null})];
        let rules = vec![Rule::new("x", RuleAction::FixNegative, json!(2))];

        apply_to_rows(&mut rows, &rules, &profile);

        assert_eq!(rows[0]["x"], json!(2));
        assert_eq!(rows[1]["x"], json!(0));
        assert_eq!(rows[2]["x"], json!("-3"));
        assert_eq!(rows[3]["x"], Value::Null);
    }

    #[test]
    fn apply_always_resets_anomalies() {
        let state = State::from_value(json!({
            "data": [{"x": "text"}],
            "anomalies": [{"row": 0, "column": "x", "issue": "missing"}],
            "anomaly_count": 1,
            "rules": []
        }))
        .unwrap();

        let out = ApplyRulesTool.apply(state).unwrap();

        assert_eq!(out.get(ANOMALIES_KEY), Some(&json!([])));
        assert_eq!(out.get(ANOMALY_COUNT_KEY), Some(&json!(0)));
        assert_eq!(out.get(DATA_KEY), Some(&json!([{"x": "text"}])));
    }

    #[test]
    fn rejects_malformed_rules() {
        let state = State::from_value(json!({"rules": [{"column": "x"}]})).unwrap();
        assert!(ApplyRulesTool.apply(state).is_err());
    }
}
