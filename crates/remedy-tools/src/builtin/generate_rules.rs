use std::collections::HashSet;

use serde_json::Value;

use remedy_types::{Result, State};

use crate::model::{
    read_key, Anomaly, NumericStats, Profile, Rule, RuleAction, ANOMALIES_KEY, PROFILE_KEY,
    RULES_KEY,
};
use crate::stats::{is_number, median_value};
use crate::tool::{Tool, ToolDefinition};

/// Turns detected anomalies into one remediation rule per (column, action).
pub struct GenerateRulesTool;

impl GenerateRulesTool {
    pub const NAME: &'static str = "generate_rules";
}

impl Tool for GenerateRulesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Derive fill_missing / fix_negative / fix_outlier rules from the \
                          anomaly list, replacing with the median of clean values."
                .to_string(),
        }
    }

    fn apply(&self, mut state: State) -> Result<State> {
        let anomalies: Vec<Anomaly> = read_key(&state, ANOMALIES_KEY, Self::NAME)?;
        let profile: Profile = read_key(&state, PROFILE_KEY, Self::NAME)?;

        let rules = generate(state.rows(), &anomalies, &profile);
        tracing::debug!(count = rules.len(), "Generated rules");

        state.set(RULES_KEY, serde_json::to_value(&rules)?);
        Ok(state)
    }
}

/// Rules in first-seen order; later anomalies for an existing
/// `(column, action)` key are ignored. Columns without numeric statistics
/// get no rule.
pub fn generate(rows: &[Value], anomalies: &[Anomaly], profile: &Profile) -> Vec<Rule> {
    let mut seen: HashSet<(&str, RuleAction)> = HashSet::new();
    let mut rules = Vec::new();

    for anomaly in anomalies {
        let Some(stats) = profile.stats(&anomaly.column) else {
            tracing::debug!(column = %anomaly.column, "No numeric stats, skipping anomaly");
            continue;
        };
        let action = anomaly.issue.action();
        if !seen.insert((anomaly.column.as_str(), action)) {
            continue;
        }
        let value = clean_replacement(rows, &anomaly.column, stats);
        rules.push(Rule::new(anomaly.column.clone(), action, value));
    }

    rules
}

/// Median of the column's numeric values inside the IQR bounds, falling back
/// to the median of all numeric values, then to null.
pub fn clean_replacement(rows: &[Value], column: &str, stats: &NumericStats) -> Value {
    let numeric: Vec<&Value> = rows
        .iter()
        .filter_map(|row| row.get(column))
        .filter(|v| is_number(v))
        .collect();

    let clean: Vec<&Value> = numeric
        .iter()
        .copied()
        .filter(|v| v.as_f64().is_some_and(|x| stats.within_iqr(x)))
        .collect();

    let pool = if clean.is_empty() { &numeric } else { &clean };
    median_value(pool).unwrap_or(Value::Null)
}
