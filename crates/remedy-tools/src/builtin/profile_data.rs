use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};

use remedy_types::{Result, State};

use crate::model::{NumericStats, Profile, PROFILE_KEY};
use crate::stats::as_number;
use crate::tool::{Tool, ToolDefinition};

/// Computes per-column missing/negative counts and numeric statistics.
pub struct ProfileDataTool;

impl ProfileDataTool {
    pub const NAME: &'static str = "profile_data";
}

impl Tool for ProfileDataTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Profile every column of `data`: missing and negative counts, \
                          quartiles, IQR and z-score bounds, mean, std, median and mode."
                .to_string(),
        }
    }

    /// With no rows at all the profile is an empty object.
    fn apply(&self, mut state: State) -> Result<State> {
        if state.rows().is_empty() {
            tracing::debug!("No rows to profile");
            state.set(PROFILE_KEY, Value::Object(Map::new()));
            return Ok(state);
        }
        let profile = profile_rows(state.rows());
        tracing::debug!(columns = profile.missing_counts.len(), "Profiled data");
        state.set(PROFILE_KEY, serde_json::to_value(&profile)?);
        Ok(state)
    }
}

/// Profile every column that appears in at least one row.
///
/// A row lacking the column counts as missing for it, the same as an explicit null.
pub fn profile_rows(rows: &[Value]) -> Profile {
    let mut seen = HashSet::new();
    let mut columns: Vec<&str> = Vec::new();
    for row in rows.iter().filter_map(Value::as_object) {
        for key in row.keys() {
            if seen.insert(key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut missing_counts = BTreeMap::new();
    let mut negative_counts = BTreeMap::new();
    let mut numeric_stats = BTreeMap::new();

    for column in columns {
        let mut values = Vec::new();
        let mut missing = 0;
        let mut negative = 0;

        for row in rows.iter().filter_map(Value::as_object) {
            match row.get(column) {
                None | Some(Value::Null) => missing += 1,
                Some(value) => {
                    if let Some(x) = as_number(value) {
                        values.push(x);
                        if x < 0.0 {
                            negative += 1;
                        }
                    }
                }
            }
        }

        missing_counts.insert(column.to_string(), missing);
        negative_counts.insert(column.to_string(), negative);
        numeric_stats.insert(column.to_string(), NumericStats::from_values(&values));
    }

    Profile {
        missing_counts,
        negative_counts,
        numeric_stats,
    }
}
