use serde_json::{json, Value};

use remedy_types::{Result, State};

use crate::model::{
    read_key, Anomaly, DetectionOptions, Issue, Profile, ANOMALIES_KEY, ANOMALY_COUNT_KEY,
    OPTIONS_KEY, PROFILE_KEY,
};
use crate::stats::as_number;
use crate::tool::{Tool, ToolDefinition};

/// Flags missing, negative and outlying values against the current profile.
pub struct IdentifyAnomaliesTool;

impl IdentifyAnomaliesTool {
    pub const NAME: &'static str = "identify_anomalies";
}

impl Tool for IdentifyAnomaliesTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: Self::NAME.to_string(),
            description: "Flag missing values, negative values, IQR outliers and \
                          (with options.use_zscore) z-score outliers."
                .to_string(),
        }
    }

    fn apply(&self, mut state: State) -> Result<State> {
        let profile: Profile = read_key(&state, PROFILE_KEY, Self::NAME)?;
        let options: DetectionOptions = read_key(&state, OPTIONS_KEY, Self::NAME)?;

        let anomalies = detect(state.rows(), &profile, &options);
        tracing::debug!(count = anomalies.len(), "Identified anomalies");

        state.set(ANOMALY_COUNT_KEY, json!(anomalies.len()));
        state.set(ANOMALIES_KEY, serde_json::to_value(&anomalies)?);
        Ok(state)
    }
}

/// Scan each row's own keys, in row order.
///
/// Only the columns present on a row are inspected, so heterogeneous rows are
/// judged individually. One value may raise several independent flags.
pub fn detect(rows: &[Value], profile: &Profile, options: &DetectionOptions) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (i, row) in rows.iter().enumerate() {
        let Some(row) = row.as_object() else {
            continue;
        };
        for (column, value) in row {
            if value.is_null() {
                anomalies.push(Anomaly::new(i, column, Issue::Missing));
                continue;
            }
            let Some(num) = as_number(value) else {
                continue;
            };

            if num < 0.0 {
                anomalies.push(Anomaly::new(i, column, Issue::NegativeValue));
            }

            let Some(stats) = profile.stats(column) else {
                continue;
            };
            if !stats.within_iqr(num) {
                anomalies.push(Anomaly::new(i, column, Issue::OutlierIqr));
            }
            if options.use_zscore {
                if let Some(z) = stats.z_score(num) {
                    if z > options.z_thresh {
                        anomalies.push(Anomaly::outlier_z(i, column, z));
                    }
                }
            }
        }
    }

    anomalies
}
