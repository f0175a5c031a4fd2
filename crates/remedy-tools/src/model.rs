//! Typed views of the reserved state keys used by the remediation tools.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use remedy_types::{RemedyError, Result, State};

use crate::stats;

pub const PROFILE_KEY: &str = "profile";
pub const ANOMALIES_KEY: &str = "anomalies";
pub const ANOMALY_COUNT_KEY: &str = "anomaly_count";
pub const RULES_KEY: &str = "rules";
pub const OPTIONS_KEY: &str = "options";

/// Read a reserved key, treating an absent or null value as the default.
pub(crate) fn read_key<T>(state: &State, key: &str, tool: &str) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    match state.get(key) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value.clone()).map_err(|e| RemedyError::Tool {
            tool: tool.to_string(),
            message: format!("invalid '{key}': {e}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub q1: f64,
    pub q3: f64,
    pub iqr: f64,
    pub lower_iqr: f64,
    pub upper_iqr: f64,
    pub mean: f64,
    pub std: f64,
    pub lower_z: Option<f64>,
    pub upper_z: Option<f64>,
    pub median: f64,
    pub mode: f64,
}

impl NumericStats {
    /// Statistics for a column, or `None` when it has no numeric values.
    ///
    /// Every field is finite: spreads and bounds that would overflow are
    /// saturated to `f64::MIN`/`f64::MAX`, so the profile always serializes
    /// as plain JSON numbers.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        use stats::saturate;

        let (q1, q3) = stats::quartiles(values)?;
        let iqr = saturate(q3 - q1);
        let mean = stats::mean(values)?;
        let std = stats::sample_std(values);
        let (lower_z, upper_z) = if std > 0.0 {
            (
                Some(saturate(mean - 3.0 * std)),
                Some(saturate(mean + 3.0 * std)),
            )
        } else {
            (None, None)
        };
        Some(Self {
            q1,
            q3,
            iqr,
            lower_iqr: saturate(q1 - 1.5 * iqr),
            upper_iqr: saturate(q3 + 1.5 * iqr),
            mean,
            std,
            lower_z,
            upper_z,
            median: stats::median(values)?,
            mode: stats::mode(values)?,
        })
    }

    /// Whether `value` lies inside the closed IQR bounds.
    pub fn within_iqr(&self, value: f64) -> bool {
        value >= self.lower_iqr && value <= self.upper_iqr
    }

    /// Winsorize `value` to the IQR bounds.
    pub fn clamp(&self, value: f64) -> f64 {
        if value < self.lower_iqr {
            self.lower_iqr
        } else if value > self.upper_iqr {
            self.upper_iqr
        } else {
            value
        }
    }

    /// Absolute z-score, when the spread is non-zero.
    pub fn z_score(&self, value: f64) -> Option<f64> {
        (self.std > 0.0).then(|| stats::saturate((value / self.std - self.mean / self.std).abs()))
    }
}

/// Per-column profile written under `profile`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub missing_counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub negative_counts: BTreeMap<String, usize>,
    #[serde(default)]
    pub numeric_stats: BTreeMap<String, Option<NumericStats>>,
}

impl Profile {
    pub fn stats(&self, column: &str) -> Option<&NumericStats> {
        self.numeric_stats.get(column).and_then(Option::as_ref)
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Issue {
    Missing,
    NegativeValue,
    OutlierIqr,
    OutlierZ,
}

impl Issue {
    /// The remediation action that addresses this issue.
    pub fn action(self) -> RuleAction {
        match self {
            Issue::Missing => RuleAction::FillMissing,
            Issue::NegativeValue => RuleAction::FixNegative,
            Issue::OutlierIqr | Issue::OutlierZ => RuleAction::FixOutlier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub row: usize,
    pub column: String,
    pub issue: Issue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f64>,
}

impl Anomaly {
    pub fn new(row: usize, column: impl Into<String>, issue: Issue) -> Self {
        Self {
            row,
            column: column.into(),
            issue,
            z: None,
        }
    }

    pub fn outlier_z(row: usize, column: impl Into<String>, z: f64) -> Self {
        Self {
            z: Some(z),
            ..Self::new(row, column, Issue::OutlierZ)
        }
    }
}

/// User flags under `options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOptions {
    #[serde(default)]
    pub use_zscore: bool,
    #[serde(default = "default_z_thresh")]
    pub z_thresh: f64,
}

fn default_z_thresh() -> f64 {
    3.0
}

impl Default for DetectionOptions {
    fn default() -> Self {
        Self {
            use_zscore: false,
            z_thresh: default_z_thresh(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    FillMissing,
    FixNegative,
    FixOutlier,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub column: String,
    pub action: RuleAction,
    pub value: Value,
    pub explain: String,
}

impl Rule {
    pub fn new(column: impl Into<String>, action: RuleAction, value: Value) -> Self {
        let column = column.into();
        let explain = match action {
            RuleAction::FillMissing => format!("Fill missing in '{column}' with {value}"),
            RuleAction::FixNegative => format!("Replace negative '{column}' with {value}"),
            RuleAction::FixOutlier => {
                format!("Replace outliers in '{column}' with median={value}")
            }
        };
        Self {
            column,
            action,
            value,
            explain,
        }
    }
}
