//! Shared types, errors, state and run records for the Remedy workflow engine.
//!
//! This crate provides the foundational types used across all other Remedy crates:
//! - `RemedyError`: unified error taxonomy
//! - `State`: the key/value payload threaded through a run
//! - `LogEntry` / `RunResult`: the audit trail of a single run
//! - `RunRecord`: serializable run-history entry

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;

/// Unified error type for all Remedy subsystems.
#[derive(Debug, thiserror::Error)]
pub enum RemedyError {
    // === Lookup Errors ===
    #[error("Graph '{graph_id}' not found")]
    GraphNotFound { graph_id: String },

    #[error("Run '{run_id}' not found")]
    RunNotFound { run_id: String },

    /// A recorded run that failed; its `failed` record is stored under `run_id`.
    #[error("Run '{run_id}' failed: {source}")]
    RunFailed {
        run_id: String,
        #[source]
        source: Box<RemedyError>,
    },

    #[error("Node '{node}' is not defined in the graph")]
    UnknownNode { node: String },

    #[error("Tool '{tool}' referenced by node '{node}' is not registered")]
    UnknownTool { tool: String, node: String },

    // === Graph Errors ===
    #[error("Failed to evaluate expression '{expression}': {message}")]
    ExpressionEvaluation { expression: String, message: String },

    #[error("Graph validation failed: {0}")]
    Validation(String),

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    Tool { tool: String, message: String },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl RemedyError {
    /// Returns `true` if the error comes from the caller's input (graph
    /// definition, expression text, ids) and rerunning unchanged will fail again.
    pub fn is_terminal(&self) -> bool {
        if let RemedyError::RunFailed { source, .. } = self {
            return source.is_terminal();
        }
        matches!(
            self,
            RemedyError::GraphNotFound { .. }
                | RemedyError::RunNotFound { .. }
                | RemedyError::UnknownTool { .. }
                | RemedyError::ExpressionEvaluation { .. }
                | RemedyError::Validation(_)
        )
    }

    /// Maps the error to an HTTP status code for a request/response front end.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            RemedyError::RunFailed { source, .. } => source.http_status(),
            RemedyError::GraphNotFound { .. } | RemedyError::RunNotFound { .. } => Some(404),
            RemedyError::Validation(_) => Some(400),
            RemedyError::ExpressionEvaluation { .. } => Some(422),
            RemedyError::UnknownNode { .. }
            | RemedyError::UnknownTool { .. }
            | RemedyError::Tool { .. } => Some(500),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, RemedyError>`.
pub type Result<T> = std::result::Result<T, RemedyError>;

// ---------------------------------------------------------------------------
// State: key/value payload threaded through a run
// ---------------------------------------------------------------------------

/// Key holding the tabular rows.
pub const DATA_KEY: &str = "data";

/// Open-ended key/value map threaded by value through a run.
///
/// Every tool consumes a `State` and returns the complete replacement; the
/// previous value is never shared with the next step. Keys keep their
/// insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(Map<String, Value>);

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a state from an arbitrary JSON value, which must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(RemedyError::Other(format!(
                "state must be a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Insert or overwrite a key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Read a value by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Mutable access to a value by key.
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.0.get_mut(key)
    }

    /// Remove a key and return its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Rows under the `data` key. Anything that is not an array reads as empty.
    pub fn rows(&self) -> &[Value] {
        match self.0.get(DATA_KEY) {
            Some(Value::Array(rows)) => rows,
            _ => &[],
        }
    }

    /// Borrow the underlying JSON object.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume the state into a plain JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for State {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// LogEntry: one step of the execution log
// ---------------------------------------------------------------------------

/// Text of the terminal log entry written when the iteration cap is hit.
pub const MAX_ITERATIONS_EXCEEDED: &str = "Max iterations exceeded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Condition,
}

/// A single entry of the run log, in execution order.
///
/// The serialized field names are the external contract:
/// `{node, before, after}`, `{node, type, condition, result}` and `{error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogEntry {
    Condition {
        node: String,
        #[serde(rename = "type")]
        kind: StepKind,
        condition: String,
        result: bool,
    },
    Tool {
        node: String,
        before: State,
        after: State,
    },
    Error {
        error: String,
    },
}

impl LogEntry {
    pub fn tool(node: impl Into<String>, before: State, after: State) -> Self {
        LogEntry::Tool {
            node: node.into(),
            before,
            after,
        }
    }

    pub fn condition(node: impl Into<String>, condition: impl Into<String>, result: bool) -> Self {
        LogEntry::Condition {
            node: node.into(),
            kind: StepKind::Condition,
            condition: condition.into(),
            result,
        }
    }

    pub fn max_iterations_exceeded() -> Self {
        LogEntry::Error {
            error: MAX_ITERATIONS_EXCEEDED.to_string(),
        }
    }

    /// The node this entry was recorded for, if any.
    pub fn node(&self) -> Option<&str> {
        match self {
            LogEntry::Tool { node, .. } | LogEntry::Condition { node, .. } => Some(node),
            LogEntry::Error { .. } => None,
        }
    }

    pub fn is_tool_step(&self) -> bool {
        matches!(self, LogEntry::Tool { .. })
    }
}

// ---------------------------------------------------------------------------
// RunResult: output of a single graph execution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub final_state: State,
    pub logs: Vec<LogEntry>,
}

impl RunResult {
    /// Number of tool steps recorded in the log.
    pub fn tool_steps(&self) -> usize {
        self.logs.iter().filter(|e| e.is_tool_step()).count()
    }

    /// Whether the run stopped on the iteration cap.
    pub fn hit_iteration_cap(&self) -> bool {
        matches!(self.logs.last(), Some(LogEntry::Error { error }) if error == MAX_ITERATIONS_EXCEEDED)
    }
}

// ---------------------------------------------------------------------------
// RunRecord: run-history entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// History entry kept per run id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub graph_id: String,
    pub status: RunStatus,
    pub state: State,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RunRecord {
    /// A freshly started run holding its initial state.
    pub fn running(
        run_id: impl Into<String>,
        graph_id: impl Into<String>,
        initial_state: State,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            graph_id: graph_id.into(),
            status: RunStatus::Running,
            state: initial_state,
            logs: Vec::new(),
            error: None,
            started_at: chrono::Utc::now(),
            finished_at: None,
        }
    }

    /// Transition to `Completed`, taking the final state and logs.
    pub fn complete(mut self, result: RunResult) -> Self {
        self.status = RunStatus::Completed;
        self.state = result.final_state;
        self.logs = result.logs;
        self.finished_at = Some(chrono::Utc::now());
        self
    }

    /// Transition to `Failed`, keeping the initial state.
    pub fn fail(mut self, error: &RemedyError) -> Self {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.finished_at = Some(chrono::Utc::now());
        self
    }

    /// Serialize this record to JSON and write it to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Read a record from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let record: Self = serde_json::from_str(&data)?;
        Ok(record)
    }
}
