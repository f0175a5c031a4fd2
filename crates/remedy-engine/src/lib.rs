//! Graph model, expression language, validation and execution engine.
//!
//! This crate implements the Remedy workflow runner: JSON graph model and
//! builder, the whitelisted condition expression language, lint rules, the
//! graph interpreter with its iteration cap, run events, graph/run stores, the
//! canonical remediation workflow, and the `WorkflowService` operations.

pub mod engine;
pub mod events;
pub mod expression;
pub mod graph;
pub mod service;
pub mod store;
pub mod validation;
pub mod workflow;

pub use engine::{ExecutorConfig, GraphExecutor, IterationPolicy};
pub use events::{EventEmitter, RunEvent};
pub use expression::{evaluate, evaluate_condition, parse_expression, truthy, Expr};
pub use graph::{Edge, Graph, GraphBuilder, Node, DEFAULT_MAX_ITERATIONS, END};
pub use service::WorkflowService;
pub use store::{GraphStore, InMemoryGraphStore, InMemoryRunStore, RunStore};
pub use validation::{validate, validate_or_raise, Diagnostic, LintRule, Severity};
pub use workflow::canonical_graph;
