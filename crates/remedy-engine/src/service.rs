//! Service operations over injected graph and run stores.

use std::sync::Arc;

use remedy_types::{RemedyError, Result, RunRecord, RunResult, State};

use crate::engine::GraphExecutor;
use crate::graph::Graph;
use crate::store::{GraphStore, InMemoryGraphStore, InMemoryRunStore, RunStore};
use crate::validation::validate_or_raise;
use crate::workflow::canonical_graph;

/// Builds, stores and runs workflow graphs.
#[derive(Clone)]
pub struct WorkflowService {
    executor: Arc<GraphExecutor>,
    graphs: Arc<dyn GraphStore>,
    runs: Arc<dyn RunStore>,
}

impl WorkflowService {
    pub fn new(
        executor: GraphExecutor,
        graphs: Arc<dyn GraphStore>,
        runs: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            executor: Arc::new(executor),
            graphs,
            runs,
        }
    }

    /// Default executor and registry over fresh in-memory stores.
    pub fn in_memory() -> Self {
        Self::with_executor(GraphExecutor::with_default_registry())
    }

    pub fn with_executor(executor: GraphExecutor) -> Self {
        Self::new(
            executor,
            Arc::new(InMemoryGraphStore::new()),
            Arc::new(InMemoryRunStore::new()),
        )
    }

    /// Build the canonical remediation graph and store it under a new id.
    pub async fn build_workflow(&self) -> Result<String> {
        let graph_id = self.store_graph(canonical_graph()?).await?;
        tracing::info!(%graph_id, "Built canonical workflow");
        Ok(graph_id)
    }

    /// Validate and store a caller-built graph under a new id.
    pub async fn register_graph(&self, graph: Graph) -> Result<String> {
        validate_or_raise(&graph)?;
        let graph_id = self.store_graph(graph).await?;
        tracing::info!(%graph_id, "Registered graph");
        Ok(graph_id)
    }

    async fn store_graph(&self, graph: Graph) -> Result<String> {
        let graph_id = uuid::Uuid::new_v4().to_string();
        self.graphs.save(&graph_id, graph).await?;
        Ok(graph_id)
    }

    pub async fn graph(&self, graph_id: &str) -> Result<Arc<Graph>> {
        self.graphs
            .load(graph_id)
            .await?
            .ok_or_else(|| RemedyError::GraphNotFound {
                graph_id: graph_id.to_string(),
            })
    }

    pub async fn graph_ids(&self) -> Result<Vec<String>> {
        self.graphs.ids().await
    }

    /// Run a stored graph without recording history.
    pub async fn execute_graph(&self, graph_id: &str, initial_state: State) -> Result<RunResult> {
        let graph = self.graph(graph_id).await?;
        self.executor.run(&graph, initial_state)
    }

    /// Run a stored graph and record it under a fresh run id.
    ///
    /// The record is stored as `running` before execution and replaced with
    /// the `completed` or `failed` outcome afterwards. A failed run returns
    /// [`RemedyError::RunFailed`], whose `run_id` fetches the failed record.
    pub async fn run_workflow(&self, graph_id: &str, initial_state: State) -> Result<RunRecord> {
        let graph = self.graph(graph_id).await?;
        let run_id = uuid::Uuid::new_v4().to_string();
        let record = RunRecord::running(run_id.as_str(), graph_id, initial_state.clone());
        self.runs.put(record.clone()).await?;
        tracing::info!(%run_id, %graph_id, "Run recorded");

        match self.executor.run(&graph, initial_state) {
            Ok(result) => {
                let record = record.complete(result);
                self.runs.put(record.clone()).await?;
                Ok(record)
            }
            Err(err) => {
                tracing::warn!(%run_id, error = %err, "Run failed");
                self.runs.put(record.fail(&err)).await?;
                Err(RemedyError::RunFailed {
                    run_id,
                    source: Box::new(err),
                })
            }
        }
    }

    pub async fn run_state(&self, run_id: &str) -> Result<RunRecord> {
        self.runs
            .get(run_id)
            .await?
            .ok_or_else(|| RemedyError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, END};
    use remedy_types::RunStatus;
    use serde_json::json;

    #[tokio::test]
    async fn build_workflow_stores_canonical_graph() {
        let service = WorkflowService::in_memory();
        let id = service.build_workflow().await.unwrap();
        assert_eq!(id.len(), 36);
        assert_eq!(service.graph(&id).await.unwrap().nodes.len(), 5);
        assert_eq!(service.graph_ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn each_build_gets_a_fresh_id() {
        let service = WorkflowService::in_memory();
        let a = service.build_workflow().await.unwrap();
        let b = service.build_workflow().await.unwrap();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let service = WorkflowService::in_memory();
        assert!(matches!(
            service.execute_graph("nope", State::new()).await,
            Err(RemedyError::GraphNotFound { .. })
        ));
        assert!(matches!(
            service.run_workflow("nope", State::new()).await,
            Err(RemedyError::GraphNotFound { .. })
        ));
        assert!(matches!(
            service.run_state("nope").await,
            Err(RemedyError::RunNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn register_graph_rejects_invalid_graphs() {
        let service = WorkflowService::in_memory();
        let bad = GraphBuilder::new("missing").build_unchecked();
        assert!(matches!(
            service.register_graph(bad).await,
            Err(RemedyError::Validation(_))
        ));
        assert!(service.graph_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_run_is_recorded() {
        let service = WorkflowService::in_memory();
        let graph = GraphBuilder::new("a")
            .tool("a", "not_registered")
            .edge("a", END)
            .build()
            .unwrap();
        let graph_id = service.register_graph(graph).await.unwrap();

        let initial = State::from_value(json!({"data": [{"x": 1}]})).unwrap();
        let err = service
            .run_workflow(&graph_id, initial.clone())
            .await
            .unwrap_err();
        let RemedyError::RunFailed { run_id, source } = err else {
            panic!("expected RunFailed, got: {err:?}");
        };
        assert!(matches!(*source, RemedyError::UnknownTool { .. }));

        let record = service.run_state(&run_id).await.unwrap();
        assert_eq!(record.run_id, run_id);
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.graph_id, graph_id);
        assert_eq!(record.state, initial);
        assert!(record.error.unwrap().contains("not_registered"));
        assert!(record.finished_at.is_some());
    }
}
