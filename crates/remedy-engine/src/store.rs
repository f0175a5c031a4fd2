//! Graph and run-history stores.
//!
//! The service receives its stores explicitly; the in-memory implementations
//! below are the defaults and keep every test isolated.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use remedy_types::{Result, RunRecord};

use crate::graph::Graph;

/// Storage for immutable graphs keyed by graph id.
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn save(&self, graph_id: &str, graph: Graph) -> Result<()>;
    async fn load(&self, graph_id: &str) -> Result<Option<Arc<Graph>>>;
    async fn ids(&self) -> Result<Vec<String>>;
}

/// Run history keyed by run id. `put` replaces any previous record.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn put(&self, record: RunRecord) -> Result<()>;
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;
}

#[derive(Default)]
pub struct InMemoryGraphStore {
    graphs: RwLock<HashMap<String, Arc<Graph>>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn save(&self, graph_id: &str, graph: Graph) -> Result<()> {
        self.graphs
            .write()
            .await
            .insert(graph_id.to_string(), Arc::new(graph));
        Ok(())
    }

    async fn load(&self, graph_id: &str) -> Result<Option<Arc<Graph>>> {
        Ok(self.graphs.read().await.get(graph_id).cloned())
    }

    async fn ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.graphs.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[derive(Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, RunRecord>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn put(&self, record: RunRecord) -> Result<()> {
        self.runs
            .write()
            .await
            .insert(record.run_id.clone(), record);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }
}
