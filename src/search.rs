//! Semantic search entry point.
//!
//! Validates the workspace, dispatches to the registered engine, and returns
//! the engine's normalized response unchanged. All retrieval callers go
//! through here so the not-found and not-ready checks happen exactly once.

use std::sync::Arc;

use crate::engines::{clamp_limit, EngineRegistry};
use crate::error::{Error, Result};
use crate::models::{SearchResponse, WorkspaceStatus};
use crate::store::WorkspaceStore;

pub struct SemanticSearch {
    registry: EngineRegistry,
    workspace_store: Arc<dyn WorkspaceStore>,
}

impl SemanticSearch {
    pub fn new(registry: EngineRegistry, workspace_store: Arc<dyn WorkspaceStore>) -> Self {
        Self {
            registry,
            workspace_store,
        }
    }

    /// Run a query against a workspace's engine.
    ///
    /// With `full_response` the engine also returns its per-channel raw hits
    /// and the languages used for keyword ranking.
    pub async fn search(
        &self,
        workspace_id: &str,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse> {
        let workspace = self
            .workspace_store
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| Error::not_found("workspace", workspace_id))?;

        if workspace.status != WorkspaceStatus::Ready {
            return Err(Error::WorkspaceNotReady {
                id: workspace.id.clone(),
                status: workspace.status.to_string(),
            });
        }

        let engine = self.registry.resolve(workspace.engine)?;
        let limit = clamp_limit(limit);

        tracing::debug!(workspace_id, engine = %workspace.engine, limit, "semantic search");
        engine.query(&workspace, query, limit, full_response).await
    }
}
