//! Managed retrieval service engine.
//!
//! The service owns ingestion through its own connectors, so this adapter is
//! query-only: chunk writes are a configuration error, deletes are logged
//! no-ops, and workspace provisioning is nothing to do because the index is
//! pre-provisioned and shared. Queries are text-only; the service ranks
//! internally without a caller-supplied vector.
//!
//! Results are filtered to the calling workspace through an index attribute,
//! except for workspaces marked `external`, which search the whole shared
//! index.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, Document, DocumentType, EngineKind, SearchItem, SearchResponse, Workspace,
};

use super::{clamp_limit, RetrievalEngine, WriteOutcome};

pub struct RetrievalServiceEngine {
    http: reqwest::Client,
    config: ClusterConfig,
}

impl RetrievalServiceEngine {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    fn index(&self) -> Result<&str> {
        self.config
            .index
            .as_deref()
            .ok_or_else(|| Error::config("retrieval_service.index not configured"))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> Result<reqwest::RequestBuilder> {
        match &self.config.api_key_env {
            Some(var) => {
                let key = std::env::var(var).map_err(|_| {
                    Error::config(format!("api key environment variable {var} is not set"))
                })?;
                Ok(request.bearer_auth(key))
            }
            None => Ok(request),
        }
    }
}

#[async_trait]
impl RetrievalEngine for RetrievalServiceEngine {
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        // The shared index already exists; just make sure we could reach it.
        self.index()?;
        tracing::debug!(workspace_id = %workspace.id, "retrieval service uses a shared index");
        Ok(())
    }

    async fn write_chunks(
        &self,
        _workspace: &Workspace,
        _document: &Document,
        _chunks: &[Chunk],
        _replace: bool,
    ) -> Result<WriteOutcome> {
        Err(Error::config(
            "managed retrieval workspaces ingest through service connectors, not chunk writes",
        ))
    }

    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()> {
        tracing::warn!(
            workspace_id,
            document_id = %document.document_id,
            "document deletion is managed by the retrieval service, skipping"
        );
        Ok(())
    }

    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        tracing::warn!(
            workspace_id = %workspace.id,
            "shared retrieval index is never dropped with a workspace, skipping"
        );
        Ok(())
    }

    async fn query(
        &self,
        workspace: &Workspace,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse> {
        let limit = clamp_limit(limit);
        let url = format!(
            "{}/indexes/{}/query",
            self.config.endpoint()?.trim_end_matches('/'),
            self.index()?
        );

        let mut body = json!({ "query": query, "limit": limit });
        if !workspace.external {
            body["filter"] = json!({ "workspace_id": workspace.id });
        }

        let response = self
            .authorize(self.http.post(&url))?
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "retrieval query failed ({status}): {text}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let results = payload
            .get("results")
            .and_then(|r| r.as_array())
            .ok_or_else(|| Error::backend("retrieval response missing results"))?;

        let mut items = Vec::with_capacity(results.len());
        for result in results {
            let get_str =
                |key: &str| result.get(key).and_then(|v| v.as_str()).map(str::to_string);
            let score = result.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            items.push(SearchItem {
                chunk_id: get_str("id").unwrap_or_default(),
                workspace_id: workspace.id.clone(),
                document_id: get_str("document_id").unwrap_or_default(),
                document_sub_id: None,
                document_type: Some(DocumentType::File),
                document_sub_type: None,
                path: get_str("uri"),
                language: None,
                title: get_str("title"),
                content: get_str("excerpt"),
                content_complement: None,
                vector_search_score: score,
                keyword_search_score: None,
                score,
            });
        }
        items.truncate(limit);

        let mut response = SearchResponse::new(EngineKind::ManagedRetrieval, items);
        if full_response {
            response.query_languages = Some(workspace.languages.clone());
        }
        Ok(response)
    }
}
