//! Managed knowledge base engine.
//!
//! Like the retrieval service, the knowledge base ingests through its own
//! data sources, so this adapter is query-only. The retrieve call can run in
//! hybrid or pure semantic mode; the workspace's `hybrid_search` flag picks
//! which. Returned passages carry no stable chunk identity, so chunk ids are
//! synthesized from the result position.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use crate::config::ClusterConfig;
use crate::error::{Error, Result};
use crate::models::{
    Chunk, Document, DocumentType, EngineKind, SearchItem, SearchResponse, Workspace,
};

use super::{clamp_limit, RetrievalEngine, WriteOutcome};

pub struct KnowledgeBaseEngine {
    http: reqwest::Client,
    config: ClusterConfig,
}

impl KnowledgeBaseEngine {
    pub fn new(config: ClusterConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http, config })
    }

    fn knowledge_base_id(&self) -> Result<&str> {
        self.config
            .index
            .as_deref()
            .ok_or_else(|| Error::config("knowledge_base.index not configured"))
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
impl RetrievalEngine for KnowledgeBaseEngine {
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        self.knowledge_base_id()?;
        tracing::debug!(workspace_id = %workspace.id, "knowledge base store is pre-provisioned");
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
            "knowledge base workspaces ingest through data sources, not chunk writes",
        ))
    }

    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()> {
        tracing::warn!(
            workspace_id,
            document_id = %document.document_id,
            "document deletion is managed by the knowledge base, skipping"
        );
        Ok(())
    }

    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        tracing::warn!(
            workspace_id = %workspace.id,
            "knowledge base is never dropped with a workspace, skipping"
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
            "{}/knowledgebases/{}/retrieve",
            self.config.endpoint()?.trim_end_matches('/'),
            self.knowledge_base_id()?
        );

        let search_type = if workspace.hybrid_search {
            "HYBRID"
        } else {
            "SEMANTIC"
        };
        let body = json!({
            "retrievalQuery": { "text": query },
            "retrievalConfiguration": {
                "vectorSearchConfiguration": {
                    "numberOfResults": limit,
                    "overrideSearchType": search_type,
                },
            },
        });

        let response = self
            .authorize(self.http.post(&url))?
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "knowledge base retrieve failed ({status}): {text}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        let results = payload
            .get("retrievalResults")
            .and_then(|r| r.as_array())
            .ok_or_else(|| Error::backend("retrieve response missing retrievalResults"))?;

        let mut items = Vec::with_capacity(results.len());
        for (position, result) in results.iter().enumerate() {
            let content = result
                .get("content")
                .and_then(|c| c.get("text"))
                .and_then(|t| t.as_str())
                .map(str::to_string);
            let path = result
                .get("location")
                .and_then(|l| l.get("s3Location"))
                .and_then(|s| s.get("uri"))
                .and_then(|u| u.as_str())
                .map(str::to_string);
            let score = result.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);

            items.push(SearchItem {
                chunk_id: format!("{}-kb-{position}", workspace.id),
                workspace_id: workspace.id.clone(),
                document_id: path.clone().unwrap_or_default(),
                document_sub_id: None,
                document_type: Some(DocumentType::File),
                document_sub_type: None,
                path,
                language: None,
                title: None,
                content,
                content_complement: None,
                vector_search_score: score,
                keyword_search_score: None,
                score,
            });
        }
        items.truncate(limit);

        let mut response = SearchResponse::new(EngineKind::ManagedKnowledgeBase, items);
        if full_response {
            response.query_languages = Some(workspace.languages.clone());
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkingStrategy, Metric, ModelProvider, WorkspaceStatus};
    use httpmock::prelude::*;

    fn workspace(hybrid: bool) -> Workspace {
        Workspace {
            id: "ws1".to_string(),
            engine: EngineKind::ManagedKnowledgeBase,
            embeddings_model_provider: ModelProvider::Bedrock,
            embeddings_model_name: "titan-embed-text-v2".to_string(),
            embeddings_model_dimensions: 1024,
            chunking_strategy: ChunkingStrategy::Recursive,
            chunk_size: 256,
            chunk_overlap: 32,
            languages: vec!["english".to_string()],
            hybrid_search: hybrid,
            has_index: false,
            metric: Metric::Cosine,
            status: WorkspaceStatus::Ready,
            external: false,
            created_at: chrono::Utc::now(),
        }
    }

    fn engine(url: String) -> KnowledgeBaseEngine {
        KnowledgeBaseEngine::new(ClusterConfig {
            endpoint: Some(url),
            api_key_env: None,
            index: Some("kb-123".to_string()),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn hybrid_flag_picks_search_type() {
        let server = MockServer::start_async().await;
        let hybrid = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/knowledgebases/kb-123/retrieve")
                    .body_contains("HYBRID");
                then.status(200).json_body(serde_json::json!({
                    "retrievalResults": [{
                        "content": { "text": "passage one" },
                        "location": { "s3Location": { "uri": "s3://b/k.pdf" } },
                        "score": 0.9
                    }]
                }));
            })
            .await;

        let engine = engine(server.base_url());
        let response = engine.query(&workspace(true), "q", 5, false).await.unwrap();

        assert_eq!(hybrid.hits_async().await, 1);
        assert_eq!(response.engine, "managed-knowledgebase");
        assert_eq!(response.items[0].chunk_id, "ws1-kb-0");
        assert_eq!(response.items[0].content.as_deref(), Some("passage one"));
    }

    #[tokio::test]
    async fn writes_are_config_errors() {
        let engine = engine("http://localhost:1".to_string());
        let ws = workspace(false);
        let document = Document {
            document_id: "d1".to_string(),
            workspace_id: "ws1".to_string(),
            document_type: DocumentType::File,
            path: "f".to_string(),
            title: None,
            size: 0,
            status: crate::models::DocumentStatus::Processing,
            vectors: 0,
            sub_documents: 0,
            created_at: chrono::Utc::now(),
        };
        let err = engine
            .write_chunks(&ws, &document, &[], true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        engine.delete_document("ws1", &document).await.unwrap();
        engine.delete_workspace(&ws).await.unwrap();
    }
}
