//! Managed search cluster engine.
//!
//! One index per workspace (`workspace_<sanitized id>`), one JSON document
//! per chunk with a dense vector field. Replace writes run a delete-by-query
//! for the document followed by a bulk insert; the two are not atomic, so a
//! failure between them leaves the document temporarily absent rather than
//! duplicated.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ClusterConfig;
use crate::embeddings::{EmbeddingModel, EmbeddingTask, EmbeddingsClient};
use crate::error::{Error, Result};
use crate::models::{
    Chunk, Document, DocumentType, EngineKind, Metric, SearchItem, SearchResponse, Workspace,
};

use super::{clamp_limit, merge_hybrid, sanitize_identifier, RetrievalEngine, WriteOutcome};

pub struct SearchClusterEngine {
    http: reqwest::Client,
    config: ClusterConfig,
    embeddings: Arc<EmbeddingsClient>,
}

/// Cluster-side document shape for a chunk. The embedding is written but
/// never read back on the query path.
#[derive(Debug, Serialize, Deserialize)]
struct ClusterDoc {
    workspace_id: String,
    document_id: String,
    document_sub_id: Option<String>,
    document_type: Option<DocumentType>,
    document_sub_type: Option<String>,
    path: Option<String>,
    title: Option<String>,
    content: Option<String>,
    content_complement: Option<String>,
    language: Option<String>,
    #[serde(skip_deserializing)]
    content_embeddings: Vec<f32>,
}

impl SearchClusterEngine {
    pub fn new(config: ClusterConfig, embeddings: Arc<EmbeddingsClient>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            config,
            embeddings,
        })
    }

    fn url(&self, path: &str) -> Result<String> {
        Ok(format!(
            "{}/{}",
            self.config.endpoint()?.trim_end_matches('/'),
            path
        ))
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

    fn embedding_model(workspace: &Workspace) -> EmbeddingModel {
        EmbeddingModel {
            provider: workspace.embeddings_model_provider,
            name: workspace.embeddings_model_name.clone(),
            dimensions: workspace.embeddings_model_dimensions,
        }
    }

    async fn delete_by_document(&self, index: &str, document_id: &str) -> Result<Option<u64>> {
        let url = self.url(&format!("{index}/_delete_by_query"))?;
        let response = self
            .authorize(self.http.post(&url))?
            .json(&json!({ "query": { "term": { "document_id": document_id } } }))
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "delete_by_query failed ({status}): {body}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        Ok(Some(
            payload.get("deleted").and_then(|d| d.as_u64()).unwrap_or(0),
        ))
    }

    async fn run_search(
        &self,
        index: &str,
        body: serde_json::Value,
    ) -> Result<Vec<(String, f64, ClusterDoc)>> {
        let url = self.url(&format!("{index}/_search"))?;
        let response = self
            .authorize(self.http.post(&url))?
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!("search failed ({status}): {body}")));
        }

        let payload: serde_json::Value = response.json().await?;
        let hits = payload
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(|h| h.as_array())
            .ok_or_else(|| Error::backend("search response missing hits"))?;

        hits.iter()
            .map(|hit| {
                let id = hit
                    .get("_id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::backend("search hit missing _id"))?
                    .to_string();
                let score = hit.get("_score").and_then(|v| v.as_f64()).unwrap_or(0.0);
                let source = hit
                    .get("_source")
                    .cloned()
                    .ok_or_else(|| Error::backend("search hit missing _source"))?;
                let doc: ClusterDoc = serde_json::from_value(source)
                    .map_err(|e| Error::backend(format!("malformed search hit: {e}")))?;
                Ok((id, score, doc))
            })
            .collect()
    }
}

#[async_trait]
impl RetrievalEngine for SearchClusterEngine {
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        let index = index_name(&workspace.id)?;
        let url = self.url(&index)?;

        let body = json!({
            "settings": { "index": { "knn": true } },
            "mappings": {
                "properties": {
                    "content_embeddings": {
                        "type": "knn_vector",
                        "dimension": workspace.embeddings_model_dimensions,
                        "method": {
                            "name": "hnsw",
                            "space_type": metric_space_type(workspace.metric),
                        },
                    },
                    "document_id": { "type": "keyword" },
                    "workspace_id": { "type": "keyword" },
                    "content": { "type": "text" },
                    "title": { "type": "text" },
                },
            },
        });

        let response = self.authorize(self.http.put(&url))?.json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        if text.contains("resource_already_exists_exception") {
            return Ok(());
        }
        Err(Error::backend(format!(
            "index creation failed ({status}): {text}"
        )))
    }

    async fn write_chunks(
        &self,
        workspace: &Workspace,
        document: &Document,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<WriteOutcome> {
        let index = index_name(&workspace.id)?;
        let mut outcome = WriteOutcome::default();

        if replace {
            outcome.removed = self
                .delete_by_document(&index, &document.document_id)
                .await?
                .unwrap_or(0);
        }

        if chunks.is_empty() {
            return Ok(outcome);
        }

        let mut body = String::new();
        for chunk in chunks {
            let action = json!({ "index": { "_index": index, "_id": chunk.chunk_id } });
            let doc = ClusterDoc {
                workspace_id: chunk.workspace_id.clone(),
                document_id: chunk.document_id.clone(),
                document_sub_id: chunk.document_sub_id.clone(),
                document_type: Some(chunk.document_type),
                document_sub_type: chunk.document_sub_type.clone(),
                path: Some(chunk.path.clone()),
                title: chunk.title.clone(),
                content: Some(chunk.content.clone()),
                content_complement: chunk.content_complement.clone(),
                language: Some(chunk.language.clone()),
                content_embeddings: chunk.content_embeddings.clone(),
            };
            body.push_str(&serde_json::to_string(&action)?);
            body.push('\n');
            body.push_str(&serde_json::to_string(&doc)?);
            body.push('\n');
        }

        let url = self.url("_bulk?refresh=true")?;
        let response = self
            .authorize(self.http.post(&url))?
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "bulk insert failed ({status}): {text}"
            )));
        }

        let payload: serde_json::Value = response.json().await?;
        if payload
            .get("errors")
            .and_then(|e| e.as_bool())
            .unwrap_or(false)
        {
            return Err(Error::backend("bulk insert reported item failures"));
        }

        outcome.added = chunks.len() as u64;
        Ok(outcome)
    }

    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()> {
        let index = index_name(workspace_id)?;
        if self
            .delete_by_document(&index, &document.document_id)
            .await?
            .is_none()
        {
            tracing::warn!(workspace_id, "index already absent on document delete");
        }
        Ok(())
    }

    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        let index = index_name(&workspace.id)?;
        let url = self.url(&index)?;
        let response = self.authorize(self.http.delete(&url))?.send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::warn!(workspace_id = %workspace.id, "index already absent on delete");
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::backend(format!(
                "index deletion failed ({status}): {body}"
            )));
        }
        Ok(())
    }

    async fn query(
        &self,
        workspace: &Workspace,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse> {
        let index = index_name(&workspace.id)?;
        let limit = clamp_limit(limit);

        let model = Self::embedding_model(workspace);
        let query_vectors = self
            .embeddings
            .generate(&model, &[query.to_string()], EmbeddingTask::SearchQuery)
            .await?;
        let query_vector = query_vectors
            .first()
            .ok_or_else(|| Error::backend("no embedding returned for query"))?;

        let knn_body = json!({
            "size": limit,
            "query": {
                "knn": {
                    "content_embeddings": { "vector": query_vector, "k": limit },
                },
            },
        });
        let vector_items: Vec<SearchItem> = self
            .run_search(&index, knn_body)
            .await?
            .into_iter()
            .map(|(id, score, doc)| {
                let mut item = doc_to_item(id, doc);
                item.vector_search_score = score;
                item.score = score;
                item
            })
            .collect();

        let keyword_items: Vec<SearchItem> = if workspace.hybrid_search {
            let keyword_body = json!({
                "size": limit,
                "query": {
                    "multi_match": { "query": query, "fields": ["content", "title"] },
                },
            });
            self.run_search(&index, keyword_body)
                .await?
                .into_iter()
                .map(|(id, score, doc)| {
                    let mut item = doc_to_item(id, doc);
                    item.keyword_search_score = Some(score);
                    item.score = score;
                    item
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut items = merge_hybrid(&vector_items, &keyword_items);
        items.truncate(limit);

        let mut response = SearchResponse::new(EngineKind::ManagedSearch, items);
        if full_response {
            response.vector_items = Some(vector_items);
            response.keyword_items = Some(keyword_items);
            response.query_languages = Some(workspace.languages.clone());
        }
        Ok(response)
    }
}

fn index_name(workspace_id: &str) -> Result<String> {
    Ok(format!("workspace_{}", sanitize_identifier(workspace_id)?))
}

fn metric_space_type(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "cosinesimil",
        Metric::L2 => "l2",
        Metric::InnerProduct => "innerproduct",
    }
}

fn doc_to_item(chunk_id: String, doc: ClusterDoc) -> SearchItem {
    SearchItem {
        chunk_id,
        workspace_id: doc.workspace_id,
        document_id: doc.document_id,
        document_sub_id: doc.document_sub_id,
        document_type: doc.document_type,
        document_sub_type: doc.document_sub_type,
        path: doc.path,
        language: doc.language,
        title: doc.title,
        content: doc.content,
        content_complement: doc.content_complement,
        vector_search_score: 0.0,
        keyword_search_score: None,
        score: 0.0,
    }
}
