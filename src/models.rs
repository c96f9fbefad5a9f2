//! Core data models flowing through the ingestion and retrieval pipeline.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Backend engine a workspace stores its chunks in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EngineKind {
    RelationalVector,
    ManagedSearch,
    ManagedRetrieval,
    ManagedKnowledgeBase,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::RelationalVector => "relational-vector",
            EngineKind::ManagedSearch => "managed-search",
            EngineKind::ManagedRetrieval => "managed-retrieval",
            EngineKind::ManagedKnowledgeBase => "managed-knowledgebase",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "relational-vector" => Ok(EngineKind::RelationalVector),
            "managed-search" => Ok(EngineKind::ManagedSearch),
            "managed-retrieval" => Ok(EngineKind::ManagedRetrieval),
            "managed-knowledgebase" => Ok(EngineKind::ManagedKnowledgeBase),
            other => Err(Error::config(format!("unknown engine: {other}"))),
        }
    }
}

/// Embedding / cross-encoder model backend family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelProvider {
    Bedrock,
    Sagemaker,
    OpenAi,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::Bedrock => "bedrock",
            ModelProvider::Sagemaker => "sagemaker",
            ModelProvider::OpenAi => "openai",
        }
    }
}

impl FromStr for ModelProvider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "bedrock" => Ok(ModelProvider::Bedrock),
            "sagemaker" => Ok(ModelProvider::Sagemaker),
            "openai" => Ok(ModelProvider::OpenAi),
            other => Err(Error::config(format!("unsupported provider: {other}"))),
        }
    }
}

/// Distance metric used by the approximate-nearest-neighbor index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Cosine,
    L2,
    InnerProduct,
}

/// Chunking strategy requested by a workspace. Only `Recursive` is
/// implemented; anything else is a hard configuration error at the
/// orchestrator boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkingStrategy {
    Recursive,
    Layout,
    Semantic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkspaceStatus {
    Creating,
    Ready,
    Error,
    Deleted,
}

impl fmt::Display for WorkspaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkspaceStatus::Creating => "creating",
            WorkspaceStatus::Ready => "ready",
            WorkspaceStatus::Error => "error",
            WorkspaceStatus::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentStatus {
    Processing,
    Processed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentType {
    File,
    Website,
    Text,
    RssPost,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::File => "file",
            DocumentType::Website => "website",
            DocumentType::Text => "text",
            DocumentType::RssPost => "rss-post",
        }
    }
}

/// A named retrieval namespace with one fixed embedding model and one
/// backend engine. `embeddings_model_dimensions` is immutable after
/// creation: changing it would invalidate every stored vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub engine: EngineKind,
    pub embeddings_model_provider: ModelProvider,
    pub embeddings_model_name: String,
    pub embeddings_model_dimensions: usize,
    pub chunking_strategy: ChunkingStrategy,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Languages used for full-text index configuration.
    pub languages: Vec<String>,
    pub hybrid_search: bool,
    pub has_index: bool,
    pub metric: Metric,
    pub status: WorkspaceStatus,
    /// Managed-retrieval only: the index is shared multi-tenant, so queries
    /// are not filtered by the workspace attribute.
    #[serde(default)]
    pub external: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// A document owned by exactly one workspace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub workspace_id: String,
    pub document_type: DocumentType,
    pub path: String,
    pub title: Option<String>,
    pub size: u64,
    pub status: DocumentStatus,
    pub vectors: u64,
    /// Sub-document count for multi-page crawls.
    pub sub_documents: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

/// The atomic retrieval unit: a slice of document text plus its embedding.
///
/// `chunk_id` is globally unique across all workspaces; the embedding length
/// must equal the owning workspace's fixed dimensionality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub workspace_id: String,
    pub document_id: String,
    /// Disambiguates pages within one crawled document.
    pub document_sub_id: Option<String>,
    pub document_type: DocumentType,
    pub document_sub_type: Option<String>,
    pub path: String,
    pub title: Option<String>,
    pub content: String,
    /// Alternate/expanded text returned to the LLM instead of `content`.
    pub content_complement: Option<String>,
    pub content_embeddings: Vec<f32>,
    pub language: String,
    pub metadata: serde_json::Value,
}

/// One normalized search hit, shape shared by all four engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub chunk_id: String,
    pub workspace_id: String,
    pub document_id: String,
    pub document_sub_id: Option<String>,
    pub document_type: Option<DocumentType>,
    pub document_sub_type: Option<String>,
    pub path: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub content_complement: Option<String>,
    #[serde(default)]
    pub vector_search_score: f64,
    pub keyword_search_score: Option<f64>,
    pub score: f64,
}

/// Unified search response returned by every engine's query path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Engine name tag (e.g. `"relational-vector"`).
    pub engine: String,
    pub items: Vec<SearchItem>,
    /// Raw vector-only hits, populated when `full_response` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_items: Option<Vec<SearchItem>>,
    /// Raw keyword-only hits, populated when `full_response` was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword_items: Option<Vec<SearchItem>>,
    /// Languages used for hybrid full-text ranking.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_languages: Option<Vec<String>>,
}

impl SearchResponse {
    pub fn new(engine: EngineKind, items: Vec<SearchItem>) -> Self {
        Self {
            engine: engine.as_str().to_string(),
            items,
            vector_items: None,
            keyword_items: None,
            query_languages: None,
        }
    }
}

/// Ephemeral crawl state passed between workflow iterations. Serializable so
/// every iteration can run as its own stateless invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlState {
    /// URLs yet to visit, FIFO order.
    pub queue: VecDeque<String>,
    /// URLs already visited. A URL must never be both processed and queued.
    pub processed: BTreeSet<String>,
    pub iteration: u64,
    /// Pages successfully indexed so far. Filtered or failed URLs do not
    /// count against the limit.
    #[serde(default)]
    pub indexed: u64,
    /// Max pages per run.
    pub limit: u64,
    pub follow_links: bool,
    /// Content types eligible for processing (e.g. `"text/html"`).
    pub content_types: Vec<String>,
}

impl CrawlState {
    pub fn new(start_urls: Vec<String>, limit: u64, follow_links: bool) -> Self {
        let mut queue = VecDeque::new();
        let mut seen = BTreeSet::new();
        for url in start_urls {
            if seen.insert(url.clone()) {
                queue.push_back(url);
            }
        }
        Self {
            queue,
            processed: BTreeSet::new(),
            iteration: 0,
            indexed: 0,
            limit,
            follow_links,
            content_types: vec!["text/html".to_string()],
        }
    }

    /// Whether another iteration should run.
    pub fn has_work(&self) -> bool {
        !self.queue.is_empty() && self.indexed < self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_roundtrip() {
        for s in [
            "relational-vector",
            "managed-search",
            "managed-retrieval",
            "managed-knowledgebase",
        ] {
            let kind: EngineKind = s.parse().unwrap();
            assert_eq!(kind.as_str(), s);
        }
        assert!("opensearch".parse::<EngineKind>().is_err());
    }

    #[test]
    fn unknown_provider_is_config_error() {
        let err = "cohere".parse::<ModelProvider>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn crawl_state_dedupes_start_urls() {
        let state = CrawlState::new(
            vec![
                "https://a.test/".to_string(),
                "https://a.test/".to_string(),
                "https://b.test/".to_string(),
            ],
            10,
            true,
        );
        assert_eq!(state.queue.len(), 2);
        assert!(state.has_work());
    }
}
