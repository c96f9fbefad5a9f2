//! The unified engine adapter contract and its four implementations.
//!
//! Every backend — the relational vector store, the managed search cluster,
//! the managed retrieval service, and the managed knowledge base — sits
//! behind [`RetrievalEngine`]. Callers dispatch through an
//! [`EngineRegistry`] built explicitly at startup; there is no ambient
//! global registration.

pub mod knowledge_base;
pub mod relational;
pub mod retrieval_service;
pub mod search_cluster;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::embeddings::EmbeddingsClient;
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, EngineKind, SearchItem, SearchResponse, Workspace};

use knowledge_base::KnowledgeBaseEngine;
use relational::RelationalVectorEngine;
use retrieval_service::RetrievalServiceEngine;
use search_cluster::SearchClusterEngine;

/// Query limits are clamped into this range regardless of caller input.
pub const MIN_QUERY_LIMIT: usize = 1;
pub const MAX_QUERY_LIMIT: usize = 100;

/// Counts reported back from a chunk write for caller bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Chunks removed by a replace write (prior chunks for the document).
    pub removed: u64,
    /// Chunks inserted.
    pub added: u64,
}

/// Contract every engine adapter implements.
///
/// Failure semantics: "resource not found" during a delete is a successful
/// no-op with a logged warning; every other backend error propagates as a
/// typed failure and the enclosing write must not report partial success.
#[async_trait]
pub trait RetrievalEngine: Send + Sync {
    /// Provision backend storage keyed by the workspace id. Idempotent with
    /// respect to already-existing storage.
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()>;

    /// Write a batch of chunks. With `replace`, all prior chunks for
    /// `(workspace_id, document_id)` are cleared first — atomically where
    /// the backend allows it.
    async fn write_chunks(
        &self,
        workspace: &Workspace,
        document: &Document,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<WriteOutcome>;

    /// Remove all chunks for a document from the backend.
    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()>;

    /// Remove the entire backend-side store for a workspace.
    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()>;

    /// Query the backend, returning engine-tagged normalized records.
    async fn query(
        &self,
        workspace: &Workspace,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse>;
}

/// Explicit engine registration table, constructed once at startup and
/// passed into the components that dispatch on workspace engine.
#[derive(Default, Clone)]
pub struct EngineRegistry {
    engines: HashMap<EngineKind, Arc<dyn RetrievalEngine>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self {
            engines: HashMap::new(),
        }
    }

    pub fn register(&mut self, kind: EngineKind, engine: Arc<dyn RetrievalEngine>) {
        self.engines.insert(kind, engine);
    }

    pub fn get(&self, kind: EngineKind) -> Option<Arc<dyn RetrievalEngine>> {
        self.engines.get(&kind).cloned()
    }

    /// Resolve an engine or fail with a configuration error — an engine the
    /// registry does not know is never a silent null result.
    pub fn resolve(&self, kind: EngineKind) -> Result<Arc<dyn RetrievalEngine>> {
        self.get(kind)
            .ok_or_else(|| Error::config(format!("no adapter registered for engine: {kind}")))
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    /// Wire every configured engine. The relational engine is always
    /// registered; the managed backends only when their endpoint is set.
    pub async fn from_config(config: &Config, embeddings: Arc<EmbeddingsClient>) -> Result<Self> {
        let mut registry = Self::new();

        let relational =
            RelationalVectorEngine::connect(&config.relational, embeddings.clone()).await?;
        registry.register(EngineKind::RelationalVector, Arc::new(relational));

        if config.search_cluster.is_configured() {
            let engine =
                SearchClusterEngine::new(config.search_cluster.clone(), embeddings.clone())?;
            registry.register(EngineKind::ManagedSearch, Arc::new(engine));
        }
        if config.retrieval_service.is_configured() {
            let engine = RetrievalServiceEngine::new(config.retrieval_service.clone())?;
            registry.register(EngineKind::ManagedRetrieval, Arc::new(engine));
        }
        if config.knowledge_base.is_configured() {
            let engine = KnowledgeBaseEngine::new(config.knowledge_base.clone())?;
            registry.register(EngineKind::ManagedKnowledgeBase, Arc::new(engine));
        }

        Ok(registry)
    }
}

/// Clamp a caller-provided result limit into `[1, 100]`.
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(MIN_QUERY_LIMIT, MAX_QUERY_LIMIT)
}

/// Reduce a workspace id to a safe SQL/table identifier fragment.
///
/// Allow-list only: ASCII alphanumerics survive, every separator maps to an
/// underscore, and anything else is dropped. User-influenced values are
/// never formatted into SQL text without passing through here, and all data
/// values go through bind parameters.
pub fn sanitize_identifier(id: &str) -> Result<String> {
    let sanitized: String = id
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if matches!(c, '-' | '_' | '.' | ' ') {
                Some('_')
            } else {
                None
            }
        })
        .collect();

    if sanitized.is_empty() {
        return Err(Error::config(format!(
            "workspace id {id:?} yields an empty identifier"
        )));
    }
    Ok(sanitized)
}

/// Union vector and keyword hits by chunk id. A chunk present in both
/// channels scores the sum of the two; results come back sorted descending.
pub(crate) fn merge_hybrid(
    vector_items: &[SearchItem],
    keyword_items: &[SearchItem],
) -> Vec<SearchItem> {
    let mut merged: Vec<SearchItem> = vector_items.to_vec();

    for kw in keyword_items {
        if let Some(existing) = merged.iter_mut().find(|i| i.chunk_id == kw.chunk_id) {
            existing.keyword_search_score = kw.keyword_search_score;
            existing.score = existing.vector_search_score + kw.score;
        } else {
            merged.push(kw.clone());
        }
    }

    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    merged
}
