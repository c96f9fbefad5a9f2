//! Chunk ingestion orchestration.
//!
//! The orchestrator ties together splitting, embedding, the engine write,
//! the raw-content blob, and the metadata counters. Deletion ordering is
//! fixed: engine first, then blobs, then metadata. A failure partway through
//! leaves counters still pointing at a document whose backend data is gone,
//! which a re-run repairs; the reverse order would orphan backend data with
//! no metadata left to find it by.

use std::sync::Arc;

use uuid::Uuid;

use crate::embeddings::{EmbeddingModel, EmbeddingTask, EmbeddingsClient};
use crate::engines::{EngineRegistry, WriteOutcome};
use crate::error::{Error, Result};
use crate::models::{Chunk, ChunkingStrategy, Document, Workspace};
use crate::splitter;
use crate::store::{BlobStore, WorkspaceStore};

/// One batch of texts to index for a document.
#[derive(Debug, Clone, Default)]
pub struct ChunkRequest {
    pub texts: Vec<String>,
    /// Alternate text per chunk, positionally zipped with `texts`: served to
    /// the LLM instead of the embedded content (e.g. a table rendered as
    /// markdown while a description was embedded).
    pub complements: Vec<String>,
    /// Page identity for multi-page documents (crawls).
    pub document_sub_id: Option<String>,
    pub document_sub_type: Option<String>,
    /// Title override; falls back to the document title.
    pub title: Option<String>,
    /// Path override; falls back to the document path.
    pub path: Option<String>,
    /// Replace all existing chunks for the document instead of appending.
    pub replace: bool,
}

pub struct ChunkOrchestrator {
    registry: EngineRegistry,
    embeddings: Arc<EmbeddingsClient>,
    workspace_store: Arc<dyn WorkspaceStore>,
    blob_store: Arc<dyn BlobStore>,
}

impl ChunkOrchestrator {
    pub fn new(
        registry: EngineRegistry,
        embeddings: Arc<EmbeddingsClient>,
        workspace_store: Arc<dyn WorkspaceStore>,
        blob_store: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            registry,
            embeddings,
            workspace_store,
            blob_store,
        }
    }

    pub fn workspace_store(&self) -> &Arc<dyn WorkspaceStore> {
        &self.workspace_store
    }

    /// Provision the backend store for a new workspace.
    pub async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        let engine = self.registry.resolve(workspace.engine)?;
        engine.create_workspace_store(workspace).await
    }

    /// Split raw content with the workspace's chunking settings, then index
    /// the resulting chunks as a replace write.
    pub async fn split_and_add(
        &self,
        workspace: &Workspace,
        document: &Document,
        content: &str,
    ) -> Result<WriteOutcome> {
        let texts = split_content(workspace, content)?;
        self.add_chunks(
            workspace,
            document,
            ChunkRequest {
                texts,
                replace: true,
                ..Default::default()
            },
        )
        .await
    }

    /// Embed and index a batch of pre-split texts.
    ///
    /// Every text becomes one chunk with one embedding; the raw text is also
    /// written to the blob store so the original content can be served back
    /// without a backend query.
    pub async fn add_chunks(
        &self,
        workspace: &Workspace,
        document: &Document,
        request: ChunkRequest,
    ) -> Result<WriteOutcome> {
        check_strategy(workspace)?;
        let engine = self.registry.resolve(workspace.engine)?;

        let model = embedding_model(workspace);
        let vectors = self
            .embeddings
            .generate(&model, &request.texts, EmbeddingTask::StorePassage)
            .await?;

        for vector in &vectors {
            if vector.len() != workspace.embeddings_model_dimensions {
                return Err(Error::backend(format!(
                    "embedding dimensionality {} does not match workspace dimensionality {}",
                    vector.len(),
                    workspace.embeddings_model_dimensions
                )));
            }
        }

        let language = workspace
            .languages
            .first()
            .cloned()
            .unwrap_or_else(|| "english".to_string());

        let path = request.path.clone().unwrap_or_else(|| document.path.clone());
        let chunks: Vec<Chunk> = request
            .texts
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (text, vector))| Chunk {
                chunk_id: Uuid::new_v4().to_string(),
                workspace_id: workspace.id.clone(),
                document_id: document.document_id.clone(),
                document_sub_id: request.document_sub_id.clone(),
                document_type: document.document_type,
                document_sub_type: request.document_sub_type.clone(),
                path: path.clone(),
                title: request.title.clone().or_else(|| document.title.clone()),
                content: text.clone(),
                content_complement: request.complements.get(i).cloned(),
                content_embeddings: vector,
                language: language.clone(),
                metadata: serde_json::json!({}),
            })
            .collect();

        let outcome = engine
            .write_chunks(workspace, document, &chunks, request.replace)
            .await?;

        if request.replace {
            self.blob_store
                .delete_prefix(&document_prefix(&workspace.id, &document.document_id))
                .await?;
        }
        for chunk in &chunks {
            let key = blob_key(&workspace.id, &document.document_id, &chunk.chunk_id);
            self.blob_store.put(&key, chunk.content.as_bytes()).await?;
        }

        self.workspace_store
            .set_document_vectors(
                &workspace.id,
                &document.document_id,
                outcome.added,
                request.replace,
            )
            .await?;

        tracing::info!(
            workspace_id = %workspace.id,
            document_id = %document.document_id,
            added = outcome.added,
            removed = outcome.removed,
            "chunks indexed"
        );
        Ok(outcome)
    }

    /// Remove a document everywhere: engine, blobs, then metadata.
    pub async fn delete_document(&self, workspace: &Workspace, document: &Document) -> Result<()> {
        let engine = self.registry.resolve(workspace.engine)?;
        engine.delete_document(&workspace.id, document).await?;

        self.blob_store
            .delete_prefix(&document_prefix(&workspace.id, &document.document_id))
            .await?;

        self.workspace_store
            .set_document_vectors(&workspace.id, &document.document_id, 0, true)
            .await?;

        tracing::info!(
            workspace_id = %workspace.id,
            document_id = %document.document_id,
            "document deleted"
        );
        Ok(())
    }

    /// Remove a workspace's backend store and every blob under it.
    pub async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        let engine = self.registry.resolve(workspace.engine)?;
        engine.delete_workspace(workspace).await?;

        self.blob_store
            .delete_prefix(&format!("{}/", workspace.id))
            .await?;

        tracing::info!(workspace_id = %workspace.id, "workspace deleted");
        Ok(())
    }
}

/// Only the recursive strategy is implemented; any other configured strategy
/// is a hard error rather than a silent fallback.
fn check_strategy(workspace: &Workspace) -> Result<()> {
    match workspace.chunking_strategy {
        ChunkingStrategy::Recursive => Ok(()),
        other => Err(Error::config(format!(
            "chunking strategy {other:?} is not implemented"
        ))),
    }
}

fn split_content(workspace: &Workspace, content: &str) -> Result<Vec<String>> {
    check_strategy(workspace)?;
    Ok(splitter::split(
        content,
        workspace.chunk_size,
        workspace.chunk_overlap,
    ))
}

fn embedding_model(workspace: &Workspace) -> EmbeddingModel {
    EmbeddingModel {
        provider: workspace.embeddings_model_provider,
        name: workspace.embeddings_model_name.clone(),
        dimensions: workspace.embeddings_model_dimensions,
    }
}

fn document_prefix(workspace_id: &str, document_id: &str) -> String {
    format!("{workspace_id}/{document_id}/")
}

fn blob_key(workspace_id: &str, document_id: &str, chunk_id: &str) -> String {
    format!("{workspace_id}/{document_id}/{chunk_id}.txt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkingStrategy, EngineKind, Metric, ModelProvider, WorkspaceStatus};

    fn workspace(strategy: ChunkingStrategy) -> Workspace {
        Workspace {
            id: "ws1".to_string(),
            engine: EngineKind::RelationalVector,
            embeddings_model_provider: ModelProvider::Sagemaker,
            embeddings_model_name: "all-MiniLM-L6-v2".to_string(),
            embeddings_model_dimensions: 3,
            chunking_strategy: strategy,
            chunk_size: 256,
            chunk_overlap: 32,
            languages: vec!["english".to_string()],
            hybrid_search: false,
            has_index: false,
            metric: Metric::Cosine,
            status: WorkspaceStatus::Ready,
            external: false,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn unimplemented_strategy_is_config_error() {
        let err = check_strategy(&workspace(ChunkingStrategy::Semantic)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(check_strategy(&workspace(ChunkingStrategy::Recursive)).is_ok());
    }

    #[test]
    fn blob_keys_nest_under_document_prefix() {
        let key = blob_key("ws1", "d1", "c1");
        assert!(key.starts_with(&document_prefix("ws1", "d1")));
        assert_eq!(key, "ws1/d1/c1.txt");
    }
}
