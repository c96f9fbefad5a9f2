//! Shared test fixtures: an in-memory retrieval engine and workspace
//! builders, so pipeline tests run without a live backend.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;

use ragmesh::embeddings::{EmbeddingModel, EmbeddingTask, EmbeddingsClient};
use ragmesh::engines::{RetrievalEngine, WriteOutcome};
use ragmesh::error::Result;
use ragmesh::models::{
    Chunk, ChunkingStrategy, Document, DocumentStatus, DocumentType, EngineKind, Metric,
    ModelProvider, SearchItem, SearchResponse, Workspace, WorkspaceStatus,
};

/// Brute-force in-memory engine: cosine similarity for the vector channel,
/// term counting for the keyword channel.
pub struct MemoryEngine {
    embeddings: Arc<EmbeddingsClient>,
    chunks: RwLock<HashMap<String, Vec<Chunk>>>,
}

impl MemoryEngine {
    pub fn new(embeddings: Arc<EmbeddingsClient>) -> Self {
        Self {
            embeddings,
            chunks: RwLock::new(HashMap::new()),
        }
    }

    pub fn chunk_count(&self, workspace_id: &str) -> usize {
        self.chunks
            .read()
            .unwrap()
            .get(workspace_id)
            .map(|c| c.len())
            .unwrap_or(0)
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)) as f64
    }
}

fn term_count(content: &str, query: &str) -> f64 {
    let content = content.to_lowercase();
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|term| content.contains(*term))
        .count() as f64
}

fn chunk_to_item(chunk: &Chunk) -> SearchItem {
    SearchItem {
        chunk_id: chunk.chunk_id.clone(),
        workspace_id: chunk.workspace_id.clone(),
        document_id: chunk.document_id.clone(),
        document_sub_id: chunk.document_sub_id.clone(),
        document_type: Some(chunk.document_type),
        document_sub_type: chunk.document_sub_type.clone(),
        path: Some(chunk.path.clone()),
        language: Some(chunk.language.clone()),
        title: chunk.title.clone(),
        content: Some(chunk.content.clone()),
        content_complement: chunk.content_complement.clone(),
        vector_search_score: 0.0,
        keyword_search_score: None,
        score: 0.0,
    }
}

#[async_trait]
impl RetrievalEngine for MemoryEngine {
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        self.chunks
            .write()
            .unwrap()
            .entry(workspace.id.clone())
            .or_default();
        Ok(())
    }

    async fn write_chunks(
        &self,
        workspace: &Workspace,
        document: &Document,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<WriteOutcome> {
        let mut store = self.chunks.write().unwrap();
        let entry = store.entry(workspace.id.clone()).or_default();

        let mut outcome = WriteOutcome::default();
        if replace {
            let before = entry.len();
            entry.retain(|c| c.document_id != document.document_id);
            outcome.removed = (before - entry.len()) as u64;
        }
        entry.extend(chunks.iter().cloned());
        outcome.added = chunks.len() as u64;
        Ok(outcome)
    }

    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()> {
        if let Some(entry) = self.chunks.write().unwrap().get_mut(workspace_id) {
            entry.retain(|c| c.document_id != document.document_id);
        }
        Ok(())
    }

    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        self.chunks.write().unwrap().remove(&workspace.id);
        Ok(())
    }

    async fn query(
        &self,
        workspace: &Workspace,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse> {
        let model = EmbeddingModel {
            provider: workspace.embeddings_model_provider,
            name: workspace.embeddings_model_name.clone(),
            dimensions: workspace.embeddings_model_dimensions,
        };
        let query_vectors = self
            .embeddings
            .generate(&model, &[query.to_string()], EmbeddingTask::SearchQuery)
            .await?;
        let query_vector = &query_vectors[0];

        let store = self.chunks.read().unwrap();
        let chunks = store.get(&workspace.id).cloned().unwrap_or_default();

        let mut items: Vec<SearchItem> = chunks
            .iter()
            .map(|chunk| {
                let vector_score = cosine(query_vector, &chunk.content_embeddings);
                let keyword_score = if workspace.hybrid_search {
                    Some(term_count(&chunk.content, query))
                } else {
                    None
                };
                let mut item = chunk_to_item(chunk);
                item.vector_search_score = vector_score;
                item.keyword_search_score = keyword_score;
                item.score = vector_score + keyword_score.unwrap_or(0.0);
                item
            })
            .collect();
        items.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        items.truncate(limit);

        let mut response = SearchResponse::new(EngineKind::RelationalVector, items);
        if full_response {
            response.query_languages = Some(workspace.languages.clone());
        }
        Ok(response)
    }
}

pub fn workspace(id: &str, engine: EngineKind) -> Workspace {
    Workspace {
        id: id.to_string(),
        engine,
        embeddings_model_provider: ModelProvider::Sagemaker,
        embeddings_model_name: "all-MiniLM-L6-v2".to_string(),
        embeddings_model_dimensions: 3,
        chunking_strategy: ChunkingStrategy::Recursive,
        chunk_size: 4000,
        chunk_overlap: 0,
        languages: vec!["english".to_string()],
        hybrid_search: false,
        has_index: false,
        metric: Metric::Cosine,
        status: WorkspaceStatus::Ready,
        external: false,
        created_at: chrono::Utc::now(),
    }
}

pub fn document(workspace_id: &str, id: &str, document_type: DocumentType) -> Document {
    Document {
        document_id: id.to_string(),
        workspace_id: workspace_id.to_string(),
        document_type,
        path: format!("test://{id}"),
        title: Some(format!("Document {id}")),
        size: 0,
        status: DocumentStatus::Processing,
        vectors: 0,
        sub_documents: 0,
        created_at: chrono::Utc::now(),
    }
}
