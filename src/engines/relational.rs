//! Relational vector store engine.
//!
//! Each workspace owns one physical table (`workspace_<sanitized id>`) with a
//! pgvector embedding column, optional per-language full-text columns, and an
//! optional approximate-nearest-neighbor index matching the workspace metric.
//! Replace writes run delete-then-insert inside a single transaction, so a
//! crash mid-write never leaves a document partially written.
//!
//! Identifiers are built only from [`sanitize_identifier`] output; every data
//! value goes through bind parameters.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

use crate::config::RelationalConfig;
use crate::embeddings::{EmbeddingModel, EmbeddingTask, EmbeddingsClient};
use crate::error::{Error, Result};
use crate::models::{
    Chunk, Document, DocumentType, EngineKind, Metric, SearchItem, SearchResponse, Workspace,
};

use super::{clamp_limit, merge_hybrid, sanitize_identifier, RetrievalEngine, WriteOutcome};

pub struct RelationalVectorEngine {
    pool: PgPool,
    embeddings: Arc<EmbeddingsClient>,
}

impl RelationalVectorEngine {
    pub fn new(pool: PgPool, embeddings: Arc<EmbeddingsClient>) -> Self {
        Self { pool, embeddings }
    }

    pub async fn connect(
        config: &RelationalConfig,
        embeddings: Arc<EmbeddingsClient>,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        Ok(Self::new(pool, embeddings))
    }

    fn embedding_model(workspace: &Workspace) -> EmbeddingModel {
        EmbeddingModel {
            provider: workspace.embeddings_model_provider,
            name: workspace.embeddings_model_name.clone(),
            dimensions: workspace.embeddings_model_dimensions,
        }
    }

    async fn vector_query(
        &self,
        table: &str,
        workspace: &Workspace,
        query_vector: &str,
        limit: usize,
    ) -> Result<Vec<SearchItem>> {
        let (operator, score_expr) = metric_expressions(workspace.metric);
        let sql = format!(
            "SELECT chunk_id, workspace_id, document_id, document_sub_id, document_type, \
                    document_sub_type, path, title, content, content_complement, language, \
                    {score_expr} AS score \
             FROM {table} \
             ORDER BY content_embeddings {operator} CAST($1 AS vector) \
             LIMIT $2"
        );

        let rows = sqlx::query(&sql)
            .bind(query_vector)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let score: f64 = row.get("score");
                let mut item = row_to_item(row);
                item.vector_search_score = score;
                item.score = score;
                item
            })
            .collect())
    }

    async fn keyword_query(
        &self,
        table: &str,
        workspace: &Workspace,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchItem>> {
        let mut items: Vec<SearchItem> = Vec::new();

        for language in &workspace.languages {
            let lang = sanitize_identifier(language)?;
            let sql = format!(
                "SELECT chunk_id, workspace_id, document_id, document_sub_id, document_type, \
                        document_sub_type, path, title, content, content_complement, language, \
                        ts_rank_cd(content_fts_{lang}, plainto_tsquery('{lang}', $1)) AS score \
                 FROM {table} \
                 WHERE content_fts_{lang} @@ plainto_tsquery('{lang}', $1) \
                 ORDER BY score DESC \
                 LIMIT $2"
            );

            let rows = sqlx::query(&sql)
                .bind(query)
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?;

            for row in &rows {
                let score: f64 = row.get::<f32, _>("score") as f64;
                let mut item = row_to_item(row);
                item.keyword_search_score = Some(score);
                item.score = score;
                items.push(item);
            }
        }

        // The same chunk can match in several languages; keep the best hit.
        items.sort_by(|a, b| {
            a.chunk_id.cmp(&b.chunk_id).then(
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        items.dedup_by(|a, b| a.chunk_id == b.chunk_id);
        Ok(items)
    }
}

#[async_trait]
impl RetrievalEngine for RelationalVectorEngine {
    async fn create_workspace_store(&self, workspace: &Workspace) -> Result<()> {
        let table = table_name(&workspace.id)?;

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        let mut columns = String::from(
            "chunk_id TEXT PRIMARY KEY, \
             workspace_id TEXT NOT NULL, \
             document_id TEXT NOT NULL, \
             document_sub_id TEXT, \
             document_type TEXT NOT NULL, \
             document_sub_type TEXT, \
             path TEXT NOT NULL, \
             title TEXT, \
             content TEXT NOT NULL, \
             content_complement TEXT, \
             language TEXT, \
             metadata JSONB NOT NULL DEFAULT '{}'",
        );
        columns.push_str(&format!(
            ", content_embeddings vector({}) NOT NULL",
            workspace.embeddings_model_dimensions
        ));
        for language in &workspace.languages {
            let lang = sanitize_identifier(language)?;
            columns.push_str(&format!(
                ", content_fts_{lang} tsvector GENERATED ALWAYS AS \
                 (to_tsvector('{lang}', content)) STORED"
            ));
        }

        sqlx::query(&format!("CREATE TABLE IF NOT EXISTS {table} ({columns})"))
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_document_id ON {table} (document_id)"
        ))
        .execute(&self.pool)
        .await?;

        for language in &workspace.languages {
            let lang = sanitize_identifier(language)?;
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_fts_{lang} \
                 ON {table} USING GIN (content_fts_{lang})"
            ))
            .execute(&self.pool)
            .await?;
        }

        if workspace.has_index {
            let ops = metric_index_ops(workspace.metric);
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_ann \
                 ON {table} USING hnsw (content_embeddings {ops})"
            ))
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    async fn write_chunks(
        &self,
        workspace: &Workspace,
        document: &Document,
        chunks: &[Chunk],
        replace: bool,
    ) -> Result<WriteOutcome> {
        let table = table_name(&workspace.id)?;
        let mut tx = self.pool.begin().await?;
        let mut outcome = WriteOutcome::default();

        if replace {
            let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE document_id = $1"))
                .bind(&document.document_id)
                .execute(&mut *tx)
                .await?;
            outcome.removed = deleted.rows_affected();
        }

        let insert = format!(
            "INSERT INTO {table} \
             (chunk_id, workspace_id, document_id, document_sub_id, document_type, \
              document_sub_type, path, title, content, content_complement, \
              content_embeddings, language, metadata) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, CAST($11 AS vector), $12, $13)"
        );

        for chunk in chunks {
            sqlx::query(&insert)
                .bind(&chunk.chunk_id)
                .bind(&chunk.workspace_id)
                .bind(&chunk.document_id)
                .bind(&chunk.document_sub_id)
                .bind(chunk.document_type.as_str())
                .bind(&chunk.document_sub_type)
                .bind(&chunk.path)
                .bind(&chunk.title)
                .bind(&chunk.content)
                .bind(&chunk.content_complement)
                .bind(vector_literal(&chunk.content_embeddings))
                .bind(&chunk.language)
                .bind(&chunk.metadata)
                .execute(&mut *tx)
                .await?;
        }
        outcome.added = chunks.len() as u64;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn delete_document(&self, workspace_id: &str, document: &Document) -> Result<()> {
        let table = table_name(workspace_id)?;
        let result = sqlx::query(&format!("DELETE FROM {table} WHERE document_id = $1"))
            .bind(&document.document_id)
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_undefined_table(&e) => {
                tracing::warn!(workspace_id, "workspace table already absent on delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_workspace(&self, workspace: &Workspace) -> Result<()> {
        let table = table_name(&workspace.id)?;
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        workspace: &Workspace,
        query: &str,
        limit: usize,
        full_response: bool,
    ) -> Result<SearchResponse> {
        let table = table_name(&workspace.id)?;
        let limit = clamp_limit(limit);

        let model = Self::embedding_model(workspace);
        let query_vectors = self
            .embeddings
            .generate(&model, &[query.to_string()], EmbeddingTask::SearchQuery)
            .await?;
        let query_vector = query_vectors
            .first()
            .map(|v| vector_literal(v))
            .ok_or_else(|| Error::backend("no embedding returned for query"))?;

        let vector_items = self
            .vector_query(&table, workspace, &query_vector, limit)
            .await?;
        let keyword_items = if workspace.hybrid_search {
            self.keyword_query(&table, workspace, query, limit).await?
        } else {
            Vec::new()
        };

        let mut items = merge_hybrid(&vector_items, &keyword_items);
        items.truncate(limit);

        let mut response = SearchResponse::new(EngineKind::RelationalVector, items);
        if full_response {
            response.vector_items = Some(vector_items);
            response.keyword_items = Some(keyword_items);
            response.query_languages = Some(workspace.languages.clone());
        }
        Ok(response)
    }
}

fn table_name(workspace_id: &str) -> Result<String> {
    Ok(format!("workspace_{}", sanitize_identifier(workspace_id)?))
}

/// pgvector distance operator and the similarity expression derived from it.
fn metric_expressions(metric: Metric) -> (&'static str, String) {
    match metric {
        Metric::Cosine => (
            "<=>",
            "1 - (content_embeddings <=> CAST($1 AS vector))".to_string(),
        ),
        Metric::L2 => (
            "<->",
            "-(content_embeddings <-> CAST($1 AS vector))".to_string(),
        ),
        // <#> returns the negated inner product.
        Metric::InnerProduct => (
            "<#>",
            "-(content_embeddings <#> CAST($1 AS vector))".to_string(),
        ),
    }
}

fn metric_index_ops(metric: Metric) -> &'static str {
    match metric {
        Metric::Cosine => "vector_cosine_ops",
        Metric::L2 => "vector_l2_ops",
        Metric::InnerProduct => "vector_ip_ops",
    }
}

/// pgvector input literal: `[v1,v2,...]`.
fn vector_literal(vector: &[f32]) -> String {
    let mut out = String::with_capacity(vector.len() * 8 + 2);
    out.push('[');
    for (i, v) in vector.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&v.to_string());
    }
    out.push(']');
    out
}

fn is_undefined_table(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.code().as_deref() == Some("42P01"))
}

fn row_to_item(row: &sqlx::postgres::PgRow) -> SearchItem {
    let document_type: String = row.get("document_type");
    SearchItem {
        chunk_id: row.get("chunk_id"),
        workspace_id: row.get("workspace_id"),
        document_id: row.get("document_id"),
        document_sub_id: row.get("document_sub_id"),
        document_type: parse_document_type(&document_type),
        document_sub_type: row.get("document_sub_type"),
        path: row.get("path"),
        language: row.get("language"),
        title: row.get("title"),
        content: row.get("content"),
        content_complement: row.get("content_complement"),
        vector_search_score: 0.0,
        keyword_search_score: None,
        score: 0.0,
    }
}

fn parse_document_type(s: &str) -> Option<DocumentType> {
    match s {
        "file" => Some(DocumentType::File),
        "website" => Some(DocumentType::Website),
        "text" => Some(DocumentType::Text),
        "rss-post" => Some(DocumentType::RssPost),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_name_is_sanitized() {
        assert_eq!(
            table_name("3f2a-bc91").unwrap(),
            "workspace_3f2a_bc91".to_string()
        );
        assert!(table_name("\u{1F980}").is_err());
    }

    #[test]
    fn vector_literal_format() {
        assert_eq!(vector_literal(&[1.0, -2.5, 0.0]), "[1,-2.5,0]");
        assert_eq!(vector_literal(&[]), "[]");
    }

    #[test]
    fn metric_operator_selection() {
        assert_eq!(metric_expressions(Metric::Cosine).0, "<=>");
        assert_eq!(metric_index_ops(Metric::L2), "vector_l2_ops");
        assert_eq!(metric_index_ops(Metric::InnerProduct), "vector_ip_ops");
    }
}
