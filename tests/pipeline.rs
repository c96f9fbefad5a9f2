//! End-to-end pipeline tests: ingest, search, replace, delete, and crawl
//! against an in-memory engine, with the embedding backend mocked.

mod common;

use std::sync::Arc;

use httpmock::prelude::*;

use ragmesh::catalog::ModelCatalog;
use ragmesh::config::{CrawlerConfig, ModelsConfig};
use ragmesh::crawler::Crawler;
use ragmesh::embeddings::EmbeddingsClient;
use ragmesh::engines::EngineRegistry;
use ragmesh::error::Error;
use ragmesh::ingest::ChunkOrchestrator;
use ragmesh::models::{CrawlState, DocumentType, EngineKind};
use ragmesh::search::SemanticSearch;
use ragmesh::store::memory::{MemoryBlobStore, MemoryWorkspaceStore};
use ragmesh::store::{BlobStore, WorkspaceStore};

use common::{document, workspace, MemoryEngine};

struct TestEnv {
    _models_server: MockServer,
    engine: Arc<MemoryEngine>,
    workspace_store: Arc<MemoryWorkspaceStore>,
    blob_store: Arc<MemoryBlobStore>,
    orchestrator: Arc<ChunkOrchestrator>,
    search: SemanticSearch,
}

/// Wire the full pipeline against a mocked embedding endpoint that returns
/// one 3-dimensional vector per call.
async fn test_env() -> TestEnv {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let models_server = MockServer::start_async().await;
    models_server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/endpoints/all-MiniLM-L6-v2/invocations");
            then.status(200)
                .json_body(serde_json::json!({ "vectors": [[0.1, 0.2, 0.3]] }));
        })
        .await;

    let models = ModelsConfig {
        sagemaker_endpoint: models_server.base_url(),
        ..Default::default()
    };
    let embeddings = Arc::new(EmbeddingsClient::new(models, ModelCatalog::with_builtins()).unwrap());

    let engine = Arc::new(MemoryEngine::new(embeddings.clone()));
    let mut registry = EngineRegistry::new();
    registry.register(EngineKind::RelationalVector, engine.clone());

    let workspace_store = Arc::new(MemoryWorkspaceStore::new());
    let blob_store = Arc::new(MemoryBlobStore::new());

    let orchestrator = Arc::new(ChunkOrchestrator::new(
        registry.clone(),
        embeddings,
        workspace_store.clone() as Arc<dyn WorkspaceStore>,
        blob_store.clone() as Arc<dyn BlobStore>,
    ));
    let search = SemanticSearch::new(registry, workspace_store.clone() as Arc<dyn WorkspaceStore>);

    TestEnv {
        _models_server: models_server,
        engine,
        workspace_store,
        blob_store,
        orchestrator,
        search,
    }
}

#[tokio::test]
async fn ingest_then_search_roundtrip() -> anyhow::Result<()> {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::RelationalVector);
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Text);

    env.orchestrator.create_workspace_store(&ws).await?;
    let outcome = env
        .orchestrator
        .split_and_add(&ws, &doc, "hello semantic world")
        .await?;

    assert_eq!(outcome.added, 1);
    assert_eq!(env.engine.chunk_count("ws1"), 1);
    assert_eq!(env.workspace_store.document_vectors("ws1", "d1"), 1);
    assert_eq!(env.blob_store.keys_with_prefix("ws1/d1/").len(), 1);

    let response = env.search.search("ws1", "hello", 5, false).await?;
    assert_eq!(response.engine, "relational-vector");
    assert_eq!(response.items.len(), 1);
    assert_eq!(
        response.items[0].content.as_deref(),
        Some("hello semantic world")
    );
    assert!(response.items[0].score > 0.99);
    Ok(())
}

#[tokio::test]
async fn replace_write_clears_prior_chunks_and_blobs() {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::RelationalVector);
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Text);

    env.orchestrator
        .split_and_add(&ws, &doc, "first version")
        .await
        .unwrap();
    let outcome = env
        .orchestrator
        .split_and_add(&ws, &doc, "second version")
        .await
        .unwrap();

    assert_eq!(outcome.removed, 1);
    assert_eq!(outcome.added, 1);
    assert_eq!(env.engine.chunk_count("ws1"), 1);
    assert_eq!(env.workspace_store.document_vectors("ws1", "d1"), 1);
    assert_eq!(env.blob_store.len(), 1);

    let response = env.search.search("ws1", "version", 5, false).await.unwrap();
    assert_eq!(
        response.items[0].content.as_deref(),
        Some("second version")
    );
}

#[tokio::test]
async fn delete_document_clears_engine_blobs_and_counters() -> anyhow::Result<()> {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::RelationalVector);
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Text);

    env.orchestrator
        .split_and_add(&ws, &doc, "soon to vanish")
        .await?;
    env.orchestrator.delete_document(&ws, &doc).await?;

    assert_eq!(env.engine.chunk_count("ws1"), 0);
    assert!(env.blob_store.is_empty());
    assert_eq!(env.workspace_store.document_vectors("ws1", "d1"), 0);
    Ok(())
}

#[tokio::test]
async fn hybrid_search_reports_both_channels() {
    let env = test_env().await;
    let mut ws = workspace("ws1", EngineKind::RelationalVector);
    ws.hybrid_search = true;
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Text);

    env.orchestrator
        .split_and_add(&ws, &doc, "hello world")
        .await
        .unwrap();

    let response = env.search.search("ws1", "hello", 5, true).await.unwrap();
    let item = &response.items[0];
    assert_eq!(item.keyword_search_score, Some(1.0));
    assert!(item.score > item.vector_search_score);
    assert_eq!(
        response.query_languages,
        Some(vec!["english".to_string()])
    );
}

#[tokio::test]
async fn unregistered_engine_is_config_error() {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::ManagedSearch);
    env.workspace_store.insert_workspace(ws);

    let err = env.search.search("ws1", "q", 5, false).await.unwrap_err();
    assert!(matches!(err, Error::Config(_)));
}

#[tokio::test]
async fn crawl_terminates_on_link_cycles_and_filters_content_types() {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::RelationalVector);
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Website);

    let site = MockServer::start_async().await;
    let base = site.base_url();
    site.mock_async(|when, then| {
        when.method(GET).path("/");
        then.status(200)
            .header("content-type", "text/html; charset=utf-8")
            .body(format!(
                r#"<html><head><title>Home</title></head><body>
                   <p>welcome to the home page</p>
                   <a href="{base}/b">next</a>
                   <a href="{base}/img.png">image</a>
                   </body></html>"#
            ));
    })
    .await;
    site.mock_async(|when, then| {
        when.method(GET).path("/b");
        then.status(200)
            .header("content-type", "text/html")
            .body(format!(
                r#"<html><body><p>second page content</p>
                   <a href="{base}/">back home</a></body></html>"#
            ));
    })
    .await;
    site.mock_async(|when, then| {
        when.method(GET).path("/img.png");
        then.status(200)
            .header("content-type", "image/png")
            .body("not html");
    })
    .await;

    let crawler = Crawler::new(&CrawlerConfig::default(), env.orchestrator.clone()).unwrap();
    let mut state = CrawlState::new(vec![format!("{base}/")], 10, true);
    crawler.crawl(&ws, &doc, &mut state).await.unwrap();

    // Three URLs consumed: home, /b, and the filtered image. The cycle back
    // to home never re-enters the queue, and the filtered image does not
    // count against the page limit.
    assert_eq!(state.processed.len(), 3);
    assert_eq!(state.indexed, 2);
    assert!(state.queue.is_empty());

    // Only the two HTML pages produced chunks.
    assert_eq!(env.engine.chunk_count("ws1"), 2);
    assert_eq!(env.workspace_store.document_vectors("ws1", "d1"), 2);
    assert_eq!(env.workspace_store.document_subdocuments("ws1", "d1"), 3);
}

#[tokio::test]
async fn crawl_respects_page_limit() {
    let env = test_env().await;
    let ws = workspace("ws1", EngineKind::RelationalVector);
    env.workspace_store.insert_workspace(ws.clone());
    let doc = document("ws1", "d1", DocumentType::Website);

    let site = MockServer::start_async().await;
    let base = site.base_url();
    // Every page links to a fresh one; only the limit stops the crawl.
    for i in 0..5 {
        site.mock_async(|when, then| {
            when.method(GET).path(format!("/p{i}"));
            then.status(200)
                .header("content-type", "text/html")
                .body(format!(
                    r#"<body><p>page {i} text</p><a href="{base}/p{next}">next</a></body>"#,
                    next = i + 1
                ));
        })
        .await;
    }

    let crawler = Crawler::new(&CrawlerConfig::default(), env.orchestrator.clone()).unwrap();
    let mut state = CrawlState::new(vec![format!("{base}/p0")], 3, true);
    crawler.crawl(&ws, &doc, &mut state).await.unwrap();

    assert_eq!(state.processed.len(), 3);
    assert!(!state.queue.is_empty());
    assert_eq!(env.engine.chunk_count("ws1"), 3);
}
