//! ragmesh: multi-engine document ingestion and semantic retrieval.
//!
//! Documents are split into overlapping chunks, embedded through a pluggable
//! model backend, and written to the retrieval engine their workspace is
//! bound to. Four engines sit behind one trait: a relational vector store, a
//! managed search cluster, a managed retrieval service, and a managed
//! knowledge base. Queries go through a single facade that validates the
//! workspace and dispatches to the right engine.
//!
//! Module map:
//! - [`models`] — workspaces, documents, chunks, search responses
//! - [`config`] / [`error`] — runtime configuration and the error taxonomy
//! - [`splitter`] — recursive text splitting
//! - [`catalog`] / [`embeddings`] / [`crossencoder`] — model metadata,
//!   embedding generation, passage reranking
//! - [`engines`] — the [`RetrievalEngine`](engines::RetrievalEngine) trait,
//!   its four implementations, and the registry
//! - [`store`] — workspace metadata and blob store collaborator traits
//! - [`ingest`] / [`search`] — the chunk orchestrator and the search facade
//! - [`crawler`] / [`sitemap`] — website ingestion

pub mod catalog;
pub mod config;
pub mod crawler;
pub mod crossencoder;
pub mod embeddings;
pub mod engines;
pub mod error;
pub mod ingest;
pub mod models;
pub mod search;
pub mod sitemap;
pub mod splitter;
pub mod store;

pub use error::{Error, Result};
