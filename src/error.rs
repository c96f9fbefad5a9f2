//! Error taxonomy for the ingestion and retrieval pipeline.
//!
//! Callers need to distinguish four situations: a misconfiguration that must
//! never be retried, a missing resource that maps to 404-style semantics, a
//! transient backend fault that the embedding layer may retry, and everything
//! else. API-facing layers convert these into structured error responses
//! instead of leaking backend detail.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown chunking strategy, model provider, or engine. Hard failure,
    /// never retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// Workspace, document, or model absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Workspace exists but is not in the `ready` state.
    #[error("workspace {id} is not ready (status: {status})")]
    WorkspaceNotReady { id: String, status: String },

    /// Recognized retryable backend fault (service unavailable / internal
    /// error on embedding calls).
    #[error("transient backend error: {message}")]
    Transient { message: String },

    /// Any other backend failure. Surfaced immediately, no retry.
    #[error("backend error: {message}")]
    Backend { message: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Error::Transient {
            message: msg.into(),
        }
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Error::Backend {
            message: msg.into(),
        }
    }

    /// Whether the retry-with-backoff path may attempt this call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient { .. })
    }
}
