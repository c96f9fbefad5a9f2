//! Collaborator contracts consumed by the pipeline.
//!
//! The workspace metadata store and the raw-content blob store live outside
//! this core; the traits here define the slice of their behavior the pipeline
//! depends on. Implementations must be `Send + Sync` trait objects.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Workspace;

/// Workspace metadata store.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Fetch a workspace record, or `None` if it does not exist.
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>>;

    /// Record the vector count for a document. With `replace` the count is
    /// overwritten; otherwise it is added to the existing count.
    async fn set_document_vectors(
        &self,
        workspace_id: &str,
        document_id: &str,
        count: u64,
        replace: bool,
    ) -> Result<()>;

    /// Record the sub-document count for a multi-page document.
    async fn set_document_subdocuments(
        &self,
        workspace_id: &str,
        document_id: &str,
        count: u64,
    ) -> Result<()>;
}

/// Raw-content blob store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()>;

    /// Remove every blob whose key starts with `prefix`. Removing a prefix
    /// with no blobs under it is a no-op, not an error.
    async fn delete_prefix(&self, prefix: &str) -> Result<()>;
}
