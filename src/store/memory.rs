//! In-memory and filesystem-backed collaborator implementations.
//!
//! [`MemoryWorkspaceStore`] and [`MemoryBlobStore`] use maps behind
//! `std::sync::RwLock`; they back tests and embedded use. [`FsBlobStore`]
//! lays blobs out under a root directory with the key as the relative path,
//! so prefix deletes map to directory removals.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::Workspace;

use super::{BlobStore, WorkspaceStore};

/// In-memory workspace metadata store.
#[derive(Default)]
pub struct MemoryWorkspaceStore {
    workspaces: RwLock<HashMap<String, Workspace>>,
    vectors: RwLock<HashMap<(String, String), u64>>,
    subdocuments: RwLock<HashMap<(String, String), u64>>,
}

impl MemoryWorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.workspaces
            .write()
            .unwrap()
            .insert(workspace.id.clone(), workspace);
    }

    pub fn document_vectors(&self, workspace_id: &str, document_id: &str) -> u64 {
        self.vectors
            .read()
            .unwrap()
            .get(&(workspace_id.to_string(), document_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn document_subdocuments(&self, workspace_id: &str, document_id: &str) -> u64 {
        self.subdocuments
            .read()
            .unwrap()
            .get(&(workspace_id.to_string(), document_id.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl WorkspaceStore for MemoryWorkspaceStore {
    async fn get_workspace(&self, id: &str) -> Result<Option<Workspace>> {
        Ok(self.workspaces.read().unwrap().get(id).cloned())
    }

    async fn set_document_vectors(
        &self,
        workspace_id: &str,
        document_id: &str,
        count: u64,
        replace: bool,
    ) -> Result<()> {
        let key = (workspace_id.to_string(), document_id.to_string());
        let mut vectors = self.vectors.write().unwrap();
        let entry = vectors.entry(key).or_insert(0);
        *entry = if replace { count } else { *entry + count };
        Ok(())
    }

    async fn set_document_subdocuments(
        &self,
        workspace_id: &str,
        document_id: &str,
        count: u64,
    ) -> Result<()> {
        self.subdocuments
            .write()
            .unwrap()
            .insert((workspace_id.to_string(), document_id.to_string()), count);
        Ok(())
    }
}

/// In-memory blob store.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.blobs
            .read()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        self.blobs
            .write()
            .unwrap()
            .retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }
}

/// Blob store rooted at a local directory.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<()> {
        // Keys are slash-separated, so a prefix ending at a path component
        // boundary is a directory under the root.
        let path = self.root.join(prefix.trim_end_matches('/'));
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(prefix, "blob prefix already absent on delete");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_blob_prefix_delete() {
        let store = MemoryBlobStore::new();
        store.put("ws1/doc1/a.txt", b"a").await.unwrap();
        store.put("ws1/doc2/b.txt", b"b").await.unwrap();
        store.put("ws2/doc1/c.txt", b"c").await.unwrap();

        store.delete_prefix("ws1/").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.keys_with_prefix("ws2/").len(), 1);
    }

    #[tokio::test]
    async fn vector_counts_replace_and_append() {
        let store = MemoryWorkspaceStore::new();
        store
            .set_document_vectors("ws", "doc", 3, true)
            .await
            .unwrap();
        store
            .set_document_vectors("ws", "doc", 2, false)
            .await
            .unwrap();
        assert_eq!(store.document_vectors("ws", "doc"), 5);

        store
            .set_document_vectors("ws", "doc", 7, true)
            .await
            .unwrap();
        assert_eq!(store.document_vectors("ws", "doc"), 7);
    }

    #[tokio::test]
    async fn fs_blob_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        store.put("ws/doc/chunk.txt", b"hello").await.unwrap();
        assert!(dir.path().join("ws/doc/chunk.txt").exists());

        store.delete_prefix("ws/doc").await.unwrap();
        assert!(!dir.path().join("ws/doc").exists());

        // Deleting an absent prefix is a no-op.
        store.delete_prefix("ws/doc").await.unwrap();
    }
}
