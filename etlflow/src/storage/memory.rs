//! In-memory blob store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{BlobRef, BlobStore};
use crate::errors::StorageError;

/// A blob store backed by a concurrent map.
///
/// Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBlobStore {
    blobs: Arc<DashMap<BlobRef, Arc<Vec<u8>>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a blob without counting it as a write.
    pub fn insert(&self, blob: BlobRef, content: impl Into<Vec<u8>>) {
        self.blobs.insert(blob, Arc::new(content.into()));
    }

    /// Returns a copy of a blob's content.
    #[must_use]
    pub fn get(&self, blob: &BlobRef) -> Option<Vec<u8>> {
        self.blobs.get(blob).map(|entry| entry.value().as_ref().clone())
    }

    /// Returns the number of writes performed through [`BlobStore::write`].
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns the number of blobs in a container.
    #[must_use]
    pub fn count_in(&self, container: &str) -> usize {
        self.blobs
            .iter()
            .filter(|entry| entry.key().container() == container)
            .count()
    }

    /// Returns the total number of blobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, StorageError> {
        self.get(blob)
            .ok_or_else(|| StorageError::not_found(blob.container(), blob.name()))
    }

    async fn write(&self, blob: &BlobRef, content: &[u8]) -> Result<(), StorageError> {
        self.blobs.insert(blob.clone(), Arc::new(content.to_vec()));
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool, StorageError> {
        Ok(self.blobs.contains_key(blob))
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobRef>, StorageError> {
        let mut found: Vec<BlobRef> = self
            .blobs
            .iter()
            .filter(|entry| {
                entry.key().container() == container && entry.key().name().starts_with(prefix)
            })
            .map(|entry| entry.key().clone())
            .collect();
        found.sort();
        Ok(found)
    }
}
