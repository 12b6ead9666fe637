//! Local-filesystem blob store.
//!
//! Containers are directories under a root; blob names map to relative paths.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{validate_container, BlobRef, BlobStore};
use crate::errors::StorageError;

/// A blob store rooted at a directory.
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    /// Creates a store rooted at `root`. The directory is created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, blob: &BlobRef) -> Result<PathBuf, StorageError> {
        let relative = Path::new(blob.name());
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if escapes {
            return Err(StorageError::InvalidName(format!(
                "'{}' is not a plain relative name",
                blob.name()
            )));
        }
        Ok(self.root.join(blob.container()).join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(blob)?;
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(StorageError::not_found(blob.container(), blob.name()))
            }
            Err(e) => Err(StorageError::io(format!("reading {blob}"), e)),
        }
    }

    async fn write(&self, blob: &BlobRef, content: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(blob)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(format!("creating directory for {blob}"), e))?;
        }

        // Write beside the target, then rename over it.
        let staging = path.with_extension(format!("{}.partial", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&staging, content)
            .await
            .map_err(|e| StorageError::io(format!("writing {blob}"), e))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| StorageError::io(format!("committing {blob}"), e))?;

        debug!(blob = %blob, bytes = content.len(), "Wrote blob");
        Ok(())
    }

    async fn exists(&self, blob: &BlobRef) -> Result<bool, StorageError> {
        let path = self.path_for(blob)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::io(format!("checking {blob}"), e)),
        }
    }

    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobRef>, StorageError> {
        validate_container(container)?;
        let base = self.root.join(container);

        let mut found = Vec::new();
        let mut pending = vec![base.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::io(format!("listing {}", dir.display()), e));
                }
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::io(format!("listing {}", dir.display()), e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| StorageError::io(format!("inspecting {}", path.display()), e))?;

                if file_type.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&base) else {
                    continue;
                };
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");

                if name.ends_with(".partial") || !name.starts_with(prefix) {
                    continue;
                }
                found.push(BlobRef::new(container, name)?);
            }
        }

        found.sort();
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_with_nested_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let blob = BlobRef::parse("processed/olist/orders.parquet").unwrap();

        assert!(!store.exists(&blob).await.unwrap());
        store.write(&blob, b"v1").await.unwrap();
        store.write(&blob, b"v2").await.unwrap();

        assert!(store.exists(&blob).await.unwrap());
        assert_eq!(store.read(&blob).await.unwrap(), b"v2");
        assert!(dir.path().join("processed/olist/orders.parquet").is_file());
    }

    #[tokio::test]
    async fn test_missing_blob_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let blob = BlobRef::parse("datasets/none.csv").unwrap();

        let err = store.read(&blob).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_walks_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        for path in [
            "processed/olist/a.csv",
            "processed/olist/nested/b.csv",
            "processed/other.csv",
        ] {
            store
                .write(&BlobRef::parse(path).unwrap(), b"x")
                .await
                .unwrap();
        }

        let listed = store.list("processed", "olist/").await.unwrap();
        let names: Vec<_> = listed.iter().map(BlobRef::name).collect();
        assert_eq!(names, vec!["olist/a.csv", "olist/nested/b.csv"]);

        assert!(store.list("empty-container", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_parent_components_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path());
        let blob = BlobRef::new("datasets", "../escape.csv").unwrap();

        let err = store.write(&blob, b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidName(_)));
    }
}
