//! Blob storage abstraction.
//!
//! This module provides:
//! - The [`BlobStore`] trait the stages consume
//! - [`BlobRef`], a validated `(container, name)` pair
//! - An in-memory store and a local-filesystem store

mod local;
mod memory;

use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::StorageError;

pub use local::LocalBlobStore;
pub use memory::InMemoryBlobStore;

// Lowercase letters, digits and single hyphens, 3-63 characters. The pattern
// is a literal; `test_container_rules` forces it.
static CONTAINER_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").expect("container name pattern is valid")
});

/// A reference to one blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobRef {
    container: String,
    name: String,
}

impl BlobRef {
    /// Creates a validated reference.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] for a malformed container name or
    /// an empty blob name.
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Result<Self, StorageError> {
        let container = container.into();
        let name = name.into();

        validate_container(&container)?;
        if name.is_empty() {
            return Err(StorageError::InvalidName(format!(
                "empty blob name in container '{container}'"
            )));
        }

        Ok(Self { container, name })
    }

    /// Parses `"<container>/<name>"`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] when there is no `/` or either
    /// part is invalid.
    pub fn parse(path: &str) -> Result<Self, StorageError> {
        let (container, name) = path
            .split_once('/')
            .ok_or_else(|| StorageError::InvalidName(format!("'{path}' has no container part")))?;
        Self::new(container, name)
    }

    /// Returns the container.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Returns the blob name within the container.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the last path segment of the name.
    #[must_use]
    pub fn leaf(&self) -> &str {
        leaf_name(&self.name)
    }

    /// Returns the same blob name in another container.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] if `container` is invalid.
    pub fn in_container(&self, container: &str) -> Result<Self, StorageError> {
        Self::new(container, self.name.clone())
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}

/// Returns the segment after the last `/`.
#[must_use]
pub fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Checks a container name against the storage naming rules.
///
/// # Errors
///
/// Returns [`StorageError::InvalidName`] when the name is rejected.
pub fn validate_container(container: &str) -> Result<(), StorageError> {
    if CONTAINER_NAME.is_match(container) && !container.contains("--") {
        Ok(())
    } else {
        Err(StorageError::InvalidName(format!(
            "'{container}' is not a valid container name"
        )))
    }
}

/// Key-value blob storage organized into containers.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Reads a blob.
    ///
    /// Returns [`StorageError::NotFound`] when it does not exist.
    async fn read(&self, blob: &BlobRef) -> Result<Vec<u8>, StorageError>;

    /// Writes a blob, overwriting any existing content.
    async fn write(&self, blob: &BlobRef, content: &[u8]) -> Result<(), StorageError>;

    /// Returns true if the blob exists.
    async fn exists(&self, blob: &BlobRef) -> Result<bool, StorageError>;

    /// Lists blobs in a container whose names start with `prefix`, sorted by name.
    async fn list(&self, container: &str, prefix: &str) -> Result<Vec<BlobRef>, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_leaf() {
        let blob = BlobRef::parse("raw-data/olist/orders.csv").unwrap();
        assert_eq!(blob.container(), "raw-data");
        assert_eq!(blob.name(), "olist/orders.csv");
        assert_eq!(blob.leaf(), "orders.csv");
        assert_eq!(blob.to_string(), "raw-data/olist/orders.csv");
    }

    #[test]
    fn test_container_rules() {
        assert!(validate_container("mock-raw-container").is_ok());
        assert!(validate_container("Raw").is_err());
        assert!(validate_container("ab").is_err());
        assert!(validate_container("a--b").is_err());
        assert!(validate_container("-abc").is_err());
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert!(BlobRef::parse("orders.csv").is_err());
        assert!(BlobRef::parse("datasets/").is_err());
    }

    #[test]
    fn test_leaf_name_of_trailing_slash_is_empty() {
        assert_eq!(leaf_name("folder/"), "");
        assert_eq!(leaf_name("plain.csv"), "plain.csv");
    }
}
