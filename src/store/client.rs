//! Blob client trait for abstracting store operations.
//!
//! This module defines the [`BlobClient`] trait which abstracts the
//! S3-compatible blob store for testability and flexibility in choosing
//! client implementations.

use async_trait::async_trait;
use bytes::Bytes;
use std::ops::Range;

use crate::error::{BioIndexError, Result};

/// An object listing entry: key and size in bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key (path within the bucket).
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

/// Abstraction over blob store operations.
///
/// This trait allows for different client implementations:
/// - Production: [`crate::store::aws::AwsBlobClient`]
/// - Testing: the in-memory mock client
///
/// Implementations hold their own bucket; keys are paths within it.
/// Writing records is a non-goal, so the trait is read-only.
#[async_trait]
pub trait BlobClient: Send + Sync {
    /// Read a byte range from an object.
    ///
    /// # Arguments
    ///
    /// * `key` - Object key (path within bucket)
    /// * `range` - Byte range to read (start inclusive, end exclusive)
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist, the range is
    /// invalid, or the read fails. Transient-failure retries are the
    /// caller's concern (see [`crate::store::RecordStore`]).
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes>;

    /// Check if an object exists and get its size.
    ///
    /// # Returns
    ///
    /// - `Some(size)` if the object exists
    /// - `None` if the object doesn't exist
    async fn head_object(&self, key: &str) -> Result<Option<u64>>;

    /// List all objects under a key prefix, recursively, sorted by key.
    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>>;

    /// Get the full content of an object.
    ///
    /// For large objects, prefer `get_range` to fetch only needed parts.
    async fn get_object(&self, key: &str) -> Result<Bytes> {
        // default implementation: get size then fetch full range
        match self.head_object(key).await? {
            Some(size) => self.get_range(key, 0..size).await,
            None => Err(BioIndexError::blob_read(key, "object not found")),
        }
    }
}
