//! In-memory blob client for tests.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use super::client::{BlobClient, ObjectInfo};
use crate::error::{BioIndexError, Result};

/// In-memory mock blob client.
///
/// Stores objects in a `BTreeMap` (so listings come back sorted) and can
/// inject a number of transient read failures to exercise retry paths.
pub(crate) struct MockBlobClient {
    objects: RwLock<BTreeMap<String, Bytes>>,
    fail_reads: AtomicU32,
    reads: AtomicU32,
}

impl MockBlobClient {
    /// Create a new empty mock client.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(BTreeMap::new()),
            fail_reads: AtomicU32::new(0),
            reads: AtomicU32::new(0),
        }
    }

    /// Store an object.
    pub fn put(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().unwrap().insert(key.into(), data.into());
    }

    /// Remove an object.
    pub fn remove(&self, key: &str) {
        self.objects.write().unwrap().remove(key);
    }

    /// Fail the next `n` ranged reads with a transient error.
    pub fn fail_next_reads(&self, n: u32) {
        self.fail_reads.store(n, Ordering::SeqCst);
    }

    /// Number of ranged reads issued so far.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobClient for MockBlobClient {
    async fn get_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        if self
            .fail_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BioIndexError::blob_read(key, "injected transient failure"));
        }

        let objects = self.objects.read().unwrap();
        let data = objects
            .get(key)
            .ok_or_else(|| BioIndexError::blob_read(key, "object not found"))?;

        let start = range.start as usize;
        let end = range.end as usize;
        if start > data.len() || end > data.len() || start > end {
            return Err(BioIndexError::blob_read(
                key,
                format!(
                    "invalid range {}..{} for object of {} bytes",
                    range.start,
                    range.end,
                    data.len()
                ),
            ));
        }

        Ok(data.slice(start..end))
    }

    async fn head_object(&self, key: &str) -> Result<Option<u64>> {
        let objects = self.objects.read().unwrap();
        Ok(objects.get(key).map(|data| data.len() as u64))
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<ObjectInfo>> {
        let objects = self.objects.read().unwrap();
        Ok(objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, data)| ObjectInfo {
                key: key.clone(),
                size: data.len() as u64,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_range() {
        let client = MockBlobClient::new();
        client.put("t/file.json", "hello world");

        let data = client.get_range("t/file.json", 0..5).await.unwrap();
        assert_eq!(&data[..], b"hello");

        let data = client.get_range("t/file.json", 6..11).await.unwrap();
        assert_eq!(&data[..], b"world");

        assert!(client.get_range("t/file.json", 0..100).await.is_err());
        assert!(client.get_range("missing", 0..1).await.is_err());
    }

    #[tokio::test]
    async fn test_head_and_list() {
        let client = MockBlobClient::new();
        client.put("a/one.json", "x");
        client.put("a/two.json", "yy");
        client.put("b/other.json", "z");

        assert_eq!(client.head_object("a/one.json").await.unwrap(), Some(1));
        assert_eq!(client.head_object("a/zzz.json").await.unwrap(), None);

        let listed = client.list_objects("a/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "a/one.json");
        assert_eq!(listed[1].size, 2);
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let client = MockBlobClient::new();
        client.put("k", "data");
        client.fail_next_reads(2);

        assert!(client.get_range("k", 0..4).await.is_err());
        assert!(client.get_range("k", 0..4).await.is_err());
        assert!(client.get_range("k", 0..4).await.is_ok());
        assert_eq!(client.read_count(), 3);
    }
}
