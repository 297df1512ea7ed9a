//! Ranged NDJSON streaming.
//!
//! The [`RecordStore`] reads half-open byte ranges of NDJSON shards.
//! Large ranges are split into parts fetched with bounded concurrency and
//! stitched in order; transient failures are retried with exponential
//! backoff. When the index is compressed, ranges are uncompressed offsets
//! into a BGZF `.gz` object with a sibling `.gzi` index, and the store
//! decompresses the covering blocks on demand; callers never need to know.

use std::num::NonZeroUsize;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use lru::LruCache;
use tracing::warn;

use super::bgzf::{self, GziIndex};
use super::client::BlobClient;
use crate::error::{BioIndexError, Result};

/// Size of a single ranged GET issued against the blob store.
const PART_SIZE: u64 = 512 * 1024;

/// Maximum ranged GETs in flight for one read.
const MAX_PARALLEL_PARTS: usize = 4;

/// Bytes buffered ahead of the line scanner.
const FETCH_SIZE: u64 = 1024 * 1024;

/// Retries after the first failed read.
const MAX_RETRIES: u32 = 3;

/// Loaded `.gzi` indexes kept per store.
const GZI_CACHE_SIZE: usize = 64;

/// Ranged reader over the NDJSON shards of one index.
pub struct RecordStore {
    client: Arc<dyn BlobClient>,
    compressed: bool,
    part_size: u64,
    fetch_size: u64,
    max_retries: u32,
    gzi_cache: Mutex<LruCache<String, Arc<GziIndex>>>,
}

impl RecordStore {
    /// Create a store for an index's shards.
    ///
    /// # Arguments
    ///
    /// * `client` - Blob store client
    /// * `compressed` - Whether the index's shards are BGZF-compressed
    pub fn new(client: Arc<dyn BlobClient>, compressed: bool) -> Self {
        Self {
            client,
            compressed,
            part_size: PART_SIZE,
            fetch_size: FETCH_SIZE,
            max_retries: MAX_RETRIES,
            gzi_cache: Mutex::new(LruCache::new(NonZeroUsize::new(GZI_CACHE_SIZE).unwrap())),
        }
    }

    /// Shrink fetch sizes so tests exercise chunk and part boundaries.
    #[cfg(test)]
    pub(crate) fn with_sizes(mut self, part_size: u64, fetch_size: u64) -> Self {
        self.part_size = part_size.max(1);
        self.fetch_size = fetch_size.max(1);
        self
    }

    /// The underlying blob client.
    pub fn client(&self) -> &Arc<dyn BlobClient> {
        &self.client
    }

    /// True if reads go through BGZF decompression.
    pub fn compressed(&self) -> bool {
        self.compressed
    }

    /// Read an uncompressed byte range of a logical object.
    ///
    /// The range end is clamped to the object's data; the caller sees
    /// exactly the bytes a plain read of the uncompressed shard would
    /// yield.
    pub async fn read_range(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        if range.start >= range.end {
            return Ok(Bytes::new());
        }

        if !self.compressed {
            return self.read_parts(key, range).await;
        }

        let gz = gz_key(key);
        let gzi = self.gzi(key).await?;
        let compressed_size = self
            .client
            .head_object(&gz)
            .await?
            .ok_or_else(|| BioIndexError::blob_read(&gz, "object not found"))?;

        let (span, base) = gzi.compressed_span(&range, compressed_size);
        let compressed = self.read_parts(&gz, span).await?;
        let inflated = bgzf::inflate(&compressed)
            .map_err(|e| BioIndexError::corrupt_shard(key, 0, format!("bgzf: {}", e)))?;

        let start = (range.start - base) as usize;
        let end = ((range.end - base) as usize).min(inflated.len());
        if start >= inflated.len() {
            // requests past the end of the data read as empty
            return Ok(Bytes::new());
        }

        Ok(Bytes::copy_from_slice(&inflated[start..end]))
    }

    /// Logical (uncompressed) size of an object.
    pub async fn object_size(&self, key: &str) -> Result<u64> {
        if !self.compressed {
            return self
                .client
                .head_object(key)
                .await?
                .ok_or_else(|| BioIndexError::blob_read(key, "object not found"));
        }

        // size = last block start + the inflated size of the tail
        let gz = gz_key(key);
        let gzi = self.gzi(key).await?;
        let compressed_size = self
            .client
            .head_object(&gz)
            .await?
            .ok_or_else(|| BioIndexError::blob_read(&gz, "object not found"))?;

        let (block_start, uncompressed_start) = gzi.last_block();
        let tail = self.read_parts(&gz, block_start..compressed_size).await?;
        let inflated = bgzf::inflate(&tail)
            .map_err(|e| BioIndexError::corrupt_shard(key, 0, format!("bgzf: {}", e)))?;

        Ok(uncompressed_start + inflated.len() as u64)
    }

    /// Stream the complete lines of an uncompressed byte range.
    pub fn line_reader(&self, key: &str, range: Range<u64>) -> LineReader<'_> {
        LineReader {
            store: self,
            key: key.to_string(),
            pos: range.start,
            end: range.end,
            buf: Vec::new(),
            buf_start: range.start,
            scan: 0,
        }
    }

    /// Fetch a raw range in parts, stitching the results in order.
    async fn read_parts(&self, key: &str, range: Range<u64>) -> Result<Bytes> {
        let len = range.end.saturating_sub(range.start);
        if len == 0 {
            return Ok(Bytes::new());
        }
        if len <= self.part_size {
            return fetch_with_retry(
                self.client.clone(),
                key.to_string(),
                range,
                self.max_retries,
            )
            .await;
        }

        let mut parts = Vec::new();
        let mut start = range.start;
        while start < range.end {
            let end = (start + self.part_size).min(range.end);
            parts.push(start..end);
            start = end;
        }

        let mut out = BytesMut::with_capacity(len as usize);
        for group in parts.chunks(MAX_PARALLEL_PARTS) {
            let handles: Vec<_> = group
                .iter()
                .map(|part| {
                    tokio::spawn(fetch_with_retry(
                        self.client.clone(),
                        key.to_string(),
                        part.clone(),
                        self.max_retries,
                    ))
                })
                .collect();

            for handle in handles {
                let part = handle
                    .await
                    .map_err(|e| BioIndexError::blob_read(key, format!("read task: {}", e)))??;
                out.extend_from_slice(&part);
            }
        }

        Ok(out.freeze())
    }

    /// Load (or reuse) the `.gzi` offset index for an object.
    async fn gzi(&self, key: &str) -> Result<Arc<GziIndex>> {
        {
            let mut cache = self.gzi_cache.lock().unwrap();
            if let Some(index) = cache.get(key) {
                return Ok(index.clone());
            }
        }

        let gzi_key = format!("{}.gzi", gz_key(key));
        let data = self.client.get_object(&gzi_key).await?;
        let index = Arc::new(GziIndex::parse(key, &data)?);

        let mut cache = self.gzi_cache.lock().unwrap();
        cache.put(key.to_string(), index.clone());
        Ok(index)
    }
}

/// Compressed object key for a logical key.
fn gz_key(key: &str) -> String {
    if key.ends_with(".gz") {
        key.to_string()
    } else {
        format!("{}.gz", key)
    }
}

/// One ranged GET with exponential backoff on failure.
async fn fetch_with_retry(
    client: Arc<dyn BlobClient>,
    key: String,
    range: Range<u64>,
    max_retries: u32,
) -> Result<Bytes> {
    let mut attempt = 0;
    loop {
        match client.get_range(&key, range.clone()).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) if attempt < max_retries => {
                let delay = Duration::from_millis(100 << attempt);
                warn!(key = %key, attempt, error = %e, "retrying ranged read");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// One line of an NDJSON range.
#[derive(Clone, Debug)]
pub struct Line {
    /// Byte offset of the start of the line within the object.
    pub offset: u64,
    /// Line content, without the terminator.
    pub bytes: Bytes,
    /// Bytes consumed from the range, including the terminator.
    pub consumed: u64,
}

/// Incremental line scanner over a byte range of one object.
///
/// Because index rows always end on a line boundary (or at end of
/// object), the final unterminated remainder of a range is itself a
/// complete record and is yielded with no terminator byte counted.
pub struct LineReader<'a> {
    store: &'a RecordStore,
    key: String,
    pos: u64,
    end: u64,
    buf: Vec<u8>,
    buf_start: u64,
    scan: usize,
}

impl LineReader<'_> {
    /// The next line, or `None` at the end of the range.
    pub async fn next(&mut self) -> Result<Option<Line>> {
        loop {
            if let Some(newline) = self.buf[self.scan..]
                .iter()
                .position(|&b| b == b'\n')
                .map(|i| i + self.scan)
            {
                let line = Line {
                    offset: self.buf_start,
                    bytes: Bytes::copy_from_slice(&self.buf[..newline]),
                    consumed: newline as u64 + 1,
                };
                self.buf.drain(..newline + 1);
                self.buf_start += newline as u64 + 1;
                self.scan = 0;
                return Ok(Some(line));
            }
            self.scan = self.buf.len();

            if self.pos >= self.end {
                if self.buf.is_empty() {
                    return Ok(None);
                }

                // unterminated remainder at end of range
                let line = Line {
                    offset: self.buf_start,
                    bytes: Bytes::copy_from_slice(&self.buf),
                    consumed: self.buf.len() as u64,
                };
                self.buf_start += self.buf.len() as u64;
                self.buf.clear();
                self.scan = 0;
                return Ok(Some(line));
            }

            let chunk_end = (self.pos + self.store.fetch_size).min(self.end);
            let chunk = self.store.read_range(&self.key, self.pos..chunk_end).await?;
            // a clamped compressed read can come up short of the range end
            if chunk.is_empty() {
                self.pos = self.end;
                continue;
            }
            self.pos += chunk.len() as u64;
            self.buf.extend_from_slice(&chunk);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mock::MockBlobClient;

    fn ndjson(n: usize) -> String {
        (0..n)
            .map(|i| format!("{{\"varId\":\"8:{}:A:T\",\"value\":{}}}\n", i, i))
            .collect()
    }

    #[tokio::test]
    async fn test_lines_across_chunk_boundaries() {
        let client = Arc::new(MockBlobClient::new());
        let data = ndjson(50);
        client.put("t/part-1.json", data.clone());

        // tiny chunks force many fetches and buffer carry-over
        let store = RecordStore::new(client, false).with_sizes(7, 13);
        let mut reader = store.line_reader("t/part-1.json", 0..data.len() as u64);

        let mut offset = 0u64;
        let mut count = 0;
        while let Some(line) = reader.next().await.unwrap() {
            assert_eq!(line.offset, offset);
            assert!(!line.bytes.contains(&b'\n'));
            offset += line.consumed;
            count += 1;
        }
        assert_eq!(count, 50);
        assert_eq!(offset, data.len() as u64);
    }

    #[tokio::test]
    async fn test_unterminated_final_line() {
        let client = Arc::new(MockBlobClient::new());
        client.put("t/p.json", "{\"a\":1}\n{\"a\":2}");

        let store = RecordStore::new(client, false);
        let mut reader = store.line_reader("t/p.json", 0..15);

        let first = reader.next().await.unwrap().unwrap();
        assert_eq!(&first.bytes[..], b"{\"a\":1}");
        assert_eq!(first.consumed, 8);

        let last = reader.next().await.unwrap().unwrap();
        assert_eq!(&last.bytes[..], b"{\"a\":2}");
        assert_eq!(last.consumed, 7); // no terminator

        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_mid_object_range() {
        let client = Arc::new(MockBlobClient::new());
        let data = "{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n";
        client.put("t/p.json", data);

        // range covering only the middle record
        let store = RecordStore::new(client, false);
        let mut reader = store.line_reader("t/p.json", 8..16);

        let line = reader.next().await.unwrap().unwrap();
        assert_eq!(&line.bytes[..], b"{\"a\":2}");
        assert_eq!(line.offset, 8);
        assert!(reader.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_then_fail() {
        let client = Arc::new(MockBlobClient::new());
        client.put("t/p.json", "{\"a\":1}\n");
        client.fail_next_reads(2);

        let store = RecordStore::new(client.clone(), false);
        let data = store.read_range("t/p.json", 0..8).await.unwrap();
        assert_eq!(&data[..], b"{\"a\":1}\n");

        // more failures than retries surfaces the error
        client.fail_next_reads(10);
        assert!(matches!(
            store.read_range("t/p.json", 0..8).await,
            Err(BioIndexError::BlobRead { .. })
        ));
    }

    #[tokio::test]
    async fn test_parallel_parts_stitched_in_order() {
        let client = Arc::new(MockBlobClient::new());
        let data: Vec<u8> = (0..200u8).cycle().take(10_000).collect();
        client.put("t/p.bin", data.clone());

        let store = RecordStore::new(client, false).with_sizes(1000, 10_000);
        let read = store.read_range("t/p.bin", 0..10_000).await.unwrap();
        assert_eq!(&read[..], &data[..]);
    }

    #[tokio::test]
    async fn test_compressed_read_matches_uncompressed() {
        let client = Arc::new(MockBlobClient::new());
        let data = ndjson(100);
        let (gz, gzi) = crate::store::bgzf::writer::compress(data.as_bytes(), 256);
        client.put("t/p.json.gz", gz);
        client.put("t/p.json.gz.gzi", gzi);

        let store = RecordStore::new(client, true);
        assert_eq!(
            store.object_size("t/p.json").await.unwrap(),
            data.len() as u64
        );

        // an arbitrary interior range decompresses to the same bytes
        let read = store.read_range("t/p.json", 100..1100).await.unwrap();
        assert_eq!(&read[..], &data.as_bytes()[100..1100]);

        // whole-object line stream matches too
        let mut reader = store.line_reader("t/p.json", 0..data.len() as u64);
        let mut count = 0;
        while let Some(line) = reader.next().await.unwrap() {
            assert!(!line.bytes.is_empty());
            count += 1;
        }
        assert_eq!(count, 100);
    }
}
