//! BGZF (blocked gzip) support.
//!
//! Compressed shards are BGZF files: a sequence of independent gzip
//! members, each holding at most 64 KiB of uncompressed data, terminated
//! by an empty EOF member. A sibling `.gzi` file maps block boundaries as
//! `(compressed offset, uncompressed offset)` pairs, which lets the store
//! translate an uncompressed byte range into a compressed one, fetch only
//! the covering blocks, and inflate them.

use std::io::Read;
use std::ops::Range;

use bytes::Buf;
use flate2::read::MultiGzDecoder;

use crate::error::{BioIndexError, Result};

/// A parsed `.gzi` offset index.
///
/// Entry 0 is always the implicit `(0, 0)` for the first block; the file
/// itself stores one pair per subsequent block.
#[derive(Clone, Debug)]
pub struct GziIndex {
    /// `(compressed offset, uncompressed offset)` of each block start.
    entries: Vec<(u64, u64)>,
}

impl GziIndex {
    /// Parse the binary `.gzi` format: a little-endian u64 entry count
    /// followed by that many `(compressed, uncompressed)` u64 pairs.
    pub fn parse(key: &str, data: &[u8]) -> Result<GziIndex> {
        let mut buf = data;

        if buf.len() < 8 {
            return Err(BioIndexError::corrupt_shard(key, 0, "truncated .gzi index"));
        }
        let count = buf.get_u64_le() as usize;

        if buf.len() < count * 16 {
            return Err(BioIndexError::corrupt_shard(key, 0, "truncated .gzi index"));
        }

        let mut entries = Vec::with_capacity(count + 1);
        entries.push((0, 0));
        for _ in 0..count {
            let compressed = buf.get_u64_le();
            let uncompressed = buf.get_u64_le();
            entries.push((compressed, uncompressed));
        }

        Ok(GziIndex { entries })
    }

    /// Number of known block starts.
    pub fn num_blocks(&self) -> usize {
        self.entries.len()
    }

    /// Index of the block containing the uncompressed offset.
    fn block_for(&self, offset: u64) -> usize {
        self.entries.partition_point(|e| e.1 <= offset).max(1) - 1
    }

    /// Translate an uncompressed byte range into the compressed span
    /// covering it.
    ///
    /// # Arguments
    ///
    /// * `range` - Uncompressed half-open byte range
    /// * `compressed_size` - Total size of the `.gz` object, bounding the
    ///   final block
    ///
    /// # Returns
    ///
    /// The compressed range to fetch and the uncompressed offset the
    /// fetched data starts at.
    pub fn compressed_span(&self, range: &Range<u64>, compressed_size: u64) -> (Range<u64>, u64) {
        let first = self.block_for(range.start);
        let last = self.block_for(range.end.saturating_sub(1).max(range.start));

        let start = self.entries[first].0;
        let end = match self.entries.get(last + 1) {
            Some(entry) => entry.0,
            None => compressed_size,
        };

        (start..end, self.entries[first].1)
    }

    /// Uncompressed offset of the last known block start.
    pub fn last_block(&self) -> (u64, u64) {
        *self.entries.last().unwrap_or(&(0, 0))
    }
}

/// Inflate a run of complete BGZF blocks.
pub(crate) fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len() * 4);
    MultiGzDecoder::new(data).read_to_end(&mut out)?;
    Ok(out)
}
