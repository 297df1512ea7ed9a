//! Blob store access.
//!
//! The [`BlobClient`] trait abstracts the S3-compatible store; the
//! [`RecordStore`] layers ranged NDJSON streaming, retries, and
//! transparent BGZF decompression on top of it.

pub(crate) mod bgzf;
mod client;
mod reader;

pub mod aws;

pub use bgzf::GziIndex;
pub use client::{BlobClient, ObjectInfo};
pub use reader::{Line, LineReader, RecordStore};

#[cfg(test)]
pub(crate) mod mock;
