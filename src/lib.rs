//! # BioIndex
//!
//! A secondary-index layer over a corpus of sorted, newline-delimited
//! JSON records stored as objects in an S3-compatible blob store. Each
//! index names a key schema (zero or more equality keys plus an optional
//! genomic locus) and a path prefix; the engine builds a compact
//! relational index mapping (keys, locus range) → (object, byte range)
//! and answers queries by issuing ranged reads and streaming matching
//! records back in bounded, resumable pages.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │ build                                                          │
//! │  catalog row ─► list shards ─► scan lines ─► collapse runs ─►  │
//! │  index rows (key cols, chrom, start, end, path, offsets)       │
//! ├────────────────────────────────────────────────────────────────┤
//! │ query                                                          │
//! │  parse q ─► select rows ─► coalesce slices ─► ranged reads ─►  │
//! │  re-verify keys + locus ─► page (byte budget) ─► continuation  │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The relational database (MySQL in production, SQLite in tests) holds
//! the catalog and one row table per index; the blob store holds the
//! NDJSON shards, or their BGZF `.gz` + `.gzi` siblings when an index is
//! compressed. Records within a response are emitted strictly in
//! `(key tuple, chromosome, start, object, offset)` order, and following
//! a chain of continuation tokens yields every matching record exactly
//! once.
//!
//! ## Example
//!
//! ```rust,ignore
//! let config = Config::new("my-bucket", "mysql://user:pw@host/bio");
//! let catalog = Catalog::connect(&config.database_url).await?;
//! let client: Arc<dyn BlobClient> = Arc::new(AwsBlobClient::new(&config.s3_bucket).await);
//!
//! // declare and build an index over sorted shards
//! catalog.put(&IndexSpec::new("associations", "out/assoc/", "phenotype,chromosome:position")?).await?;
//! build_index(&catalog, client.clone(), &config, "associations").await?;
//!
//! // stream records for a phenotype in a region
//! let spec = catalog.get("associations").await?;
//! let plan = plan_query(catalog.pool(), &spec, &q, None, 0).await?;
//! let store = RecordStore::new(client, spec.compressed);
//! let page = fetch_page(&store, QueryCursor::new("associations", plan), config.response_limit).await?;
//! ```

pub mod build;
pub mod catalog;
pub mod config;
pub mod continuation;
pub mod error;
pub mod genes;
pub mod http;
pub mod locus;
pub mod query;
pub mod schema;
pub mod stats;
pub mod store;

pub use build::{build_index, BuildSummary, ObjectOutcome};
pub use catalog::{Catalog, IndexSpec};
pub use config::Config;
pub use continuation::{ContinuationState, Continuations};
pub use error::{BioIndexError, Result};
pub use genes::GffGeneResolver;
pub use locus::{GeneResolver, Locus, Region};
pub use query::{fetch_page, plan_all, plan_query, Page, QueryCursor, QueryPlan};
pub use schema::Schema;
pub use store::{BlobClient, RecordStore};

#[cfg(test)]
mod integration_tests;
