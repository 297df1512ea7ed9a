//! Scoped configuration for the index engine.
//!
//! All tunables live in a single [`Config`] value that the CLI or server
//! materializes once at startup and passes to the catalog, record store,
//! and planner constructors. Nothing in the engine reads the process
//! environment directly; [`Config::from_env`] is the one place that does.

use serde::{Deserialize, Serialize};

use crate::error::{BioIndexError, Result};

/// Default maximum bytes read from the blob store per response page (2 MiB).
pub const DEFAULT_RESPONSE_LIMIT: u64 = 2 * 1024 * 1024;

/// Default maximum number of keys returned by a match query.
pub const DEFAULT_MATCH_LIMIT: u32 = 100;

/// Default number of records sampled when estimating a count.
pub const DEFAULT_SAMPLE_LIMIT: u32 = 500;

/// Default number of objects indexed in parallel during a build.
pub const DEFAULT_WORKERS: usize = 8;

/// Default idle lifetime of a continuation token (30 minutes).
pub const DEFAULT_CONTINUATION_TTL_SECS: u64 = 30 * 60;

/// Engine configuration.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::new("my-bucket", "mysql://user:pw@rds-host/bio")
///     .with_response_limit(512 * 1024)
///     .with_workers(4);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// S3 bucket holding the NDJSON shards.
    pub s3_bucket: String,

    /// Database URL for the catalog and index tables
    /// (`mysql://…` in production, `sqlite:…` in tests).
    pub database_url: String,

    /// Database schema the bio indexes live in.
    pub bio_schema: String,

    /// Maximum bytes read from the blob store per response page.
    pub response_limit: u64,

    /// Maximum number of keys returned by a match query.
    pub match_limit: u32,

    /// Number of records sampled when estimating a count.
    pub sample_limit: u32,

    /// Maximum byte gap between adjacent slices that still get merged
    /// into a single ranged read.
    pub stitch_gap: u64,

    /// Number of objects indexed in parallel during a build.
    pub workers: usize,

    /// Idle lifetime of a continuation token, in seconds.
    pub continuation_ttl_secs: u64,

    /// Location of the GFF file used for gene-name resolution.
    ///
    /// A local path, or an object key within `s3_bucket`.
    pub genes_uri: Option<String>,

    /// Output path for the generated GraphQL schema skeleton.
    pub graphql_schema: Option<String>,
}

impl Config {
    /// Create a configuration with defaults for everything but the two
    /// required settings.
    pub fn new(s3_bucket: impl Into<String>, database_url: impl Into<String>) -> Self {
        Self {
            s3_bucket: s3_bucket.into(),
            database_url: database_url.into(),
            bio_schema: "bio".to_string(),
            response_limit: DEFAULT_RESPONSE_LIMIT,
            match_limit: DEFAULT_MATCH_LIMIT,
            sample_limit: DEFAULT_SAMPLE_LIMIT,
            stitch_gap: 0,
            workers: DEFAULT_WORKERS,
            continuation_ttl_secs: DEFAULT_CONTINUATION_TTL_SECS,
            genes_uri: None,
            graphql_schema: None,
        }
    }

    /// Set the per-page response limit.
    pub fn with_response_limit(mut self, bytes: u64) -> Self {
        self.response_limit = bytes;
        self
    }

    /// Set the match limit.
    pub fn with_match_limit(mut self, limit: u32) -> Self {
        self.match_limit = limit;
        self
    }

    /// Set the count sample size.
    pub fn with_sample_limit(mut self, limit: u32) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Set the build worker count.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the slice stitch gap.
    pub fn with_stitch_gap(mut self, gap: u64) -> Self {
        self.stitch_gap = gap;
        self
    }

    /// Set the continuation idle timeout.
    pub fn with_continuation_ttl_secs(mut self, secs: u64) -> Self {
        self.continuation_ttl_secs = secs;
        self
    }

    /// Set the gene file location.
    pub fn with_genes_uri(mut self, uri: impl Into<String>) -> Self {
        self.genes_uri = Some(uri.into());
        self
    }

    /// Build a configuration from `BIOINDEX_*` environment variables.
    ///
    /// Recognized keys: `BIOINDEX_S3_BUCKET` (required),
    /// `BIOINDEX_DATABASE_URL` or `BIOINDEX_RDS_INSTANCE` +
    /// `BIOINDEX_RDS_USERNAME` + `BIOINDEX_RDS_PASSWORD` (required),
    /// `BIOINDEX_BIO_SCHEMA`, `BIOINDEX_RESPONSE_LIMIT`,
    /// `BIOINDEX_MATCH_LIMIT`, `BIOINDEX_WORKERS`, `BIOINDEX_GENES_URI`,
    /// `BIOINDEX_GRAPHQL_SCHEMA`.
    pub fn from_env() -> Result<Self> {
        let s3_bucket = std::env::var("BIOINDEX_S3_BUCKET")
            .map_err(|_| BioIndexError::invalid_config("BIOINDEX_S3_BUCKET is not set"))?;

        let bio_schema =
            std::env::var("BIOINDEX_BIO_SCHEMA").unwrap_or_else(|_| "bio".to_string());

        // prefer an explicit URL, otherwise assemble one from RDS settings
        let database_url = match std::env::var("BIOINDEX_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => {
                let instance = std::env::var("BIOINDEX_RDS_INSTANCE").map_err(|_| {
                    BioIndexError::invalid_config(
                        "neither BIOINDEX_DATABASE_URL nor BIOINDEX_RDS_INSTANCE is set",
                    )
                })?;
                let username = std::env::var("BIOINDEX_RDS_USERNAME").map_err(|_| {
                    BioIndexError::invalid_config("BIOINDEX_RDS_USERNAME is not set")
                })?;
                let password = std::env::var("BIOINDEX_RDS_PASSWORD").map_err(|_| {
                    BioIndexError::invalid_config("BIOINDEX_RDS_PASSWORD is not set")
                })?;
                format!(
                    "mysql://{}:{}@{}/{}",
                    username, password, instance, bio_schema
                )
            }
        };

        let mut config = Config::new(s3_bucket, database_url);
        config.bio_schema = bio_schema;

        if let Some(limit) = env_parse::<u64>("BIOINDEX_RESPONSE_LIMIT")? {
            config.response_limit = limit;
        }
        if let Some(limit) = env_parse::<u32>("BIOINDEX_MATCH_LIMIT")? {
            config.match_limit = limit;
        }
        if let Some(workers) = env_parse::<usize>("BIOINDEX_WORKERS")? {
            config.workers = workers.max(1);
        }
        if let Ok(uri) = std::env::var("BIOINDEX_GENES_URI") {
            config.genes_uri = Some(uri);
        }
        if let Ok(path) = std::env::var("BIOINDEX_GRAPHQL_SCHEMA") {
            config.graphql_schema = Some(path);
        }

        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().map(Some).map_err(|_| {
            BioIndexError::invalid_config(format!("{} is not a valid number: {}", key, val))
        }),
        Err(_) => Ok(None),
    }
}
