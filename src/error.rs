//! Error types for index and query operations.
//!
//! Every error kind carries a short human message and a stable machine
//! code (see [`BioIndexError::code`]) so front-ends can map errors to
//! exit codes or HTTP statuses without string matching.

use std::fmt;

/// Result type for bioindex operations.
pub type Result<T> = std::result::Result<T, BioIndexError>;

/// Errors that can occur while building or querying an index.
#[derive(Debug)]
pub enum BioIndexError {
    /// The schema string could not be parsed.
    MalformedSchema {
        /// Description of what is wrong with the schema.
        message: String,
    },

    /// No index with the given name exists in the catalog.
    UnknownIndex {
        /// The index name that was looked up.
        name: String,
    },

    /// The index exists but has not been (completely) built.
    IndexNotBuilt {
        /// The index name.
        name: String,
    },

    /// A locus or region string is syntactically invalid.
    InvalidLocus {
        /// Description of the parse failure.
        message: String,
    },

    /// A token was not a region and could not be resolved as a gene name.
    UnknownLocus {
        /// The unresolvable token.
        name: String,
    },

    /// A record is missing a field required by the index schema.
    MissingKey {
        /// The missing field name.
        field: String,
    },

    /// The number of query values does not match the schema.
    ArityMismatch {
        /// The schema string the query was validated against.
        schema: String,
        /// Number of values the schema expects.
        expected: usize,
        /// Number of values provided.
        actual: usize,
    },

    /// A blob store read failed after retries.
    BlobRead {
        /// The object key being read.
        key: String,
        /// The underlying error message.
        message: String,
    },

    /// An NDJSON shard contained a line that is not valid JSON, or a
    /// compressed shard could not be decoded.
    CorruptShard {
        /// The object key.
        key: String,
        /// 1-based line number within the read range, 0 if unknown.
        line: u64,
        /// Description of the corruption.
        message: String,
    },

    /// One or more objects failed while building an index.
    BuildFailed {
        /// Summary of the failure.
        message: String,
    },

    /// A database operation failed.
    Db(sqlx::Error),

    /// A continuation token existed but passed its idle timeout.
    ExpiredToken,

    /// A continuation token was never issued by this process.
    InvalidToken,

    /// The configuration is incomplete or inconsistent.
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl BioIndexError {
    /// Stable machine code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            BioIndexError::MalformedSchema { .. } => "malformed-schema",
            BioIndexError::UnknownIndex { .. } => "unknown-index",
            BioIndexError::IndexNotBuilt { .. } => "index-not-built",
            BioIndexError::InvalidLocus { .. } => "invalid-locus",
            BioIndexError::UnknownLocus { .. } => "unknown-locus",
            BioIndexError::MissingKey { .. } => "missing-key",
            BioIndexError::ArityMismatch { .. } => "arity-mismatch",
            BioIndexError::BlobRead { .. } => "blob-read-error",
            BioIndexError::CorruptShard { .. } => "corrupt-shard",
            BioIndexError::BuildFailed { .. } => "build-failed",
            BioIndexError::Db(_) => "db-error",
            BioIndexError::ExpiredToken => "expired-token",
            BioIndexError::InvalidToken => "invalid-token",
            BioIndexError::InvalidConfig { .. } => "invalid-config",
        }
    }

    /// Create a malformed schema error.
    pub fn malformed_schema(message: impl Into<String>) -> Self {
        BioIndexError::MalformedSchema {
            message: message.into(),
        }
    }

    /// Create an invalid locus error.
    pub fn invalid_locus(message: impl Into<String>) -> Self {
        BioIndexError::InvalidLocus {
            message: message.into(),
        }
    }

    /// Create a missing key error.
    pub fn missing_key(field: impl Into<String>) -> Self {
        BioIndexError::MissingKey {
            field: field.into(),
        }
    }

    /// Create a blob read error.
    pub fn blob_read(key: impl Into<String>, message: impl Into<String>) -> Self {
        BioIndexError::BlobRead {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a corrupt shard error.
    pub fn corrupt_shard(key: impl Into<String>, line: u64, message: impl Into<String>) -> Self {
        BioIndexError::CorruptShard {
            key: key.into(),
            line,
            message: message.into(),
        }
    }

    /// Create an invalid config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        BioIndexError::InvalidConfig {
            message: message.into(),
        }
    }
}

impl fmt::Display for BioIndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BioIndexError::MalformedSchema { message } => {
                write!(f, "malformed schema: {}", message)
            }
            BioIndexError::UnknownIndex { name } => {
                write!(f, "no such index: {}", name)
            }
            BioIndexError::IndexNotBuilt { name } => {
                write!(f, "index '{}' is not built", name)
            }
            BioIndexError::InvalidLocus { message } => {
                write!(f, "invalid locus: {}", message)
            }
            BioIndexError::UnknownLocus { name } => {
                write!(f, "not a locus or known gene: {}", name)
            }
            BioIndexError::MissingKey { field } => {
                write!(f, "record is missing key field '{}'", field)
            }
            BioIndexError::ArityMismatch {
                schema,
                expected,
                actual,
            } => {
                write!(
                    f,
                    "expected {} query value(s) for schema \"{}\", got {}",
                    expected, schema, actual
                )
            }
            BioIndexError::BlobRead { key, message } => {
                write!(f, "failed to read '{}': {}", key, message)
            }
            BioIndexError::CorruptShard { key, line, message } => {
                write!(f, "corrupt shard '{}' (line {}): {}", key, line, message)
            }
            BioIndexError::BuildFailed { message } => {
                write!(f, "build failed: {}", message)
            }
            BioIndexError::Db(e) => {
                write!(f, "database error: {}", e)
            }
            BioIndexError::ExpiredToken => {
                write!(f, "continuation token has expired")
            }
            BioIndexError::InvalidToken => {
                write!(f, "invalid continuation token")
            }
            BioIndexError::InvalidConfig { message } => {
                write!(f, "invalid configuration: {}", message)
            }
        }
    }
}

impl std::error::Error for BioIndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BioIndexError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for BioIndexError {
    fn from(e: sqlx::Error) -> Self {
        BioIndexError::Db(e)
    }
}
