//! In-process continuation tokens.
//!
//! A truncated response mints an opaque token mapping to the query's
//! residual cursor. Tokens are process-local: they live in a mutex-guarded
//! map, expire after an idle timeout, and do not survive restarts. Looking
//! a token up does not consume it, so replaying a token returns the same
//! records again.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::error::{BioIndexError, Result};
use crate::query::QueryCursor;

/// Characters in a continuation token.
const TOKEN_LEN: usize = 24;

/// State carried across a continuation.
#[derive(Clone, Debug)]
pub struct ContinuationState {
    /// Residual cursor to resume from.
    pub cursor: QueryCursor,
    /// Original query values, echoed in responses.
    pub q: Vec<String>,
    /// Requested output format (`row` or `column`).
    pub fmt: String,
}

struct Entry {
    state: ContinuationState,
    expires: Instant,
}

/// Map of live continuation tokens.
pub struct Continuations {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl Continuations {
    /// Create a token map with the given idle timeout.
    pub fn new(ttl: Duration) -> Continuations {
        Continuations {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Mint a token for a cursor.
    pub fn insert(&self, state: ContinuationState) -> String {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LEN)
            .map(char::from)
            .collect();

        let mut entries = self.entries.lock().unwrap();

        // drop anything already expired while we hold the lock
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires > now);

        entries.insert(
            token.clone(),
            Entry {
                state,
                expires: now + self.ttl,
            },
        );
        token
    }

    /// Look up a token's state.
    ///
    /// # Errors
    ///
    /// `ExpiredToken` if the token existed but idled out;
    /// `InvalidToken` if it was never minted by this process.
    pub fn lookup(&self, token: &str) -> Result<ContinuationState> {
        let mut entries = self.entries.lock().unwrap();

        match entries.get(token) {
            Some(entry) if entry.expires > Instant::now() => Ok(entry.state.clone()),
            Some(_) => {
                entries.remove(token);
                Err(BioIndexError::ExpiredToken)
            }
            None => Err(BioIndexError::InvalidToken),
        }
    }

    /// Number of live tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// True when no tokens are live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
