//! Query executor.
//!
//! Streams the records of a plan's slices in order, stopping at the next
//! line boundary once the byte budget is exhausted (and at least one
//! record has been emitted). The residual cursor resumes exactly where
//! the page stopped, so no record is ever emitted twice and every match
//! is eventually emitted if the client follows continuations to the end.

use std::collections::VecDeque;

use serde_json::Value;

use super::plan::{QueryPlan, RecordFilter, Slice};
use crate::error::{BioIndexError, Result};
use crate::store::RecordStore;

/// Resumable position within a partially-streamed query.
#[derive(Clone, Debug)]
pub struct QueryCursor {
    /// Index the query runs against.
    pub index: String,
    /// Unread slices; streaming resumes inside the first one.
    pub slices: VecDeque<Slice>,
    /// Absolute byte offset of the next unread line in the first slice.
    pub offset: u64,
    /// Predicate re-applied to every record.
    pub filter: RecordFilter,
    /// Total bytes the original plan covers.
    pub bytes_total: u64,
    /// Bytes consumed so far across all pages.
    pub bytes_read: u64,
    /// Records emitted so far across all pages.
    pub emitted: u64,
    /// Optional cap on total records emitted.
    pub record_limit: Option<u64>,
    /// Pages produced so far.
    pub page: u32,
}

impl QueryCursor {
    /// Start a cursor at the beginning of a plan.
    pub fn new(index: impl Into<String>, plan: QueryPlan) -> QueryCursor {
        let slices: VecDeque<Slice> = plan.slices.into();
        let offset = slices.front().map(|s| s.start).unwrap_or(0);

        QueryCursor {
            index: index.into(),
            slices,
            offset,
            filter: plan.filter,
            bytes_total: plan.bytes_total,
            bytes_read: 0,
            emitted: 0,
            record_limit: None,
            page: 0,
        }
    }

    /// Cap the total number of records emitted across all pages.
    pub fn with_record_limit(mut self, limit: u64) -> QueryCursor {
        self.record_limit = Some(limit);
        self
    }
}

/// One page of streamed records.
#[derive(Debug)]
pub struct Page {
    /// Matching records, in source order.
    pub records: Vec<Value>,
    /// Cursor for the unread remainder, `None` when the plan is drained.
    pub cursor: Option<QueryCursor>,
    /// 1-based page number.
    pub page: u32,
    /// Bytes consumed so far across all pages.
    pub bytes_read: u64,
    /// Total bytes the plan covers.
    pub bytes_total: u64,
    /// True when the page stopped because the record limit was reached.
    pub limit_reached: bool,
}

/// Stream the next page of a query.
///
/// Reads until the cumulative bytes consumed exceed `byte_limit` more
/// than they had been (once at least one record is emitted), the record
/// limit is hit, or the plan is exhausted.
pub async fn fetch_page(
    store: &RecordStore,
    mut cursor: QueryCursor,
    byte_limit: u64,
) -> Result<Page> {
    let budget_end = cursor.bytes_read.saturating_add(byte_limit);
    let mut records: Vec<Value> = Vec::new();
    let mut limit_reached = false;
    let mut truncated = false;

    'slices: while let Some(slice) = cursor.slices.front().cloned() {
        cursor.offset = cursor.offset.max(slice.start);
        let mut reader = store.line_reader(&slice.path, cursor.offset..slice.end);

        while let Some(line) = reader.next().await? {
            cursor.bytes_read += line.consumed;
            cursor.offset = line.offset + line.consumed;

            if !line.bytes.is_empty() {
                let value: Value = serde_json::from_slice(&line.bytes).map_err(|e| {
                    BioIndexError::corrupt_shard(&slice.path, 0, e.to_string())
                })?;

                let matched = value
                    .as_object()
                    .map(|record| cursor.filter.matches(record))
                    .unwrap_or(false);
                if matched {
                    records.push(value);
                    cursor.emitted += 1;
                }
            }

            let at_record_limit = cursor
                .record_limit
                .is_some_and(|limit| cursor.emitted >= limit);
            let over_budget = !records.is_empty() && cursor.bytes_read > budget_end;

            if at_record_limit || over_budget {
                limit_reached = at_record_limit;
                truncated = true;
                break 'slices;
            }
        }

        cursor.slices.pop_front();
        cursor.offset = cursor.slices.front().map(|s| s.start).unwrap_or(0);
    }

    // a page that stopped exactly at a slice boundary starts the next
    // page on the following slice
    if truncated
        && cursor
            .slices
            .front()
            .is_some_and(|front| cursor.offset >= front.end)
    {
        cursor.slices.pop_front();
        cursor.offset = cursor.slices.front().map(|s| s.start).unwrap_or(0);
    }

    cursor.page += 1;
    Ok(Page {
        page: cursor.page,
        bytes_read: cursor.bytes_read,
        bytes_total: cursor.bytes_total,
        limit_reached,
        records,
        cursor: (!cursor.slices.is_empty()).then_some(cursor),
    })
}
