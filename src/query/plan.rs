//! Query planner.
//!
//! Selects index rows matching a query, orders them, and coalesces
//! adjacent byte ranges into slices so the record store issues as few
//! ranged reads as possible.

use serde_json::{Map, Value};
use sqlx::{AnyPool, Row};
use tracing::warn;

use crate::catalog::{quote_ident, IndexSpec};
use crate::error::{BioIndexError, Result};
use crate::locus::{parse_region, GeneResolver, Region};
use crate::schema::{KeyPart, LocusPart};

/// A planned ranged read: a half-open byte range of one object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice {
    /// Logical object key.
    pub path: String,
    /// Range start (inclusive).
    pub start: u64,
    /// Range end (exclusive).
    pub end: u64,
}

/// Per-record predicate re-applied while streaming.
///
/// Index rows are coarse (they cover runs of records), so every record is
/// re-verified for exact key equality and, for locus-bounded queries,
/// overlap with the query region.
#[derive(Clone, Debug)]
pub struct RecordFilter {
    /// Key parts paired with the queried values.
    pub keys: Vec<(KeyPart, String)>,
    /// Locus extraction rule and query region, for locus-bounded queries.
    pub locus: Option<(LocusPart, Region)>,
}

impl RecordFilter {
    /// Filter that accepts everything.
    pub fn none() -> RecordFilter {
        RecordFilter {
            keys: Vec::new(),
            locus: None,
        }
    }

    /// True if the record matches the query exactly.
    pub fn matches(&self, record: &Map<String, Value>) -> bool {
        for (part, value) in &self.keys {
            if !part.matches(record, value) {
                return false;
            }
        }

        if let Some((locus_part, region)) = &self.locus {
            match locus_part.locus_of(record) {
                Ok(locus) => {
                    if !locus.overlaps(region) {
                        return false;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "record in slice has no usable locus");
                    return false;
                }
            }
        }

        true
    }
}

/// A compiled query: ordered slices plus the record filter.
#[derive(Clone, Debug)]
pub struct QueryPlan {
    /// Coalesced slices in emission order.
    pub slices: Vec<Slice>,
    /// Per-record predicate.
    pub filter: RecordFilter,
    /// Total bytes the slices cover.
    pub bytes_total: u64,
}

/// Plan a keyed (and optionally locus-bounded) query.
///
/// Exactly one value per key part must be provided; a schema with a locus
/// accepts one trailing region string. Region strings that are not
/// coordinates are resolved as gene names through `resolver`.
pub async fn plan_query(
    pool: &AnyPool,
    spec: &IndexSpec,
    q: &[String],
    resolver: Option<&dyn GeneResolver>,
    stitch_gap: u64,
) -> Result<QueryPlan> {
    if !spec.built {
        return Err(BioIndexError::IndexNotBuilt {
            name: spec.name.clone(),
        });
    }

    let key_arity = spec.schema.key_parts().len();
    let locus_bounded = match q.len() {
        n if n == key_arity => false,
        n if n == key_arity + 1 && spec.schema.has_locus() => true,
        _ => {
            return Err(BioIndexError::ArityMismatch {
                schema: spec.schema.schema_str().to_string(),
                expected: spec.schema.arity(),
                actual: q.len(),
            });
        }
    };

    let keys: Vec<(KeyPart, String)> = spec
        .schema
        .key_parts()
        .iter()
        .cloned()
        .zip(q.iter().cloned())
        .collect();

    let region = if locus_bounded {
        Some(parse_region(&q[key_arity], resolver)?)
    } else {
        None
    };

    // row selection
    let mut predicates: Vec<String> = Vec::new();
    for (part, _) in &keys {
        predicates.push(format!("{} = ?", quote_ident(&part.column())?));
    }
    if region.is_some() {
        predicates.push("`chromosome` = ?".to_string());
        predicates.push("NOT (`end` <= ? OR `start` >= ?)".to_string());
    }

    let mut order: Vec<String> = keys
        .iter()
        .map(|(part, _)| quote_ident(&part.column()))
        .collect::<Result<_>>()?;
    if spec.schema.has_locus() {
        order.push("`chromosome`".to_string());
        order.push("`start`".to_string());
    }
    order.push("`path`".to_string());
    order.push("`start_offset`".to_string());

    let mut sql = format!(
        "SELECT `path`, `start_offset`, `end_offset` FROM {}",
        quote_ident(&spec.table_name())?
    );
    if !predicates.is_empty() {
        sql.push_str(&format!(" WHERE {}", predicates.join(" AND ")));
    }
    sql.push_str(&format!(" ORDER BY {}", order.join(", ")));

    let mut query = sqlx::query(&sql);
    for (_, value) in &keys {
        query = query.bind(value);
    }
    if let Some(region) = &region {
        query = query
            .bind(&region.chromosome)
            .bind(region.start)
            .bind(region.end);
    }

    let rows = query.fetch_all(pool).await?;
    let slices = coalesce(
        rows.iter()
            .map(|row| {
                Ok(Slice {
                    path: row.try_get::<String, _>("path")?,
                    start: row.try_get::<i64, _>("start_offset")? as u64,
                    end: row.try_get::<i64, _>("end_offset")? as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        stitch_gap,
    );

    let bytes_total = slices.iter().map(|s| s.end - s.start).sum();
    let locus = region.and_then(|r| spec.schema.locus().cloned().map(|part| (part, r)));

    Ok(QueryPlan {
        slices,
        filter: RecordFilter { keys, locus },
        bytes_total,
    })
}

/// Plan a full scan of an index.
///
/// Every record is covered by index rows, so one slice per object (from
/// the lowest start offset to the highest end offset) streams everything,
/// compressed or not, with no filtering.
pub async fn plan_all(pool: &AnyPool, spec: &IndexSpec) -> Result<QueryPlan> {
    if !spec.built {
        return Err(BioIndexError::IndexNotBuilt {
            name: spec.name.clone(),
        });
    }

    let sql = format!(
        "SELECT `path`, MIN(`start_offset`) AS `start_offset`, MAX(`end_offset`) AS `end_offset` \
         FROM {} GROUP BY `path` ORDER BY `path`",
        quote_ident(&spec.table_name())?
    );

    let rows = sqlx::query(&sql).fetch_all(pool).await?;
    let slices = coalesce(
        rows.iter()
            .map(|row| {
                Ok(Slice {
                    path: row.try_get::<String, _>("path")?,
                    start: row.try_get::<i64, _>("start_offset")? as u64,
                    end: row.try_get::<i64, _>("end_offset")? as u64,
                })
            })
            .collect::<Result<Vec<_>>>()?,
        0,
    );

    let bytes_total = slices.iter().map(|s| s.end - s.start).sum();

    Ok(QueryPlan {
        slices,
        filter: RecordFilter::none(),
        bytes_total,
    })
}

/// Merge adjacent slices of the same object whose gap is at most
/// `stitch_gap` bytes; drop degenerate ranges.
fn coalesce(slices: Vec<Slice>, stitch_gap: u64) -> Vec<Slice> {
    let mut merged: Vec<Slice> = Vec::with_capacity(slices.len());

    for slice in slices {
        if slice.end <= slice.start {
            // end <= start would read the rest of the object
            warn!(path = %slice.path, "bad index row byte range; skipping");
            continue;
        }

        match merged.last_mut() {
            Some(last) if last.path == slice.path && slice.start <= last.end + stitch_gap => {
                last.end = last.end.max(slice.end);
            }
            _ => merged.push(slice),
        }
    }

    merged
}
