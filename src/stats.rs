//! Approximate counts and key-prefix listings.

use sqlx::{AnyPool, Row};

use crate::catalog::{quote_ident, IndexSpec};
use crate::error::{BioIndexError, Result};
use crate::query::{fetch_page, QueryCursor, QueryPlan};
use crate::store::RecordStore;

/// Estimate how many records a plan would return.
///
/// Streams up to `sample_limit` matching records; if that drains the plan
/// the count is exact, otherwise the mean bytes-per-record of the sample
/// extrapolates over the total bytes the plan covers. Never streams the
/// full result.
pub async fn count(
    store: &RecordStore,
    index: &str,
    plan: QueryPlan,
    sample_limit: u32,
) -> Result<u64> {
    let cursor = QueryCursor::new(index, plan).with_record_limit(sample_limit as u64);
    let page = fetch_page(store, cursor, u64::MAX).await?;

    let sampled = page.records.len() as u64;
    match page.cursor {
        // the sample drained the plan, so it is the count
        None => Ok(sampled),
        Some(_) if page.bytes_read == 0 => Ok(0),
        Some(_) => Ok(sampled * page.bytes_total / page.bytes_read),
    }
}

/// Distinct values of the first key part beginning with `prefix`, in
/// lexicographic order, bounded by `limit`.
pub async fn match_keys(
    pool: &AnyPool,
    spec: &IndexSpec,
    prefix: &str,
    limit: u32,
) -> Result<Vec<String>> {
    if !spec.built {
        return Err(BioIndexError::IndexNotBuilt {
            name: spec.name.clone(),
        });
    }

    let part = spec.schema.key_parts().first().ok_or_else(|| {
        BioIndexError::malformed_schema(format!(
            "index '{}' has no key to match against",
            spec.name
        ))
    })?;
    let column = quote_ident(&part.column())?;

    let sql = format!(
        "SELECT DISTINCT {} AS `k` FROM {} WHERE {} LIKE ? ESCAPE '!' ORDER BY `k` LIMIT ?",
        column,
        quote_ident(&spec.table_name())?,
        column
    );

    let rows = sqlx::query(&sql)
        .bind(format!("{}%", escape_like(prefix)))
        .bind(limit as i64)
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| row.try_get::<String, _>("k").map_err(Into::into))
        .collect()
}

/// Escape LIKE wildcards with `!` so the prefix matches literally.
fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '!' | '%' | '_') {
            out.push('!');
        }
        out.push(c);
    }
    out
}
