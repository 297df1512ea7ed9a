//! Index builder.
//!
//! Populates an index's row table from the shards under its S3 prefix.
//! Each object is scanned line by line; runs of records sharing a key
//! tuple (and, for locus indexes, overlapping or abutting loci) collapse
//! into single rows holding the covering byte range. Because shards are
//! required to be sorted in key-then-locus order, the single-pass
//! collapse is exact.
//!
//! Objects are indexed in parallel up to a worker cap. Each object's rows
//! are replaced in a single transaction (delete by path, then bulk
//! insert), which makes builds restartable per object.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use sqlx::AnyPool;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::catalog::{quote_ident, Catalog, IndexSpec};
use crate::config::Config;
use crate::error::{BioIndexError, Result};
use crate::locus::Locus;
use crate::store::{BlobClient, RecordStore};

/// Rows inserted per statement during the bulk load.
const INSERT_BATCH: usize = 200;

/// Result of indexing one object.
#[derive(Clone, Debug)]
pub struct ObjectOutcome {
    /// Logical object key.
    pub key: String,
    /// Index rows written.
    pub rows: u64,
    /// Records read.
    pub records: u64,
    /// Records skipped for missing or invalid key fields.
    pub skipped: u64,
    /// Failure, if the object aborted.
    pub error: Option<String>,
}

/// Aggregate result of a build.
#[derive(Clone, Debug, Default)]
pub struct BuildSummary {
    /// Per-object outcomes, in key order.
    pub objects: Vec<ObjectOutcome>,
    /// Total index rows written.
    pub rows: u64,
    /// Total records read.
    pub records: u64,
    /// Total records skipped.
    pub skipped: u64,
}

/// Build the index table for one index from the current shard contents.
///
/// Concurrent builds of the same index are rejected; a failed build
/// leaves the index marked unbuilt but keeps rows from objects that
/// completed, so re-running converges on a clean result.
pub async fn build_index(
    catalog: &Catalog,
    client: Arc<dyn BlobClient>,
    config: &Config,
    name: &str,
) -> Result<BuildSummary> {
    let spec = catalog.get(name).await?;

    if !catalog.try_begin_build(name).await? {
        return Err(BioIndexError::BuildFailed {
            message: format!("index '{}' is already being built", name),
        });
    }

    let result = run_build(catalog, client, config, &spec).await;
    catalog.end_build(name, result.is_ok()).await?;
    result
}

async fn run_build(
    catalog: &Catalog,
    client: Arc<dyn BlobClient>,
    config: &Config,
    spec: &IndexSpec,
) -> Result<BuildSummary> {
    catalog.ensure_index_table(spec).await?;

    let shards = list_shards(client.as_ref(), &spec.prefix).await?;
    if shards.is_empty() {
        return Err(BioIndexError::BuildFailed {
            message: format!("no objects under prefix '{}'", spec.prefix),
        });
    }
    info!(index = %spec.name, shards = shards.len(), "indexing");

    let store = Arc::new(RecordStore::new(client, spec.compressed));
    let semaphore = Arc::new(Semaphore::new(config.workers.max(1)));
    let mut tasks = JoinSet::new();

    for key in &shards {
        let semaphore = semaphore.clone();
        let store = store.clone();
        let pool = catalog.pool().clone();
        let spec = spec.clone();
        let key = key.clone();

        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            match index_object(&store, &pool, &spec, &key).await {
                Ok(outcome) => outcome,
                Err(e) => ObjectOutcome {
                    key,
                    rows: 0,
                    records: 0,
                    skipped: 0,
                    error: Some(e.to_string()),
                },
            }
        });
    }

    let mut outcomes = Vec::with_capacity(shards.len());
    while let Some(joined) = tasks.join_next().await {
        let outcome = joined.map_err(|e| BioIndexError::BuildFailed {
            message: format!("worker panicked: {}", e),
        })?;
        outcomes.push(outcome);
    }
    outcomes.sort_by(|a, b| a.key.cmp(&b.key));

    let mut summary = BuildSummary {
        objects: outcomes,
        ..Default::default()
    };
    let mut failures = Vec::new();
    for outcome in &summary.objects {
        summary.rows += outcome.rows;
        summary.records += outcome.records;
        summary.skipped += outcome.skipped;
        if let Some(error) = &outcome.error {
            failures.push(format!("{}: {}", outcome.key, error));
        }
    }

    if !failures.is_empty() {
        return Err(BioIndexError::BuildFailed {
            message: format!(
                "{}/{} object(s) failed: {}",
                failures.len(),
                summary.objects.len(),
                failures.join("; ")
            ),
        });
    }

    info!(
        index = %spec.name,
        rows = summary.rows,
        records = summary.records,
        skipped = summary.skipped,
        "build complete"
    );
    Ok(summary)
}

/// List the logical shard keys under a prefix.
///
/// Basenames starting with `_` and `.gzi` siblings are skipped; a
/// trailing `.gz` is stripped so compressed and plain listings name the
/// same logical shards.
pub(crate) async fn list_shards(client: &dyn BlobClient, prefix: &str) -> Result<Vec<String>> {
    let mut keys = BTreeMap::new();

    for object in client.list_objects(prefix).await? {
        let basename = object.key.rsplit('/').next().unwrap_or(&object.key);
        if basename.starts_with('_') || basename.ends_with(".gzi") {
            continue;
        }

        let logical = object
            .key
            .strip_suffix(".gz")
            .unwrap_or(&object.key)
            .to_string();
        keys.entry(logical).or_insert(object.size);
    }

    Ok(keys.into_keys().collect())
}

/// An open run of records sharing one key tuple.
struct Run {
    tuple: Vec<String>,
    chromosome: Option<String>,
    start: i64,
    end: i64,
    start_offset: u64,
    end_offset: u64,
}

/// Scan one object and replace its rows in the index table.
async fn index_object(
    store: &RecordStore,
    pool: &AnyPool,
    spec: &IndexSpec,
    key: &str,
) -> Result<ObjectOutcome> {
    let size = store.object_size(key).await?;
    let mut reader = store.line_reader(key, 0..size);

    let mut open: Vec<Run> = Vec::new();
    let mut rows: Vec<Run> = Vec::new();
    let mut line_no = 0u64;
    let mut records = 0u64;
    let mut skipped = 0u64;

    while let Some(line) = reader.next().await? {
        line_no += 1;
        if line.bytes.is_empty() {
            continue;
        }

        let value: Value = serde_json::from_slice(&line.bytes)
            .map_err(|e| BioIndexError::corrupt_shard(key, line_no, e.to_string()))?;
        let record: &Map<String, Value> = value
            .as_object()
            .ok_or_else(|| BioIndexError::corrupt_shard(key, line_no, "record is not an object"))?;
        records += 1;

        let extracted = extract(spec, record);
        let (tuples, locus) = match extracted {
            Ok(parts) => parts,
            Err(e) => {
                warn!(key, line = line_no, error = %e, "skipping record");
                skipped += 1;
                continue;
            }
        };

        let line_start = line.offset;
        let line_end = line.offset + line.consumed;

        // runs not continued by this record are complete
        let mut index = 0;
        while index < open.len() {
            if tuples.contains(&open[index].tuple) {
                index += 1;
            } else {
                rows.push(open.swap_remove(index));
            }
        }

        for tuple in tuples {
            let (locus_start, locus_end) = locus.as_ref().map(Locus::range).unwrap_or((0, 0));
            let chromosome = locus.as_ref().map(|l| l.chromosome().to_string());

            match open.iter_mut().find(|run| run.tuple == tuple) {
                Some(run) => {
                    // merge when the locus overlaps or abuts the run
                    let merges = match &locus {
                        None => true,
                        Some(_) => run.chromosome == chromosome && locus_start <= run.end,
                    };
                    if merges {
                        run.end = run.end.max(locus_end);
                        run.end_offset = line_end;
                    } else {
                        let finished = std::mem::replace(
                            run,
                            Run {
                                tuple,
                                chromosome,
                                start: locus_start,
                                end: locus_end,
                                start_offset: line_start,
                                end_offset: line_end,
                            },
                        );
                        rows.push(finished);
                    }
                }
                None => open.push(Run {
                    tuple,
                    chromosome,
                    start: locus_start,
                    end: locus_end,
                    start_offset: line_start,
                    end_offset: line_end,
                }),
            }
        }
    }
    rows.append(&mut open);

    write_rows(pool, spec, key, &rows).await?;
    info!(key, rows = rows.len(), records, skipped, "object indexed");

    Ok(ObjectOutcome {
        key: key.to_string(),
        rows: rows.len() as u64,
        records,
        skipped,
        error: None,
    })
}

/// The key tuples and locus a record contributes.
fn extract(
    spec: &IndexSpec,
    record: &Map<String, Value>,
) -> Result<(Vec<Vec<String>>, Option<Locus>)> {
    let tuples = spec.schema.key_tuples(record)?;
    let locus = if spec.schema.has_locus() {
        Some(spec.schema.locus_of_record(record)?)
    } else {
        None
    };
    Ok((tuples, locus))
}

/// Replace an object's rows in one transaction.
async fn write_rows(pool: &AnyPool, spec: &IndexSpec, key: &str, rows: &[Run]) -> Result<()> {
    let table = quote_ident(&spec.table_name())?;

    let mut columns: Vec<String> = Vec::new();
    for part in spec.schema.key_parts() {
        columns.push(quote_ident(&part.column())?);
    }
    if spec.schema.has_locus() {
        columns.push("`chromosome`".to_string());
        columns.push("`start`".to_string());
        columns.push("`end`".to_string());
    }
    columns.push("`path`".to_string());
    columns.push("`start_offset`".to_string());
    columns.push("`end_offset`".to_string());

    let row_placeholders = format!(
        "({})",
        columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
    );

    let mut tx = pool.begin().await?;

    sqlx::query(&format!("DELETE FROM {} WHERE `path` = ?", table))
        .bind(key)
        .execute(&mut *tx)
        .await?;

    for batch in rows.chunks(INSERT_BATCH) {
        let sql = format!(
            "INSERT INTO {} ({}) VALUES {}",
            table,
            columns.join(", "),
            vec![row_placeholders.as_str(); batch.len()].join(", ")
        );

        let mut query = sqlx::query(&sql);
        for run in batch {
            for value in &run.tuple {
                query = query.bind(value);
            }
            if spec.schema.has_locus() {
                query = query.bind(run.chromosome.as_deref().unwrap_or(""));
                query = query.bind(run.start);
                query = query.bind(run.end);
            }
            query = query.bind(key);
            query = query.bind(run.start_offset as i64);
            query = query.bind(run.end_offset as i64);
        }
        query.execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}
