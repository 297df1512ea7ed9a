//! REST façade.
//!
//! Thin HTTP surface over the engine: one route per query verb plus the
//! continuation endpoint, all returning the standard response envelope.
//! Continuation tokens are process-local, so deployments must route a
//! follow-up request to the process that minted its token.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::catalog::Catalog;
use crate::config::Config;
use crate::continuation::{ContinuationState, Continuations};
use crate::error::{BioIndexError, Result};
use crate::locus::GeneResolver;
use crate::query::{fetch_page, plan_all, plan_query, Page, QueryCursor};
use crate::stats;
use crate::store::{BlobClient, RecordStore};

/// Shared server state.
pub struct App {
    /// Engine configuration.
    pub config: Config,
    /// Index catalog.
    pub catalog: Catalog,
    /// Blob store client.
    pub client: Arc<dyn BlobClient>,
    /// Optional gene-name resolver.
    pub resolver: Option<Arc<dyn GeneResolver>>,
    /// Live continuation tokens.
    pub continuations: Continuations,
}

impl App {
    /// Assemble the server state.
    pub fn new(
        config: Config,
        catalog: Catalog,
        client: Arc<dyn BlobClient>,
        resolver: Option<Arc<dyn GeneResolver>>,
    ) -> App {
        let ttl = Duration::from_secs(config.continuation_ttl_secs);
        App {
            config,
            catalog,
            client,
            resolver,
            continuations: Continuations::new(ttl),
        }
    }
}

/// Build the API router.
pub fn router(app: Arc<App>) -> Router {
    Router::new()
        .route("/api/bio/indexes", get(api_indexes))
        .route("/api/bio/query/:index", get(api_query))
        .route("/api/bio/all/:index", get(api_all))
        .route("/api/bio/count/:index", get(api_count))
        .route("/api/bio/match/:index", get(api_match))
        .route("/api/bio/cont", get(api_cont))
        .with_state(app)
}

/// Serve the API until the process exits.
pub async fn serve(app: Arc<App>, port: u16) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| BioIndexError::invalid_config(format!("cannot bind port {}: {}", port, e)))?;

    info!(port, "serving");
    axum::serve(listener, router(app))
        .await
        .map_err(|e| BioIndexError::invalid_config(format!("server error: {}", e)))
}

#[derive(Debug, Deserialize)]
struct QueryParams {
    q: Option<String>,
    fmt: Option<String>,
    limit: Option<u64>,
    token: Option<String>,
}

#[derive(Serialize)]
struct Profile {
    query: f64,
    fetch: f64,
}

#[derive(Serialize)]
struct Progress {
    bytes_read: u64,
    bytes_total: u64,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Data {
    Rows(Vec<Value>),
    Columns(Map<String, Value>),
    Keys(Vec<String>),
}

#[derive(Serialize)]
struct Envelope {
    continuation: Option<String>,
    count: usize,
    page: u32,
    data: Data,
    index: String,
    limit: Option<u64>,
    profile: Profile,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<Progress>,
    q: Vec<String>,
}

/// `GET /api/bio/indexes` — all queryable indexes.
async fn api_indexes(State(app): State<Arc<App>>) -> ApiResult<Json<Value>> {
    let indexes = app.catalog.list().await?;

    let data: Vec<Value> = indexes
        .iter()
        .map(|spec| {
            json!({
                "index": spec.name,
                "built": spec.built,
                "compressed": spec.compressed,
                "schema": spec.schema.schema_str(),
                "query": {
                    "keys": spec.schema.key_parts().iter()
                        .map(|part| part.column()).collect::<Vec<_>>(),
                    "locus": spec.schema.has_locus(),
                },
            })
        })
        .collect();

    Ok(Json(json!({ "count": data.len(), "data": data })))
}

/// `GET /api/bio/query/{index}?q=…` — stream matching records.
async fn api_query(
    State(app): State<Arc<App>>,
    Path(index): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Envelope>> {
    let spec = app.catalog.get(&index).await?;
    let qs = parse_query(params.q.as_deref(), true)?;
    let fmt = parse_format(params.fmt.as_deref())?;

    let started = Instant::now();
    let plan = plan_query(
        app.catalog.pool(),
        &spec,
        &qs,
        app.resolver.as_deref(),
        app.config.stitch_gap,
    )
    .await?;
    let query_s = started.elapsed().as_secs_f64();

    let mut cursor = QueryCursor::new(&index, plan);
    if let Some(limit) = params.limit {
        cursor = cursor.with_record_limit(limit);
    }

    let store = RecordStore::new(app.client.clone(), spec.compressed);
    let started = Instant::now();
    let page = fetch_page(&store, cursor, app.config.response_limit).await?;
    let fetch_s = started.elapsed().as_secs_f64();

    Ok(Json(envelope(
        &app, &index, qs, fmt, params.limit, page, query_s, fetch_s,
    )))
}

/// `GET /api/bio/all/{index}` — stream every record under an index.
async fn api_all(
    State(app): State<Arc<App>>,
    Path(index): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Envelope>> {
    let spec = app.catalog.get(&index).await?;
    let fmt = parse_format(params.fmt.as_deref())?;

    let started = Instant::now();
    let plan = plan_all(app.catalog.pool(), &spec).await?;
    let query_s = started.elapsed().as_secs_f64();

    let mut cursor = QueryCursor::new(&index, plan);
    if let Some(limit) = params.limit {
        cursor = cursor.with_record_limit(limit);
    }

    let store = RecordStore::new(app.client.clone(), spec.compressed);
    let started = Instant::now();
    let page = fetch_page(&store, cursor, app.config.response_limit).await?;
    let fetch_s = started.elapsed().as_secs_f64();

    Ok(Json(envelope(
        &app,
        &index,
        Vec::new(),
        fmt,
        params.limit,
        page,
        query_s,
        fetch_s,
    )))
}

/// `GET /api/bio/count/{index}?q=…` — approximate record count.
async fn api_count(
    State(app): State<Arc<App>>,
    Path(index): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Value>> {
    let spec = app.catalog.get(&index).await?;
    let qs = parse_query(params.q.as_deref(), false)?;

    let started = Instant::now();
    let plan = if qs.is_empty() {
        plan_all(app.catalog.pool(), &spec).await?
    } else {
        plan_query(
            app.catalog.pool(),
            &spec,
            &qs,
            app.resolver.as_deref(),
            app.config.stitch_gap,
        )
        .await?
    };

    let store = RecordStore::new(app.client.clone(), spec.compressed);
    let count = stats::count(&store, &index, plan, app.config.sample_limit).await?;
    let query_s = started.elapsed().as_secs_f64();

    Ok(Json(json!({
        "profile": { "query": query_s },
        "index": index,
        "q": qs,
        "count": count,
    })))
}

/// `GET /api/bio/match/{index}?q=…` — distinct first-key values.
async fn api_match(
    State(app): State<Arc<App>>,
    Path(index): Path<String>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Envelope>> {
    let spec = app.catalog.get(&index).await?;
    let prefix = params.q.clone().unwrap_or_default();

    let limit = params
        .limit
        .map(|l| (l as u32).min(app.config.match_limit))
        .unwrap_or(app.config.match_limit);

    let started = Instant::now();
    let keys = stats::match_keys(app.catalog.pool(), &spec, &prefix, limit).await?;
    let query_s = started.elapsed().as_secs_f64();

    Ok(Json(Envelope {
        continuation: None,
        count: keys.len(),
        page: 1,
        data: Data::Keys(keys),
        index,
        limit: params.limit,
        profile: Profile {
            query: query_s,
            fetch: 0.0,
        },
        progress: None,
        q: vec![prefix],
    }))
}

/// `GET /api/bio/cont?token=…` — resume a truncated query.
async fn api_cont(
    State(app): State<Arc<App>>,
    Query(params): Query<QueryParams>,
) -> ApiResult<Json<Envelope>> {
    let token = params.token.as_deref().ok_or(BioIndexError::InvalidToken)?;
    let state = app.continuations.lookup(token)?;

    let index = state.cursor.index.clone();
    let spec = app.catalog.get(&index).await?;
    let fmt = parse_format(Some(state.fmt.as_str()))?;

    let store = RecordStore::new(app.client.clone(), spec.compressed);
    let started = Instant::now();
    let page = fetch_page(&store, state.cursor, app.config.response_limit).await?;
    let fetch_s = started.elapsed().as_secs_f64();

    Ok(Json(envelope(
        &app, &index, state.q, fmt, None, page, 0.0, fetch_s,
    )))
}

/// Build the standard envelope, minting a continuation for a truncated
/// page.
#[allow(clippy::too_many_arguments)]
fn envelope(
    app: &App,
    index: &str,
    qs: Vec<String>,
    fmt: Format,
    limit: Option<u64>,
    page: Page,
    query_s: f64,
    fetch_s: f64,
) -> Envelope {
    let continuation = if page.limit_reached {
        None
    } else {
        page.cursor.clone().map(|cursor| {
            app.continuations.insert(ContinuationState {
                cursor,
                q: qs.clone(),
                fmt: fmt.name().to_string(),
            })
        })
    };

    let data = match fmt {
        Format::Row => Data::Rows(page.records),
        Format::Column => Data::Columns(to_columns(&page.records)),
    };
    let count = match &data {
        Data::Rows(rows) => rows.len(),
        Data::Columns(columns) => columns
            .values()
            .next()
            .and_then(|v| v.as_array())
            .map_or(0, Vec::len),
        Data::Keys(keys) => keys.len(),
    };

    Envelope {
        continuation,
        count,
        page: page.page,
        data,
        index: index.to_string(),
        limit,
        profile: Profile {
            query: query_s,
            fetch: fetch_s,
        },
        progress: Some(Progress {
            bytes_read: page.bytes_read,
            bytes_total: page.bytes_total,
        }),
        q: qs,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Row,
    Column,
}

impl Format {
    fn name(self) -> &'static str {
        match self {
            Format::Row => "row",
            Format::Column => "column",
        }
    }
}

fn parse_format(fmt: Option<&str>) -> Result<Format> {
    match fmt.unwrap_or("row") {
        "r" | "row" => Ok(Format::Row),
        "c" | "col" | "column" => Ok(Format::Column),
        other => Err(BioIndexError::invalid_config(format!(
            "invalid output format: {}",
            other
        ))),
    }
}

fn parse_query(q: Option<&str>, required: bool) -> Result<Vec<String>> {
    match q {
        Some(q) if !q.is_empty() => Ok(q.split(',').map(|s| s.trim().to_string()).collect()),
        _ if required => Err(BioIndexError::invalid_config("missing query parameter")),
        _ => Ok(Vec::new()),
    }
}

/// Transform a list of records into a map of column arrays, keyed by the
/// first record's fields.
fn to_columns(records: &[Value]) -> Map<String, Value> {
    let mut columns = Map::new();
    let Some(first) = records.first().and_then(|r| r.as_object()) else {
        return columns;
    };

    for key in first.keys() {
        let values: Vec<Value> = records
            .iter()
            .map(|record| record.get(key).cloned().unwrap_or(Value::Null))
            .collect();
        columns.insert(key.clone(), Value::Array(values));
    }
    columns
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Error wrapper mapping engine errors onto HTTP statuses.
struct ApiError(BioIndexError);

impl From<BioIndexError> for ApiError {
    fn from(e: BioIndexError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            BioIndexError::MalformedSchema { .. }
            | BioIndexError::IndexNotBuilt { .. }
            | BioIndexError::InvalidLocus { .. }
            | BioIndexError::UnknownLocus { .. }
            | BioIndexError::MissingKey { .. }
            | BioIndexError::ArityMismatch { .. }
            | BioIndexError::InvalidConfig { .. } => StatusCode::BAD_REQUEST,
            BioIndexError::UnknownIndex { .. } | BioIndexError::InvalidToken => {
                StatusCode::NOT_FOUND
            }
            BioIndexError::ExpiredToken => StatusCode::GONE,
            BioIndexError::BlobRead { .. } => StatusCode::BAD_GATEWAY,
            BioIndexError::CorruptShard { .. }
            | BioIndexError::BuildFailed { .. }
            | BioIndexError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "detail": self.0.to_string(),
            "code": self.0.code(),
        }));
        (status, body).into_response()
    }
}
