//! Axum HTTP surface for Fluxa ingestion: the cron trigger plus read-only
//! health and run listings.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use fluxa_ingest::{IngestConfig, Ingestor};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "fluxa-web";

pub const DEFAULT_RUNS_LIMIT: usize = 50;
pub const MAX_RUNS_LIMIT: usize = 500;

const CRON_SECRET_HEADER: &str = "x-cron-secret";

#[derive(Clone)]
pub struct AppState {
    pub ingestor: Arc<Ingestor>,
    pub cron_secret: Option<String>,
    pub production: bool,
}

impl AppState {
    pub fn new(ingestor: Arc<Ingestor>) -> Self {
        Self {
            ingestor,
            cron_secret: None,
            production: false,
        }
    }

    pub fn from_config(ingestor: Arc<Ingestor>, config: &IngestConfig) -> Self {
        Self {
            ingestor,
            cron_secret: config.cron_secret.clone(),
            production: config.is_production(),
        }
    }

    pub fn with_cron_secret(mut self, secret: impl Into<String>) -> Self {
        self.cron_secret = Some(secret.into());
        self
    }
}

#[derive(Debug, Deserialize, Default)]
struct CronQuery {
    #[serde(default)]
    force: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct RunsQuery {
    limit: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/cron/ingest", get(cron_ingest_handler).post(cron_ingest_handler))
        .route("/api/sources/health", get(source_health_handler))
        .route("/api/runs", get(runs_handler))
        .route("/healthz", get(healthz_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "fluxa web listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn cron_ingest_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<CronQuery>,
) -> Response {
    if !authorized(&state, &headers) {
        warn!("rejected cron trigger with bad or missing secret");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "unauthorized" })),
        )
            .into_response();
    }

    let source = query
        .source
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let summary = state
        .ingestor
        .orchestrate_ingestion(force_flag(query.force.as_deref()), source)
        .await;
    Json(summary).into_response()
}

fn force_flag(raw: Option<&str>) -> bool {
    raw.map(str::trim)
        .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

fn authorized(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(expected) = state.cron_secret.as_deref() else {
        if state.production {
            warn!("CRON_SECRET is not set; cron endpoint is unauthenticated");
        }
        return true;
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    let explicit = headers
        .get(CRON_SECRET_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    [bearer, explicit]
        .into_iter()
        .flatten()
        .any(|presented| secrets_match(presented, expected))
}

fn secrets_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

async fn source_health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.ingestor.store().source_health().await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn runs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RunsQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_RUNS_LIMIT)
        .clamp(1, MAX_RUNS_LIMIT);
    match state.ingestor.store().recent_runs(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    warn!(error = %err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
