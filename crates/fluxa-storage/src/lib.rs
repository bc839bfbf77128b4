//! Persistence interface for the ingestion core + HTTP fetch utilities for adapters.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::NaiveDate;
use fluxa_core::{
    BudgetDecision, ContentItemUpdate, ContentSource, IngestionRun, NewContentItem, NewRun,
    RunOutcome, SourceHealth,
};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

pub const CRATE_NAME: &str = "fluxa-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("unique constraint violated: {0}")]
    Conflict(String),
    #[error("rejected write: {0}")]
    Rejected(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Everything the ingestion core needs from the relational store.
///
/// Implementations must make `consume_budget` a single atomic
/// check-and-increment; concurrent invocations for one source rely on it.
#[async_trait]
pub trait IngestionStore: Send + Sync {
    async fn source_by_key(&self, key: &str) -> Result<Option<ContentSource>, StoreError>;

    async fn active_sources(&self) -> Result<Vec<ContentSource>, StoreError>;

    /// Insert or update by key; an existing row keeps its id.
    async fn upsert_source(&self, source: &ContentSource) -> Result<ContentSource, StoreError>;

    async fn config_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError>;

    async fn last_successful_run(
        &self,
        source_id: Uuid,
    ) -> Result<Option<IngestionRun>, StoreError>;

    async fn create_run(&self, run: NewRun) -> Result<IngestionRun, StoreError>;

    async fn finish_run(&self, run_id: Uuid, outcome: RunOutcome) -> Result<(), StoreError>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StoreError>;

    async fn upsert_source_health(&self, health: SourceHealth) -> Result<(), StoreError>;

    async fn source_health(&self) -> Result<Vec<SourceHealth>, StoreError>;

    async fn content_hash_exists(&self, content_hash: &str) -> Result<bool, StoreError>;

    async fn item_id_by_external_id(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Uuid>, StoreError>;

    async fn update_item(&self, item_id: Uuid, update: ContentItemUpdate) -> Result<(), StoreError>;

    async fn insert_item(&self, item: NewContentItem) -> Result<Uuid, StoreError>;

    /// Resolve category slugs to ids; unknown slugs are left out.
    async fn category_ids(&self, slugs: &[String]) -> Result<Vec<Uuid>, StoreError>;

    async fn link_categories(&self, item_id: Uuid, category_ids: &[Uuid])
        -> Result<(), StoreError>;

    async fn consume_budget(
        &self,
        source_key: &str,
        day: NaiveDate,
        ceiling: u32,
    ) -> Result<BudgetDecision, StoreError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 8,
            per_source_concurrency: 2,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// A single GET against a provider API.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("fetcher shut down")]
    Closed,
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source_key: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_key.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch(
        &self,
        run_id: Uuid,
        source_key: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;
        let per_source = self.per_source_semaphore(source_key).await;
        let _source = per_source.acquire().await.map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", %run_id, source_key, url = %request.url);
        self.fetch_with_retries(request).instrument(span).await
    }

    async fn fetch_with_retries(
        &self,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let mut attempt = 0;
        loop {
            let mut builder = self.client.get(&request.url).query(&request.query);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }

            let retryable = match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .map(ToString::to_string);
                        let body = resp
                            .bytes()
                            .await
                            .map_err(|e| FetchError::Request(e.without_url()))?
                            .to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            content_type,
                            body,
                        });
                    }
                    if classify_status(status) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        // Query strings may carry API keys.
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: request.url.clone(),
                        });
                    }
                    status.to_string()
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::NonRetryable
                        || attempt >= self.backoff.max_retries
                    {
                        return Err(FetchError::Request(err.without_url()));
                    }
                    err.to_string()
                }
            };

            let delay = self.backoff.delay_for_attempt(attempt);
            debug!(attempt, ?delay, reason = %retryable, "retrying provider request");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}
