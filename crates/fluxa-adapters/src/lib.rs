//! Content adapter contract, registry, and provider adapters.
//!
//! An adapter owns everything provider-specific: how to call the API and how
//! to turn its payload into [`NormalizedItem`]s. The ingestion runner only
//! ever sees this trait, so adding a source means registering a factory here.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxa_core::NormalizedItem;
use fluxa_storage::{FetchError, FetchRequest, HttpFetcher};
use scraper::Html;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

mod api_sports;
mod guardian;
mod newsapi;
mod rss;

pub use api_sports::{ApiSportsAdapter, API_SPORTS_KEY};
pub use guardian::{GuardianAdapter, GUARDIAN_KEY};
pub use newsapi::{NewsApiAdapter, NEWSAPI_KEY};
pub use rss::{RssFeedAdapter, RSS_PREFIX};

pub const CRATE_NAME: &str = "fluxa-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter not found for source `{0}`")]
    UnknownSource(String),
    #[error("missing credential {env_var} for source `{source_key}`")]
    MissingCredential {
        source_key: String,
        env_var: &'static str,
    },
    #[error("invalid config for source `{source_key}`: {message}")]
    InvalidConfig { source_key: String, message: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("provider returned an error: {0}")]
    Provider(String),
    #[error("could not parse payload: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for AdapterError {
    fn from(err: serde_json::Error) -> Self {
        AdapterError::Parse(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
}

/// Raw provider response, opaque to the runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    pub url: String,
    pub content_type: String,
    pub body: Vec<u8>,
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPayload {
    pub fn new(
        url: impl Into<String>,
        content_type: impl Into<String>,
        body: impl Into<Vec<u8>>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            url: url.into(),
            content_type: content_type.into(),
            body: body.into(),
            fetched_at,
        }
    }

    pub fn text(&self) -> Result<&str, AdapterError> {
        std::str::from_utf8(&self.body).map_err(|e| AdapterError::Parse(e.to_string()))
    }
}

#[async_trait]
pub trait ContentAdapter: Send + Sync {
    fn source_key(&self) -> &str;

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError>;

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError>;
}

/// Provider API keys, looked up by environment variable name.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    values: HashMap<String, String>,
}

impl Credentials {
    pub const KNOWN_VARS: [&'static str; 3] = ["NEWSAPI_KEY", "GUARDIAN_API_KEY", "API_SPORTS_KEY"];

    pub fn from_env() -> Self {
        let values = Self::KNOWN_VARS
            .iter()
            .filter_map(|name| {
                std::env::var(name)
                    .ok()
                    .filter(|v| !v.trim().is_empty())
                    .map(|v| (name.to_string(), v))
            })
            .collect();
        Self { values }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub(crate) fn require(
        &self,
        source_key: &str,
        env_var: &'static str,
    ) -> Result<String, AdapterError> {
        self.get(env_var)
            .map(ToString::to_string)
            .ok_or_else(|| AdapterError::MissingCredential {
                source_key: source_key.to_string(),
                env_var,
            })
    }
}

/// Everything a factory needs to build an adapter for one run.
#[derive(Clone)]
pub struct AdapterSettings {
    pub source_key: String,
    pub source_config: JsonValue,
    pub max_items_per_run: usize,
    pub credentials: Credentials,
    pub http: Arc<HttpFetcher>,
}

impl fmt::Debug for AdapterSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterSettings")
            .field("source_key", &self.source_key)
            .field("source_config", &self.source_config)
            .field("max_items_per_run", &self.max_items_per_run)
            .finish_non_exhaustive()
    }
}

impl AdapterSettings {
    pub(crate) fn config_str(&self, key: &str) -> Option<&str> {
        self.source_config
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Provider page size, capped by the provider's own maximum.
    pub(crate) fn page_size(&self, provider_max: usize) -> usize {
        self.max_items_per_run.clamp(1, provider_max)
    }
}

pub type AdapterFactory =
    Arc<dyn Fn(&AdapterSettings) -> Result<Box<dyn ContentAdapter>, AdapterError> + Send + Sync>;

/// Source key → adapter factory. Exact keys win over prefixes.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    exact: HashMap<String, AdapterFactory>,
    prefixes: Vec<(String, AdapterFactory)>,
}

impl fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.exact.keys().collect();
        keys.sort();
        let prefixes: Vec<_> = self.prefixes.iter().map(|(p, _)| p).collect();
        f.debug_struct("AdapterRegistry")
            .field("keys", &keys)
            .field("prefixes", &prefixes)
            .finish()
    }
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, source_key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&AdapterSettings) -> Result<Box<dyn ContentAdapter>, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        self.exact.insert(source_key.into(), Arc::new(factory));
        self
    }

    pub fn register_prefix<F>(&mut self, prefix: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&AdapterSettings) -> Result<Box<dyn ContentAdapter>, AdapterError>
            + Send
            + Sync
            + 'static,
    {
        self.prefixes.push((prefix.into(), Arc::new(factory)));
        self
    }

    fn factory_for(&self, source_key: &str) -> Option<&AdapterFactory> {
        self.exact.get(source_key).or_else(|| {
            self.prefixes
                .iter()
                .find(|(prefix, _)| source_key.starts_with(prefix.as_str()))
                .map(|(_, factory)| factory)
        })
    }

    pub fn contains(&self, source_key: &str) -> bool {
        self.factory_for(source_key).is_some()
    }

    pub fn build(&self, settings: &AdapterSettings) -> Result<Box<dyn ContentAdapter>, AdapterError> {
        let factory = self
            .factory_for(&settings.source_key)
            .ok_or_else(|| AdapterError::UnknownSource(settings.source_key.clone()))?;
        factory(settings)
    }
}

/// Registry with every provider adapter shipped in this crate.
pub fn default_registry() -> AdapterRegistry {
    let mut registry = AdapterRegistry::new();
    registry
        .register(NEWSAPI_KEY, |s| Ok(Box::new(NewsApiAdapter::from_settings(s)?)))
        .register(GUARDIAN_KEY, |s| Ok(Box::new(GuardianAdapter::from_settings(s)?)))
        .register(API_SPORTS_KEY, |s| Ok(Box::new(ApiSportsAdapter::from_settings(s)?)))
        .register_prefix(RSS_PREFIX, |s| Ok(Box::new(RssFeedAdapter::from_settings(s)?)));
    registry
}

pub(crate) async fn fetch_payload(
    settings: &AdapterSettings,
    ctx: &AdapterContext,
    request: &FetchRequest,
    fallback_content_type: &str,
) -> Result<FetchedPayload, AdapterError> {
    let resp = settings
        .http
        .fetch(ctx.run_id, &settings.source_key, request)
        .await?;
    Ok(FetchedPayload {
        url: resp.final_url,
        content_type: resp
            .content_type
            .unwrap_or_else(|| fallback_content_type.to_string()),
        body: resp.body,
        fetched_at: ctx.fetched_at,
    })
}

/// RFC 3339 first (JSON APIs), then RFC 2822 (RSS).
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Visible text of an HTML fragment, whitespace collapsed.
pub fn plain_text(html: &str) -> Option<String> {
    let fragment = Html::parse_fragment(html);
    let text = fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub(crate) fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}
