#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use fluxa_adapters::{
    AdapterContext, AdapterError, AdapterRegistry, ContentAdapter, Credentials, FetchedPayload,
};
use fluxa_core::{ContentSource, NormalizedItem};
use fluxa_ingest::Ingestor;
use fluxa_storage::{HttpClientConfig, HttpFetcher, IngestionStore, MemoryStore};

/// Payload a stub adapter serves; tests swap it between runs.
#[derive(Clone, Default)]
pub struct Feed {
    items: Arc<Mutex<Vec<NormalizedItem>>>,
    fetches: Arc<AtomicUsize>,
    failure: Arc<Mutex<Option<String>>>,
}

impl Feed {
    pub fn new(items: Vec<NormalizedItem>) -> Self {
        let feed = Self::default();
        feed.set(items);
        feed
    }

    pub fn set(&self, items: Vec<NormalizedItem>) {
        *self.items.lock().unwrap() = items;
    }

    pub fn fail_with(&self, message: &str) {
        *self.failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

struct StubAdapter {
    source_key: String,
    feed: Feed,
}

#[async_trait]
impl ContentAdapter for StubAdapter {
    fn source_key(&self) -> &str {
        &self.source_key
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError> {
        self.feed.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.feed.failure.lock().unwrap().clone() {
            return Err(AdapterError::Provider(message));
        }
        let body = serde_json::to_vec(&*self.feed.items.lock().unwrap())?;
        Ok(FetchedPayload::new(
            format!("stub://{}", self.source_key),
            "application/json",
            body,
            ctx.fetched_at,
        ))
    }

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError> {
        Ok(serde_json::from_slice(&raw.body)?)
    }
}

pub fn register_feed(registry: &mut AdapterRegistry, source_key: &str, feed: &Feed) {
    let feed = feed.clone();
    registry.register(source_key, move |settings| {
        Ok(Box::new(StubAdapter {
            source_key: settings.source_key.clone(),
            feed: feed.clone(),
        }))
    });
}

pub fn ingestor(store: &Arc<MemoryStore>, registry: AdapterRegistry) -> Ingestor {
    let store: Arc<dyn IngestionStore> = store.clone();
    Ingestor::new(
        store,
        Arc::new(registry),
        Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
        Credentials::default(),
    )
}

pub async fn add_source(store: &MemoryStore, key: &str) -> ContentSource {
    store.insert_source(ContentSource::new(key, key)).await
}

pub fn clock() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

pub fn item(title: &str, external_id: Option<&str>) -> NormalizedItem {
    NormalizedItem {
        title: title.to_string(),
        source_url: format!("https://acme.example.test/{}", title.to_lowercase().replace(' ', "-")),
        external_id: external_id.map(ToString::to_string),
        published_at: Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()),
        excerpt: Some(format!("{title} excerpt")),
        ..Default::default()
    }
}
