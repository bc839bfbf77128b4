use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fluxa_core::{
    BudgetDecision, ContentItem, ContentItemUpdate, ContentSource, IngestionRun, NewContentItem,
    NewRun, RunCounters, RunOutcome, RunStatus, SourceHealth,
};
use serde_json::Value as JsonValue;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{IngestionStore, StoreError};

#[derive(Debug, Default)]
struct State {
    sources: Vec<ContentSource>,
    config: HashMap<String, JsonValue>,
    runs: Vec<IngestionRun>,
    health: HashMap<Uuid, SourceHealth>,
    items: Vec<ContentItem>,
    categories: HashMap<String, Uuid>,
    item_categories: BTreeSet<(Uuid, Uuid)>,
    budgets: HashMap<(String, NaiveDate), u32>,
    rejected_titles: Vec<String>,
}

/// Process-local store used by tests and `--dry-run` invocations.
///
/// All state sits behind one async mutex, so every trait call (including
/// `consume_budget`) is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_source(&self, source: ContentSource) -> ContentSource {
        let mut state = self.state.lock().await;
        state.sources.retain(|s| s.key != source.key);
        state.sources.push(source.clone());
        source
    }

    pub async fn set_config(&self, key: impl Into<String>, value: JsonValue) {
        self.state.lock().await.config.insert(key.into(), value);
    }

    pub async fn add_category(&self, slug: impl Into<String>) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().await.categories.insert(slug.into(), id);
        id
    }

    /// Seed a historical run, e.g. a prior completion for cadence checks.
    pub async fn insert_run(&self, run: IngestionRun) {
        self.state.lock().await.runs.push(run);
    }

    /// Make every insert of an item with this title fail.
    pub async fn reject_inserts_titled(&self, title: impl Into<String>) {
        self.state.lock().await.rejected_titles.push(title.into());
    }

    pub async fn items(&self) -> Vec<ContentItem> {
        self.state.lock().await.items.clone()
    }

    pub async fn runs_for(&self, source_id: Uuid) -> Vec<IngestionRun> {
        self.state
            .lock()
            .await
            .runs
            .iter()
            .filter(|r| r.source_id == source_id)
            .cloned()
            .collect()
    }

    pub async fn health_for(&self, source_id: Uuid) -> Option<SourceHealth> {
        self.state.lock().await.health.get(&source_id).cloned()
    }

    pub async fn categories_of(&self, item_id: Uuid) -> Vec<Uuid> {
        self.state
            .lock()
            .await
            .item_categories
            .iter()
            .filter(|(item, _)| *item == item_id)
            .map(|(_, category)| *category)
            .collect()
    }

    pub async fn budget_used(&self, source_key: &str, day: NaiveDate) -> u32 {
        self.state
            .lock()
            .await
            .budgets
            .get(&(source_key.to_string(), day))
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl IngestionStore for MemoryStore {
    async fn source_by_key(&self, key: &str) -> Result<Option<ContentSource>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sources.iter().find(|s| s.key == key).cloned())
    }

    async fn active_sources(&self) -> Result<Vec<ContentSource>, StoreError> {
        let state = self.state.lock().await;
        let mut out: Vec<_> = state.sources.iter().filter(|s| s.is_active).cloned().collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(out)
    }

    async fn upsert_source(&self, source: &ContentSource) -> Result<ContentSource, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.sources.iter_mut().find(|s| s.key == source.key) {
            existing.name = source.name.clone();
            existing.is_active = source.is_active;
            existing.config = source.config.clone();
            return Ok(existing.clone());
        }
        state.sources.push(source.clone());
        Ok(source.clone())
    }

    async fn config_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        Ok(self.state.lock().await.config.get(key).cloned())
    }

    async fn last_successful_run(
        &self,
        source_id: Uuid,
    ) -> Result<Option<IngestionRun>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .runs
            .iter()
            .filter(|r| r.source_id == source_id && r.status == RunStatus::Completed)
            .filter(|r| r.completed_at.is_some())
            .max_by_key(|r| r.completed_at)
            .cloned())
    }

    async fn create_run(&self, run: NewRun) -> Result<IngestionRun, StoreError> {
        let record = IngestionRun {
            id: Uuid::new_v4(),
            source_id: run.source_id,
            status: run.status,
            skip_reason: run.skip_reason,
            error_message: None,
            counters: RunCounters::default(),
            started_at: run.started_at,
            completed_at: run.completed_at,
        };
        self.state.lock().await.runs.push(record.clone());
        Ok(record)
    }

    async fn finish_run(&self, run_id: Uuid, outcome: RunOutcome) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "ingestion run",
                id: run_id.to_string(),
            })?;
        run.status = outcome.status;
        run.skip_reason = outcome.skip_reason;
        run.error_message = outcome.error_message;
        run.counters = outcome.counters;
        run.completed_at = Some(outcome.completed_at);
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StoreError> {
        let state = self.state.lock().await;
        let mut runs = state.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn upsert_source_health(&self, health: SourceHealth) -> Result<(), StoreError> {
        self.state.lock().await.health.insert(health.source_id, health);
        Ok(())
    }

    async fn source_health(&self) -> Result<Vec<SourceHealth>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<_> = state.health.values().cloned().collect();
        rows.sort_by(|a, b| a.source_key.cmp(&b.source_key));
        Ok(rows)
    }

    async fn content_hash_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let state = self.state.lock().await;
        Ok(state.items.iter().any(|i| i.content_hash == content_hash))
    }

    async fn item_id_by_external_id(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .items
            .iter()
            .find(|i| i.source_id == source_id && i.external_id.as_deref() == Some(external_id))
            .map(|i| i.id))
    }

    async fn update_item(&self, item_id: Uuid, update: ContentItemUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let item = state
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "content item",
                id: item_id.to_string(),
            })?;
        item.excerpt = update.excerpt;
        item.image_url = update.image_url;
        item.raw_data = update.raw_data;
        item.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_item(&self, item: NewContentItem) -> Result<Uuid, StoreError> {
        let mut state = self.state.lock().await;
        if state.rejected_titles.iter().any(|t| *t == item.title) {
            return Err(StoreError::Rejected(format!(
                "insert refused for `{}`",
                item.title
            )));
        }
        if state.items.iter().any(|i| i.content_hash == item.content_hash) {
            return Err(StoreError::Conflict(format!(
                "content_hash {}",
                item.content_hash
            )));
        }
        if let Some(external_id) = &item.external_id {
            if state.items.iter().any(|i| {
                i.source_id == item.source_id && i.external_id.as_ref() == Some(external_id)
            }) {
                return Err(StoreError::Conflict(format!("external_id {external_id}")));
            }
        }

        let now = Utc::now();
        let id = Uuid::new_v4();
        state.items.push(ContentItem {
            id,
            source_id: item.source_id,
            external_id: item.external_id,
            content_hash: item.content_hash,
            title: item.title,
            source_url: item.source_url,
            excerpt: item.excerpt,
            published_at: item.published_at,
            image_url: item.image_url,
            raw_data: item.raw_data,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn category_ids(&self, slugs: &[String]) -> Result<Vec<Uuid>, StoreError> {
        let state = self.state.lock().await;
        Ok(slugs
            .iter()
            .filter_map(|slug| state.categories.get(slug).copied())
            .collect())
    }

    async fn link_categories(
        &self,
        item_id: Uuid,
        category_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !state.items.iter().any(|i| i.id == item_id) {
            return Err(StoreError::NotFound {
                entity: "content item",
                id: item_id.to_string(),
            });
        }
        for category_id in category_ids {
            state.item_categories.insert((item_id, *category_id));
        }
        Ok(())
    }

    async fn consume_budget(
        &self,
        source_key: &str,
        day: NaiveDate,
        ceiling: u32,
    ) -> Result<BudgetDecision, StoreError> {
        let mut state = self.state.lock().await;
        let used = state
            .budgets
            .entry((source_key.to_string(), day))
            .or_insert(0);
        if *used >= ceiling {
            return Ok(BudgetDecision::Exceeded { ceiling });
        }
        *used += 1;
        Ok(BudgetDecision::Allowed {
            used: *used,
            ceiling,
        })
    }
}
