use std::sync::Arc;

use chrono::{DateTime, Utc};
use fluxa_adapters::{
    default_registry, AdapterContext, AdapterRegistry, AdapterSettings, Credentials,
    API_SPORTS_KEY,
};
use fluxa_core::{
    BudgetDecision, ContentItemUpdate, ContentSource, EffectiveConfig, IngestOptions,
    IngestionResult, NewContentItem, NewRun, NormalizedItem, RunCounters, RunOutcome, RunStatus,
    SkipReason, SourceHealth,
};
use fluxa_storage::{HttpFetcher, IngestionStore};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{resolve_effective_config, IngestConfig};
use crate::hash::{canonical_published_time, category_slugs, content_hash};
use crate::IngestError;

/// Sources whose provider charges per call; each fetch spends daily budget.
pub fn is_budget_gated(source_key: &str) -> bool {
    source_key == API_SPORTS_KEY
}

/// How a run that got past the early gates ended, short of an error.
enum Execution {
    Completed,
    BudgetExceeded { ceiling: u32 },
}

/// Runs ingestion for one source at a time against a store and a registry.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<dyn IngestionStore>,
    registry: Arc<AdapterRegistry>,
    http: Arc<HttpFetcher>,
    credentials: Credentials,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn IngestionStore>,
        registry: Arc<AdapterRegistry>,
        http: Arc<HttpFetcher>,
        credentials: Credentials,
    ) -> Self {
        Self {
            store,
            registry,
            http,
            credentials,
        }
    }

    /// Default registry, credentials from the environment, HTTP settings from `config`.
    pub fn from_config(
        store: Arc<dyn IngestionStore>,
        config: &IngestConfig,
    ) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        Ok(Self::new(
            store,
            Arc::new(default_registry()),
            Arc::new(http),
            Credentials::from_env(),
        ))
    }

    pub fn store(&self) -> &Arc<dyn IngestionStore> {
        &self.store
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Ingest one source. Every failure comes back as a structured result;
    /// runs that get past source lookup always leave a terminal run record.
    pub async fn run_ingestion(&self, source_key: &str, options: IngestOptions) -> IngestionResult {
        let clock = options.fetched_at.unwrap_or_else(Utc::now);
        let span = info_span!("ingest_source", source_key, force = options.force);
        self.run_source(source_key, options.force, clock)
            .instrument(span)
            .await
    }

    async fn run_source(&self, source_key: &str, force: bool, clock: DateTime<Utc>) -> IngestionResult {
        let source = match self.store.source_by_key(source_key).await {
            Ok(Some(source)) => source,
            Ok(None) => {
                let err = IngestError::SourceNotFound(source_key.to_string());
                warn!(error = %err, "cannot ingest");
                return IngestionResult::failed(None, RunCounters::default(), err.to_string());
            }
            Err(err) => {
                let err = IngestError::SourceLoad {
                    source_key: source_key.to_string(),
                    source: err,
                };
                error!(error = %err, "cannot ingest");
                return IngestionResult::failed(None, RunCounters::default(), err.to_string());
            }
        };

        if !source.is_active {
            return self.skip_disabled(&source).await;
        }

        let config = resolve_effective_config(self.store.as_ref(), &source).await;
        debug!(?config, "resolved effective config");

        if !force && self.within_cadence(&source, &config, clock).await {
            return self.skip_cadence(&source).await;
        }

        let run = match self
            .store
            .create_run(NewRun {
                source_id: source.id,
                status: RunStatus::Running,
                skip_reason: None,
                started_at: Utc::now(),
                completed_at: None,
            })
            .await
        {
            Ok(run) => run,
            Err(err) => {
                error!(error = %err, "failed to create run record");
                return IngestionResult::failed(
                    None,
                    RunCounters::default(),
                    format!("failed to create run record: {err}"),
                );
            }
        };

        let mut counters = RunCounters::default();
        let execution = self
            .execute(&source, &config, run.id, clock, &mut counters)
            .await;

        match execution {
            Ok(Execution::Completed) => {
                self.finish(run.id, RunStatus::Completed, None, None, counters)
                    .await;
                self.record_health(&source, run.id, true, counters.items_created, None)
                    .await;
                info!(
                    run_id = %run.id,
                    fetched = counters.items_fetched,
                    created = counters.items_created,
                    skipped = counters.items_skipped,
                    updated = counters.items_updated,
                    "ingestion completed"
                );
                IngestionResult::completed(run.id, counters)
            }
            Ok(Execution::BudgetExceeded { ceiling }) => {
                let message = format!("daily budget of {ceiling} calls exhausted for `{}`", source.key);
                warn!(run_id = %run.id, ceiling, "daily budget exhausted");
                self.finish(
                    run.id,
                    RunStatus::Skipped,
                    Some(SkipReason::BudgetExceeded),
                    None,
                    RunCounters::default(),
                )
                .await;
                self.record_health(&source, run.id, false, 0, Some(message.clone()))
                    .await;
                IngestionResult::skipped(run.id, false, SkipReason::BudgetExceeded).with_error(message)
            }
            Err(err) => {
                let message = err.to_string();
                error!(run_id = %run.id, error = %message, "ingestion failed");
                self.finish(
                    run.id,
                    RunStatus::Failed,
                    None,
                    Some(message.clone()),
                    counters,
                )
                .await;
                self.record_health(
                    &source,
                    run.id,
                    false,
                    counters.items_created,
                    Some(message.clone()),
                )
                .await;
                IngestionResult::failed(Some(run.id), counters, message)
            }
        }
    }

    async fn execute(
        &self,
        source: &ContentSource,
        config: &EffectiveConfig,
        run_id: Uuid,
        clock: DateTime<Utc>,
        counters: &mut RunCounters,
    ) -> Result<Execution, IngestError> {
        let settings = AdapterSettings {
            source_key: source.key.clone(),
            source_config: source.config.clone(),
            max_items_per_run: config.max_items_per_run,
            credentials: self.credentials.clone(),
            http: Arc::clone(&self.http),
        };
        let adapter = self.registry.build(&settings)?;
        let ctx = AdapterContext {
            run_id,
            fetched_at: clock,
        };

        let raw = adapter.fetch(&ctx).await?;

        if is_budget_gated(&source.key) {
            match self
                .store
                .consume_budget(&source.key, clock.date_naive(), config.daily_budget)
                .await?
            {
                BudgetDecision::Allowed { used, ceiling } => {
                    debug!(used, ceiling, "budget call consumed");
                }
                BudgetDecision::Exceeded { ceiling } => {
                    return Ok(Execution::BudgetExceeded { ceiling });
                }
            }
        }

        let items = adapter.parse(&raw)?;
        counters.items_fetched = u32::try_from(items.len()).unwrap_or(u32::MAX);

        for item in items.into_iter().take(config.max_items_per_run) {
            self.ingest_item(source, item, clock, counters).await?;
        }
        Ok(Execution::Completed)
    }

    async fn ingest_item(
        &self,
        source: &ContentSource,
        item: NormalizedItem,
        clock: DateTime<Utc>,
        counters: &mut RunCounters,
    ) -> Result<(), IngestError> {
        let published_at = canonical_published_time(item.published_at, clock);
        let hash = content_hash(&item.title, &source.key, published_at, clock);

        if self.store.content_hash_exists(&hash).await? {
            counters.items_skipped += 1;
            return Ok(());
        }

        if let Some(external_id) = item.external_id.as_deref() {
            if let Some(item_id) = self
                .store
                .item_id_by_external_id(source.id, external_id)
                .await?
            {
                let update = ContentItemUpdate {
                    excerpt: item.excerpt,
                    image_url: item.image_url,
                    raw_data: item.raw_data,
                };
                match self.store.update_item(item_id, update).await {
                    Ok(()) => counters.items_updated += 1,
                    Err(err) => {
                        warn!(%item_id, external_id, error = %err, "failed to update content item");
                    }
                }
                return Ok(());
            }
        }

        let item_id = self
            .store
            .insert_item(NewContentItem {
                source_id: source.id,
                external_id: item.external_id,
                content_hash: hash,
                title: item.title.clone(),
                source_url: item.source_url,
                excerpt: item.excerpt,
                published_at,
                image_url: item.image_url,
                raw_data: item.raw_data,
            })
            .await
            .map_err(|err| IngestError::Insert {
                title: item.title,
                source: err,
            })?;

        if let Some(categories) = item.categories.filter(|c| !c.is_empty()) {
            self.link_categories(item_id, &categories).await;
        }
        counters.items_created += 1;
        Ok(())
    }

    async fn link_categories(&self, item_id: Uuid, names: &[String]) {
        let slugs = category_slugs(names);
        let ids = match self.store.category_ids(&slugs).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(%item_id, error = %err, "failed to resolve categories");
                return;
            }
        };
        if ids.is_empty() {
            debug!(%item_id, ?slugs, "no known categories");
            return;
        }
        if let Err(err) = self.store.link_categories(item_id, &ids).await {
            warn!(%item_id, error = %err, "failed to link categories");
        }
    }

    async fn within_cadence(
        &self,
        source: &ContentSource,
        config: &EffectiveConfig,
        clock: DateTime<Utc>,
    ) -> bool {
        let last = match self.store.last_successful_run(source.id).await {
            Ok(last) => last,
            Err(err) => {
                warn!(error = %err, "cadence lookup failed; running anyway");
                return false;
            }
        };
        let Some(completed_at) = last.and_then(|run| run.completed_at) else {
            return false;
        };
        let elapsed_hours = (clock - completed_at).num_milliseconds() as f64 / 3_600_000.0;
        elapsed_hours < config.refresh_hours
    }

    async fn skip_disabled(&self, source: &ContentSource) -> IngestionResult {
        let message = format!("source `{}` is disabled", source.key);
        info!("source disabled; skipping");
        let Some(run_id) = self.record_skip(source, SkipReason::Disabled).await else {
            return IngestionResult::failed(None, RunCounters::default(), message);
        };
        self.record_health(source, run_id, false, 0, Some(message.clone()))
            .await;
        IngestionResult::skipped(run_id, false, SkipReason::Disabled).with_error(message)
    }

    async fn skip_cadence(&self, source: &ContentSource) -> IngestionResult {
        info!("refresh window not elapsed; skipping");
        match self.record_skip(source, SkipReason::Cadence).await {
            Some(run_id) => {
                self.record_health(source, run_id, true, 0, None).await;
                IngestionResult::skipped(run_id, true, SkipReason::Cadence)
            }
            None => IngestionResult {
                success: true,
                run_id: None,
                items_fetched: 0,
                items_created: 0,
                items_skipped: 0,
                items_updated: 0,
                error: None,
                skipped_reason: Some(SkipReason::Cadence),
            },
        }
    }

    /// Writes a run that is terminal from the start.
    async fn record_skip(&self, source: &ContentSource, reason: SkipReason) -> Option<Uuid> {
        let now = Utc::now();
        match self
            .store
            .create_run(NewRun {
                source_id: source.id,
                status: RunStatus::Skipped,
                skip_reason: Some(reason),
                started_at: now,
                completed_at: Some(now),
            })
            .await
        {
            Ok(run) => Some(run.id),
            Err(err) => {
                error!(reason = %reason, error = %err, "failed to record skipped run");
                None
            }
        }
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        skip_reason: Option<SkipReason>,
        error_message: Option<String>,
        counters: RunCounters,
    ) {
        let outcome = RunOutcome {
            status,
            skip_reason,
            error_message,
            counters,
            completed_at: Utc::now(),
        };
        if let Err(err) = self.store.finish_run(run_id, outcome).await {
            error!(%run_id, %status, error = %err, "failed to record run outcome");
        }
    }

    async fn record_health(
        &self,
        source: &ContentSource,
        run_id: Uuid,
        success: bool,
        items_created: u32,
        last_error: Option<String>,
    ) {
        let health = SourceHealth {
            source_id: source.id,
            source_key: source.key.clone(),
            last_run_id: Some(run_id),
            success,
            items_created,
            last_error,
            checked_at: Utc::now(),
        };
        if let Err(err) = self.store.upsert_source_health(health).await {
            error!(%run_id, error = %err, "failed to record source health");
        }
    }
}
