use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fluxa_adapters::{AdapterError, API_SPORTS_KEY};
use fluxa_core::{IngestOptions, IngestionResult, SkipReason};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::runner::Ingestor;

/// Retired provider keys; rows may linger in the store but are never run.
pub const DEPRECATED_SOURCE_KEYS: [&str; 2] = ["sportsdata-io", "newsapi-legacy"];

/// Sources with this key prefix run before everything else.
pub const PREFERRED_SOURCE_PREFIX: &str = API_SPORTS_KEY;

pub const SLOW_RUN_WARNING: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source_key: String,
    #[serde(flatten)]
    pub result: IngestionResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationSummary {
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub sources_processed: usize,
    pub sources_run: Vec<String>,
    pub sources_skipped: Vec<String>,
    pub results: Vec<SourceOutcome>,
    pub errors: Vec<String>,
    pub execution_time_ms: u64,
}

pub fn is_deprecated(source_key: &str) -> bool {
    DEPRECATED_SOURCE_KEYS.contains(&source_key)
}

impl Ingestor {
    /// Run every active, non-deprecated source (or just `source_filter`) in
    /// sequence and fold the outcomes into one summary.
    pub async fn orchestrate_ingestion(
        &self,
        force: bool,
        source_filter: Option<&str>,
    ) -> OrchestrationSummary {
        let span = info_span!("orchestrate", force, source = source_filter.unwrap_or("*"));
        self.orchestrate(force, source_filter).instrument(span).await
    }

    async fn orchestrate(&self, force: bool, source_filter: Option<&str>) -> OrchestrationSummary {
        let started = Instant::now();
        let timestamp = Utc::now();
        let mut summary = OrchestrationSummary {
            success: false,
            timestamp,
            sources_processed: 0,
            sources_run: Vec::new(),
            sources_skipped: Vec::new(),
            results: Vec::new(),
            errors: Vec::new(),
            execution_time_ms: 0,
        };

        let mut sources = match self.store().active_sources().await {
            Ok(sources) => sources,
            Err(err) => {
                error!(error = %err, "failed to list active sources");
                summary.errors.push(format!("failed to list active sources: {err}"));
                summary.execution_time_ms = elapsed_ms(started);
                return summary;
            }
        };
        sources.retain(|s| source_filter.map_or(true, |key| s.key == key));
        sources.retain(|s| {
            let deprecated = is_deprecated(&s.key);
            if deprecated {
                info!(source_key = %s.key, "skipping deprecated source");
            }
            !deprecated
        });
        sources.sort_by_key(|s| !s.key.starts_with(PREFERRED_SOURCE_PREFIX));

        summary.sources_processed = sources.len();
        for source in &sources {
            if !self.registry().contains(&source.key) {
                let err = AdapterError::UnknownSource(source.key.clone());
                warn!(source_key = %source.key, error = %err, "cannot hand source to runner");
                summary.errors.push(format!("{}: {err}", source.key));
                continue;
            }

            let result = self
                .run_ingestion(&source.key, IngestOptions { force, fetched_at: None })
                .await;

            if result.success && result.skipped_reason.is_none() {
                summary.sources_run.push(source.key.clone());
            } else if result.success && result.skipped_reason == Some(SkipReason::Cadence) {
                summary.sources_skipped.push(source.key.clone());
            } else {
                let message = result.error.as_deref().unwrap_or("ingestion failed");
                summary.errors.push(format!("{}: {message}", source.key));
            }
            summary.results.push(SourceOutcome {
                source_key: source.key.clone(),
                result,
            });
        }

        summary.success = summary.errors.is_empty() || !summary.sources_run.is_empty();
        let elapsed = started.elapsed();
        summary.execution_time_ms = elapsed_ms(started);
        if elapsed > SLOW_RUN_WARNING {
            warn!(
                execution_time_ms = summary.execution_time_ms,
                sources = summary.sources_processed,
                "orchestration exceeded five minutes"
            );
        }
        info!(
            success = summary.success,
            run = summary.sources_run.len(),
            skipped = summary.sources_skipped.len(),
            errors = summary.errors.len(),
            execution_time_ms = summary.execution_time_ms,
            "orchestration finished"
        );
        summary
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
