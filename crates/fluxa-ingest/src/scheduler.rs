use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::runner::Ingestor;

/// Cron-driven orchestration. `None` when the scheduler is switched off.
pub async fn maybe_build_scheduler(
    ingestor: Arc<Ingestor>,
    config: &IngestConfig,
) -> Result<Option<JobScheduler>> {
    if !config.scheduler_enabled {
        return Ok(None);
    }

    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let cron = config.ingest_cron.as_str();
    let job = Job::new_async(cron, move |_uuid, _l| {
        let ingestor = Arc::clone(&ingestor);
        Box::pin(async move {
            let summary = ingestor.orchestrate_ingestion(false, None).await;
            if summary.success {
                info!(
                    sources_run = summary.sources_run.len(),
                    sources_skipped = summary.sources_skipped.len(),
                    "scheduled ingestion finished"
                );
            } else {
                warn!(errors = ?summary.errors, "scheduled ingestion failed");
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(cron, "ingestion scheduler configured");
    Ok(Some(sched))
}
