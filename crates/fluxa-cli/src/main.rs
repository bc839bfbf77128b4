use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use fluxa_core::IngestOptions;
use fluxa_ingest::scheduler::maybe_build_scheduler;
use fluxa_ingest::seed::{load_source_registry, seed_sources};
use fluxa_ingest::{IngestConfig, Ingestor};
use fluxa_storage::{IngestionStore, MemoryStore, PgStore};
use fluxa_web::AppState;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "fluxa")]
#[command(about = "Fluxa content ingestion command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Ingest a single source.
    Ingest {
        #[arg(long)]
        source: String,
        /// Ignore the refresh window. Budget limits still apply.
        #[arg(long)]
        force: bool,
        /// Pin the run clock (RFC 3339).
        #[arg(long)]
        at: Option<DateTime<Utc>>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Ingest every active source in turn.
    Orchestrate {
        #[arg(long)]
        force: bool,
        #[arg(long)]
        source: Option<String>,
        #[command(flatten)]
        store: StoreArgs,
    },
    /// Serve the HTTP API and, when enabled, the cron scheduler.
    Serve,
    Migrate,
    /// Upsert sources from a YAML registry.
    SeedSources {
        #[arg(long, default_value = "sources.yaml")]
        file: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct StoreArgs {
    /// Use an in-memory store seeded from `--sources` instead of Postgres.
    #[arg(long)]
    dry_run: bool,
    #[arg(long, default_value = "sources.yaml")]
    sources: PathBuf,
}

impl Default for StoreArgs {
    fn default() -> Self {
        Self {
            dry_run: false,
            sources: PathBuf::from("sources.yaml"),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FLUXA_LOG_JSON")
        .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(false);
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn open_store(config: &IngestConfig, args: &StoreArgs) -> Result<Arc<dyn IngestionStore>> {
    if args.dry_run {
        let store = MemoryStore::new();
        let registry = load_source_registry(&args.sources).await?;
        seed_sources(&store, &registry).await?;
        info!(sources = registry.sources.len(), "dry run against in-memory store");
        return Ok(Arc::new(store));
    }
    let store = PgStore::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    Ok(Arc::new(store))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serializing output")?
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command.unwrap_or(Commands::Orchestrate {
        force: false,
        source: None,
        store: StoreArgs::default(),
    }) {
        Commands::Ingest {
            source,
            force,
            at,
            store,
        } => {
            let store = open_store(&config, &store).await?;
            let ingestor = Ingestor::from_config(store, &config)?;
            let result = ingestor
                .run_ingestion(&source, IngestOptions { force, fetched_at: at })
                .await;
            print_json(&result)?;
            if !result.success {
                bail!("ingestion of {source} did not succeed");
            }
        }
        Commands::Orchestrate {
            force,
            source,
            store,
        } => {
            let store = open_store(&config, &store).await?;
            let ingestor = Ingestor::from_config(store, &config)?;
            let summary = ingestor.orchestrate_ingestion(force, source.as_deref()).await;
            print_json(&summary)?;
            if !summary.success {
                bail!("orchestration finished with {} error(s)", summary.errors.len());
            }
        }
        Commands::Serve => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let ingestor = Arc::new(Ingestor::from_config(Arc::new(store), &config)?);
            let scheduler = maybe_build_scheduler(Arc::clone(&ingestor), &config).await?;
            if let Some(scheduler) = &scheduler {
                scheduler.start().await.context("starting scheduler")?;
            }
            fluxa_web::serve(AppState::from_config(ingestor, &config), config.web_port).await?;
        }
        Commands::Migrate => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            store.migrate().await.context("running migrations")?;
            info!("migrations applied");
        }
        Commands::SeedSources { file } => {
            let store = PgStore::connect(&config.database_url)
                .await
                .context("connecting to database")?;
            let registry = load_source_registry(&file).await?;
            let seeded = seed_sources(&store, &registry).await?;
            println!("seeded {} source(s) from {}", seeded.len(), file.display());
        }
    }

    Ok(())
}
