//! Ingestion core: config resolution, cadence and budget gates, content
//! hashing, the per-source runner and the multi-source orchestrator.

use fluxa_adapters::AdapterError;
use fluxa_storage::StoreError;
use thiserror::Error;

pub mod config;
pub mod hash;
mod orchestrator;
mod runner;
pub mod scheduler;
pub mod seed;

pub use config::{resolve_effective_config, IngestConfig};
pub use orchestrator::{
    is_deprecated, OrchestrationSummary, SourceOutcome, DEPRECATED_SOURCE_KEYS,
    PREFERRED_SOURCE_PREFIX,
};
pub use runner::{is_budget_gated, Ingestor};

pub const CRATE_NAME: &str = "fluxa-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("source `{0}` not found")]
    SourceNotFound(String),
    #[error("failed to load source `{source_key}`: {source}")]
    SourceLoad {
        source_key: String,
        #[source]
        source: StoreError,
    },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to insert `{title}`: {source}")]
    Insert {
        title: String,
        #[source]
        source: StoreError,
    },
}
