//! Core domain model for Fluxa content ingestion.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub const CRATE_NAME: &str = "fluxa-core";

/// External content provider, provisioned out-of-band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentSource {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub is_active: bool,
    /// Free-form provider settings; may also override ingestion tunables.
    pub config: JsonValue,
    pub created_at: DateTime<Utc>,
}

impl ContentSource {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            name: name.into(),
            is_active: true,
            config: JsonValue::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: JsonValue) -> Self {
        self.config = config;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Skipped
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "skipped" => Ok(RunStatus::Skipped),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    Cadence,
    BudgetExceeded,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Disabled => "disabled",
            SkipReason::Cadence => "cadence",
            SkipReason::BudgetExceeded => "budget_exceeded",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkipReason {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "disabled" => Ok(SkipReason::Disabled),
            "cadence" => Ok(SkipReason::Cadence),
            "budget_exceeded" => Ok(SkipReason::BudgetExceeded),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown variant `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub items_fetched: u32,
    pub items_created: u32,
    pub items_skipped: u32,
    pub items_updated: u32,
}

/// One attempted ingestion for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: RunStatus,
    pub skip_reason: Option<SkipReason>,
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Initial write for a run record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub source_id: Uuid,
    pub status: RunStatus,
    pub skip_reason: Option<SkipReason>,
    pub started_at: DateTime<Utc>,
    /// Set when the run is recorded already terminal (gating skips).
    pub completed_at: Option<DateTime<Utc>>,
}

/// Terminal update for a run record.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub skip_reason: Option<SkipReason>,
    pub error_message: Option<String>,
    pub counters: RunCounters,
    pub completed_at: DateTime<Utc>,
}

/// Adapter output handed to the ingestion runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedItem {
    pub title: String,
    pub source_url: String,
    pub external_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub raw_data: Option<JsonValue>,
    pub categories: Option<Vec<String>>,
}

/// Persisted, deduplicated content unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub source_id: Uuid,
    pub external_id: Option<String>,
    pub content_hash: String,
    pub title: String,
    pub source_url: String,
    pub excerpt: Option<String>,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub raw_data: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewContentItem {
    pub source_id: Uuid,
    pub external_id: Option<String>,
    pub content_hash: String,
    pub title: String,
    pub source_url: String,
    pub excerpt: Option<String>,
    pub published_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub raw_data: Option<JsonValue>,
}

/// Mutable subset refreshed when an external id reappears.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentItemUpdate {
    pub excerpt: Option<String>,
    pub image_url: Option<String>,
    pub raw_data: Option<JsonValue>,
}

/// Latest-run rollup, one row per source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceHealth {
    pub source_id: Uuid,
    pub source_key: String,
    pub last_run_id: Option<Uuid>,
    pub success: bool,
    pub items_created: u32,
    pub last_error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BudgetDecision {
    Allowed { used: u32, ceiling: u32 },
    Exceeded { ceiling: u32 },
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed { .. })
    }
}

/// Tunables resolved once per invocation and passed down explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub refresh_hours: f64,
    pub max_items_per_run: usize,
    pub daily_budget: u32,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            refresh_hours: 3.0,
            max_items_per_run: 100,
            daily_budget: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub force: bool,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl IngestOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            fetched_at: None,
        }
    }

    pub fn at(mut self, fetched_at: DateTime<Utc>) -> Self {
        self.fetched_at = Some(fetched_at);
        self
    }
}

/// Structured outcome of one `run_ingestion` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionResult {
    pub success: bool,
    pub run_id: Option<Uuid>,
    pub items_fetched: u32,
    pub items_created: u32,
    pub items_skipped: u32,
    pub items_updated: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped_reason: Option<SkipReason>,
}

impl IngestionResult {
    pub fn failed(run_id: Option<Uuid>, counters: RunCounters, error: impl Into<String>) -> Self {
        Self::from_counters(false, run_id, counters).with_error(error)
    }

    pub fn skipped(run_id: Uuid, success: bool, reason: SkipReason) -> Self {
        Self {
            skipped_reason: Some(reason),
            ..Self::from_counters(success, Some(run_id), RunCounters::default())
        }
    }

    pub fn completed(run_id: Uuid, counters: RunCounters) -> Self {
        Self::from_counters(true, Some(run_id), counters)
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn counters(&self) -> RunCounters {
        RunCounters {
            items_fetched: self.items_fetched,
            items_created: self.items_created,
            items_skipped: self.items_skipped,
            items_updated: self.items_updated,
        }
    }

    fn from_counters(success: bool, run_id: Option<Uuid>, counters: RunCounters) -> Self {
        Self {
            success,
            run_id,
            items_fetched: counters.items_fetched,
            items_created: counters.items_created,
            items_skipped: counters.items_skipped,
            items_updated: counters.items_updated,
            error: None,
            skipped_reason: None,
        }
    }
}
