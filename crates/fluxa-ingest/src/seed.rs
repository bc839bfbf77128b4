use std::path::Path;

use anyhow::{Context, Result};
use fluxa_core::ContentSource;
use fluxa_storage::IngestionStore;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistryFile {
    pub sources: Vec<SourceSeed>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceSeed {
    pub key: String,
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub config: JsonValue,
}

fn default_active() -> bool {
    true
}

impl SourceSeed {
    pub fn to_source(&self) -> ContentSource {
        let config = match &self.config {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other.clone(),
        };
        let source = ContentSource::new(self.key.as_str(), self.name.as_str()).with_config(config);
        if self.active {
            source
        } else {
            source.inactive()
        }
    }
}

pub fn parse_source_registry(text: &str) -> Result<SourceRegistryFile> {
    let registry: SourceRegistryFile = serde_yaml::from_str(text).context("parsing source registry")?;
    for seed in &registry.sources {
        if seed.key.trim().is_empty() {
            anyhow::bail!("source `{}` has an empty key", seed.name);
        }
        if !matches!(seed.config, JsonValue::Null | JsonValue::Object(_)) {
            anyhow::bail!("source `{}` config must be a mapping", seed.key);
        }
    }
    Ok(registry)
}

pub async fn load_source_registry(path: &Path) -> Result<SourceRegistryFile> {
    let text = fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    parse_source_registry(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Upsert every source in the registry; existing rows keep their ids.
pub async fn seed_sources(
    store: &dyn IngestionStore,
    registry: &SourceRegistryFile,
) -> Result<Vec<ContentSource>> {
    let mut seeded = Vec::with_capacity(registry.sources.len());
    for seed in &registry.sources {
        let source = store
            .upsert_source(&seed.to_source())
            .await
            .with_context(|| format!("upserting source {}", seed.key))?;
        info!(source_key = %source.key, active = source.is_active, "seeded source");
        seeded.push(source);
    }
    Ok(seeded)
}
