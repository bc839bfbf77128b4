use async_trait::async_trait;
use chrono::NaiveDate;
use fluxa_core::{
    BudgetDecision, ContentItemUpdate, ContentSource, IngestionRun, NewContentItem, NewRun,
    RunCounters, RunOutcome, RunStatus, SkipReason, SourceHealth,
};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::{IngestionStore, StoreError};

const RUN_COLUMNS: &str = "id, source_id, status, skip_reason, error_message, items_fetched, \
     items_created, items_skipped, items_updated, started_at, completed_at";

/// Postgres-backed store.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn to_db_count(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn from_db_count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn source_from_row(row: &PgRow) -> Result<ContentSource, StoreError> {
    Ok(ContentSource {
        id: row.try_get("id")?,
        key: row.try_get("key")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        config: row.try_get("config")?,
        created_at: row.try_get("created_at")?,
    })
}

fn run_from_row(row: &PgRow) -> Result<IngestionRun, StoreError> {
    let status: String = row.try_get("status")?;
    let skip_reason: Option<String> = row.try_get("skip_reason")?;
    Ok(IngestionRun {
        id: row.try_get("id")?,
        source_id: row.try_get("source_id")?,
        status: status
            .parse::<RunStatus>()
            .map_err(|e| StoreError::Corrupt(format!("ingestion_runs.status: {e}")))?,
        skip_reason: skip_reason
            .map(|s| s.parse::<SkipReason>())
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("ingestion_runs.skip_reason: {e}")))?,
        error_message: row.try_get("error_message")?,
        counters: RunCounters {
            items_fetched: from_db_count(row.try_get("items_fetched")?),
            items_created: from_db_count(row.try_get("items_created")?),
            items_skipped: from_db_count(row.try_get("items_skipped")?),
            items_updated: from_db_count(row.try_get("items_updated")?),
        },
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn health_from_row(row: &PgRow) -> Result<SourceHealth, StoreError> {
    Ok(SourceHealth {
        source_id: row.try_get("source_id")?,
        source_key: row.try_get("source_key")?,
        last_run_id: row.try_get("last_run_id")?,
        success: row.try_get("success")?,
        items_created: from_db_count(row.try_get("items_created")?),
        last_error: row.try_get("last_error")?,
        checked_at: row.try_get("checked_at")?,
    })
}

#[async_trait]
impl IngestionStore for PgStore {
    async fn source_by_key(&self, key: &str) -> Result<Option<ContentSource>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, key, name, is_active, config, created_at
              FROM content_sources
             WHERE key = $1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(source_from_row).transpose()
    }

    async fn active_sources(&self) -> Result<Vec<ContentSource>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, key, name, is_active, config, created_at
              FROM content_sources
             WHERE is_active
             ORDER BY key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(source_from_row).collect()
    }

    async fn upsert_source(&self, source: &ContentSource) -> Result<ContentSource, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO content_sources (id, key, name, is_active, config)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE
               SET name = EXCLUDED.name,
                   is_active = EXCLUDED.is_active,
                   config = EXCLUDED.config
            RETURNING id, key, name, is_active, config, created_at
            "#,
        )
        .bind(source.id)
        .bind(&source.key)
        .bind(&source.name)
        .bind(source.is_active)
        .bind(&source.config)
        .fetch_one(&self.pool)
        .await?;
        source_from_row(&row)
    }

    async fn config_value(&self, key: &str) -> Result<Option<JsonValue>, StoreError> {
        let value = sqlx::query_scalar::<_, JsonValue>("SELECT value FROM app_config WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn last_successful_run(
        &self,
        source_id: Uuid,
    ) -> Result<Option<IngestionRun>, StoreError> {
        let sql = format!(
            "SELECT {RUN_COLUMNS} FROM ingestion_runs \
              WHERE source_id = $1 AND status = 'completed' AND completed_at IS NOT NULL \
              ORDER BY completed_at DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(source_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn create_run(&self, run: NewRun) -> Result<IngestionRun, StoreError> {
        let sql = format!(
            "INSERT INTO ingestion_runs (source_id, status, skip_reason, started_at, completed_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {RUN_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(run.source_id)
            .bind(run.status.as_str())
            .bind(run.skip_reason.map(|r| r.as_str()))
            .bind(run.started_at)
            .bind(run.completed_at)
            .fetch_one(&self.pool)
            .await?;
        run_from_row(&row)
    }

    async fn finish_run(&self, run_id: Uuid, outcome: RunOutcome) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE ingestion_runs
               SET status = $2,
                   skip_reason = $3,
                   error_message = $4,
                   items_fetched = $5,
                   items_created = $6,
                   items_skipped = $7,
                   items_updated = $8,
                   completed_at = $9
             WHERE id = $1
            "#,
        )
        .bind(run_id)
        .bind(outcome.status.as_str())
        .bind(outcome.skip_reason.map(|r| r.as_str()))
        .bind(outcome.error_message)
        .bind(to_db_count(outcome.counters.items_fetched))
        .bind(to_db_count(outcome.counters.items_created))
        .bind(to_db_count(outcome.counters.items_skipped))
        .bind(to_db_count(outcome.counters.items_updated))
        .bind(outcome.completed_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "ingestion run",
                id: run_id.to_string(),
            });
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM ingestion_runs ORDER BY started_at DESC LIMIT $1");
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(run_from_row).collect()
    }

    async fn upsert_source_health(&self, health: SourceHealth) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO source_health
                (source_id, source_key, last_run_id, success, items_created, last_error, checked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_id) DO UPDATE
               SET source_key = EXCLUDED.source_key,
                   last_run_id = EXCLUDED.last_run_id,
                   success = EXCLUDED.success,
                   items_created = EXCLUDED.items_created,
                   last_error = EXCLUDED.last_error,
                   checked_at = EXCLUDED.checked_at
            "#,
        )
        .bind(health.source_id)
        .bind(&health.source_key)
        .bind(health.last_run_id)
        .bind(health.success)
        .bind(to_db_count(health.items_created))
        .bind(&health.last_error)
        .bind(health.checked_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn source_health(&self) -> Result<Vec<SourceHealth>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT source_id, source_key, last_run_id, success, items_created, last_error, checked_at
              FROM source_health
             ORDER BY source_key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(health_from_row).collect()
    }

    async fn content_hash_exists(&self, content_hash: &str) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM content_items WHERE content_hash = $1)",
        )
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn item_id_by_external_id(
        &self,
        source_id: Uuid,
        external_id: &str,
    ) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM content_items WHERE source_id = $1 AND external_id = $2",
        )
        .bind(source_id)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn update_item(&self, item_id: Uuid, update: ContentItemUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE content_items
               SET excerpt = $2,
                   image_url = $3,
                   raw_data = $4,
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(item_id)
        .bind(update.excerpt)
        .bind(update.image_url)
        .bind(update.raw_data)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "content item",
                id: item_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_item(&self, item: NewContentItem) -> Result<Uuid, StoreError> {
        let id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO content_items
                (source_id, external_id, content_hash, title, source_url,
                 excerpt, published_at, image_url, raw_data)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(item.source_id)
        .bind(item.external_id)
        .bind(&item.content_hash)
        .bind(item.title)
        .bind(item.source_url)
        .bind(item.excerpt)
        .bind(item.published_at)
        .bind(item.image_url)
        .bind(item.raw_data)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::Conflict(format!("content item {}: {db}", item.content_hash))
            }
            _ => StoreError::Database(err),
        })?;
        Ok(id)
    }

    async fn category_ids(&self, slugs: &[String]) -> Result<Vec<Uuid>, StoreError> {
        if slugs.is_empty() {
            return Ok(Vec::new());
        }
        let ids = sqlx::query_scalar::<_, Uuid>("SELECT id FROM categories WHERE slug = ANY($1)")
            .bind(slugs)
            .fetch_all(&self.pool)
            .await?;
        Ok(ids)
    }

    async fn link_categories(
        &self,
        item_id: Uuid,
        category_ids: &[Uuid],
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO content_item_categories (content_item_id, category_id)
            SELECT $1, UNNEST($2::uuid[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(item_id)
        .bind(category_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn consume_budget(
        &self,
        source_key: &str,
        day: NaiveDate,
        ceiling: u32,
    ) -> Result<BudgetDecision, StoreError> {
        // One statement: the conflict branch only increments below the ceiling,
        // and a zero ceiling never inserts.
        let used = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO budget_counters (source_key, day, count)
            SELECT $1, $2, 1
             WHERE $3::int4 > 0
            ON CONFLICT (source_key, day) DO UPDATE
               SET count = budget_counters.count + 1
             WHERE budget_counters.count < $3::int4
            RETURNING count
            "#,
        )
        .bind(source_key)
        .bind(day)
        .bind(to_db_count(ceiling))
        .fetch_optional(&self.pool)
        .await?;

        Ok(match used {
            Some(used) => BudgetDecision::Allowed {
                used: from_db_count(used),
                ceiling,
            },
            None => BudgetDecision::Exceeded { ceiling },
        })
    }
}
