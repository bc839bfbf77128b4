mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{add_source, clock, ingestor, item, register_feed, Feed};
use fluxa_adapters::AdapterRegistry;
use fluxa_core::{ContentSource, IngestOptions, IngestionRun, RunCounters, RunStatus, SkipReason};
use fluxa_storage::MemoryStore;
use serde_json::json;
use uuid::Uuid;

fn acme_items() -> Vec<fluxa_core::NormalizedItem> {
    vec![
        item("Harbour bridge reopens", Some("acme-1")),
        item("Library extends hours", Some("acme-2")),
        item("New bakery on Main St", Some("acme-3")),
    ]
}

async fn setup(key: &str, feed: &Feed) -> (Arc<MemoryStore>, fluxa_ingest::Ingestor, ContentSource) {
    let store = Arc::new(MemoryStore::new());
    let source = add_source(&store, key).await;
    let mut registry = AdapterRegistry::new();
    register_feed(&mut registry, key, feed);
    let ingestor = ingestor(&store, registry);
    (store, ingestor, source)
}

#[tokio::test]
async fn acme_news_first_run_creates_every_item() {
    let feed = Feed::new(acme_items());
    let (store, ingestor, source) = setup("acme-news", &feed).await;

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::default().at(clock()))
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(
        result.counters(),
        RunCounters {
            items_fetched: 3,
            items_created: 3,
            items_skipped: 0,
            items_updated: 0,
        }
    );
    assert_eq!(result.error, None);
    assert_eq!(store.items().await.len(), 3);

    let runs = store.runs_for(source.id).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Completed);
    assert_eq!(runs[0].counters.items_created, 3);
    assert!(runs[0].completed_at.is_some());
    assert_eq!(Some(runs[0].id), result.run_id);

    let health = store.health_for(source.id).await.unwrap();
    assert!(health.success);
    assert_eq!(health.items_created, 3);
    assert_eq!(health.last_run_id, result.run_id);
}

#[tokio::test]
async fn forced_rerun_of_same_payload_creates_nothing() {
    let mut items = acme_items();
    items[2].published_at = None;
    let feed = Feed::new(items);
    let (store, ingestor, _) = setup("acme-news", &feed).await;

    let first = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;
    let second = ingestor
        .run_ingestion(
            "acme-news",
            IngestOptions::forced().at(clock() + Duration::minutes(1)),
        )
        .await;

    assert_eq!(first.items_created, 3);
    assert!(second.success);
    assert_eq!(second.items_created, 0);
    assert_eq!(second.items_updated, 0);
    assert_eq!(second.items_skipped, 3);
    assert_eq!(store.items().await.len(), 3);
}

#[tokio::test]
async fn second_run_inside_refresh_window_is_a_cadence_skip() {
    let feed = Feed::new(acme_items());
    let (store, ingestor, source) = setup("acme-news", &feed).await;

    let first = ingestor
        .run_ingestion("acme-news", IngestOptions::default())
        .await;
    let second = ingestor
        .run_ingestion("acme-news", IngestOptions::default())
        .await;

    assert!(first.success);
    assert!(second.success);
    assert_eq!(second.skipped_reason, Some(SkipReason::Cadence));
    assert_eq!(second.counters(), RunCounters::default());
    assert!(second.run_id.is_some());
    assert_eq!(feed.fetches(), 1);

    let skipped: Vec<_> = store
        .runs_for(source.id)
        .await
        .into_iter()
        .filter(|r| r.status == RunStatus::Skipped)
        .collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].skip_reason, Some(SkipReason::Cadence));
    assert!(skipped[0].completed_at.is_some());

    let health = store.health_for(source.id).await.unwrap();
    assert!(health.success);
    assert_eq!(health.last_run_id, second.run_id);
}

fn completed_run(source_id: Uuid, hours_ago: i64) -> IngestionRun {
    let completed_at = clock() - Duration::hours(hours_ago);
    IngestionRun {
        id: Uuid::new_v4(),
        source_id,
        status: RunStatus::Completed,
        skip_reason: None,
        error_message: None,
        counters: RunCounters::default(),
        started_at: completed_at - Duration::minutes(1),
        completed_at: Some(completed_at),
    }
}

#[tokio::test]
async fn refresh_window_comes_from_source_config() {
    let feed = Feed::new(acme_items());
    let store = Arc::new(MemoryStore::new());
    let slow = store
        .insert_source(
            ContentSource::new("slow-news", "Slow News").with_config(json!({ "refresh_hours": 6 })),
        )
        .await;
    let fast = store
        .insert_source(ContentSource::new("fast-news", "Fast News"))
        .await;
    store.insert_run(completed_run(slow.id, 4)).await;
    store.insert_run(completed_run(fast.id, 4)).await;

    let mut registry = AdapterRegistry::new();
    register_feed(&mut registry, "slow-news", &feed);
    register_feed(&mut registry, "fast-news", &feed);
    let ingestor = ingestor(&store, registry);

    let slow_result = ingestor
        .run_ingestion("slow-news", IngestOptions::default().at(clock()))
        .await;
    let fast_result = ingestor
        .run_ingestion("fast-news", IngestOptions::default().at(clock()))
        .await;

    assert_eq!(slow_result.skipped_reason, Some(SkipReason::Cadence));
    assert_eq!(fast_result.skipped_reason, None);
    assert_eq!(fast_result.items_created, 3);
}

#[tokio::test]
async fn force_bypasses_the_refresh_window() {
    let feed = Feed::new(acme_items());
    let (store, ingestor, source) = setup("acme-news", &feed).await;
    store.insert_run(completed_run(source.id, 0)).await;

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    assert!(result.success);
    assert_eq!(result.skipped_reason, None);
    assert_eq!(result.items_created, 3);
}

#[tokio::test]
async fn refetched_story_with_new_excerpt_updates_in_place() {
    let feed = Feed::new(vec![item("Transit vote scheduled", Some("story-9"))]);
    let (store, ingestor, _) = setup("acme-news", &feed).await;
    let first = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;
    assert_eq!(first.items_created, 1);

    let mut fresher = item("Transit vote scheduled", Some("story-9"));
    fresher.excerpt = Some("Council confirms the date".to_string());
    fresher.image_url = Some("https://acme.example.test/vote.jpg".to_string());
    feed.set(vec![fresher]);
    let result = ingestor
        .run_ingestion(
            "acme-news",
            IngestOptions::forced().at(clock() + Duration::hours(4)),
        )
        .await;

    assert!(result.success, "{result:?}");
    assert_eq!(
        result.counters(),
        RunCounters {
            items_fetched: 1,
            items_created: 0,
            items_skipped: 0,
            items_updated: 1,
        }
    );
    let items = store.items().await;
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].excerpt.as_deref(), Some("Council confirms the date"));
    assert_eq!(
        items[0].image_url.as_deref(),
        Some("https://acme.example.test/vote.jpg")
    );
    assert_eq!(items[0].title, "Transit vote scheduled");
}

#[tokio::test]
async fn counters_never_exceed_items_fetched() {
    let feed = Feed::new(vec![
        item("Ferry timetable changes", Some("f-1")),
        item("Market returns to square", None),
    ]);
    let (store, ingestor, _) = setup("acme-news", &feed).await;
    ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    let mut refreshed = item("Ferry timetable changes", Some("f-1"));
    refreshed.excerpt = Some("Weekend sailings added".to_string());
    feed.set(vec![
        refreshed,
        item("Park cleanup on Sunday", Some("f-2")),
        item("Park cleanup on Sunday", Some("f-2")),
    ]);
    let result = ingestor
        .run_ingestion(
            "acme-news",
            IngestOptions::forced().at(clock() + Duration::hours(3)),
        )
        .await;

    assert_eq!(result.items_fetched, 3);
    assert_eq!(result.items_updated, 1);
    assert_eq!(result.items_created, 1);
    assert_eq!(result.items_skipped, 1);
    assert!(result.items_created + result.items_skipped + result.items_updated <= result.items_fetched);
    assert_eq!(store.items().await.len(), 3);
}

#[tokio::test]
async fn hash_match_wins_over_external_id_update() {
    let feed = Feed::new(vec![item("Lighthouse repainted", Some("lh-1"))]);
    let (store, ingestor, _) = setup("acme-news", &feed).await;
    ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    let mut same_hash = item("Lighthouse repainted", Some("lh-1"));
    same_hash.excerpt = Some("Would have been an update".to_string());
    feed.set(vec![same_hash]);
    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    assert_eq!(result.items_skipped, 1);
    assert_eq!(result.items_updated, 0);
    assert_eq!(
        store.items().await[0].excerpt.as_deref(),
        Some("Lighthouse repainted excerpt")
    );
}

#[tokio::test]
async fn items_beyond_the_per_run_cap_are_left_alone() {
    let feed = Feed::new(acme_items());
    let store = Arc::new(MemoryStore::new());
    store
        .insert_source(
            ContentSource::new("acme-news", "Acme").with_config(json!({ "max_items_per_run": 2 })),
        )
        .await;
    let mut registry = AdapterRegistry::new();
    register_feed(&mut registry, "acme-news", &feed);
    let ingestor = ingestor(&store, registry);

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    assert_eq!(result.items_fetched, 3);
    assert_eq!(result.items_created, 2);
    assert_eq!(store.items().await.len(), 2);
}

#[tokio::test]
async fn disabled_source_records_a_skip_and_fails() {
    let feed = Feed::new(acme_items());
    let store = Arc::new(MemoryStore::new());
    let source = store
        .insert_source(ContentSource::new("acme-news", "Acme").inactive())
        .await;
    let mut registry = AdapterRegistry::new();
    register_feed(&mut registry, "acme-news", &feed);
    let ingestor = ingestor(&store, registry);

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced())
        .await;

    assert!(!result.success);
    assert_eq!(result.skipped_reason, Some(SkipReason::Disabled));
    assert!(result.run_id.is_some());
    assert_eq!(feed.fetches(), 0);

    let runs = store.runs_for(source.id).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Skipped);
    assert_eq!(runs[0].skip_reason, Some(SkipReason::Disabled));
    assert!(!store.health_for(source.id).await.unwrap().success);
}

#[tokio::test]
async fn unknown_source_key_returns_failure_without_run() {
    let store = Arc::new(MemoryStore::new());
    let ingestor = ingestor(&store, AdapterRegistry::new());

    let result = ingestor
        .run_ingestion("nowhere", IngestOptions::forced())
        .await;

    assert!(!result.success);
    assert_eq!(result.run_id, None);
    assert!(result.error.unwrap().contains("not found"));
}

#[tokio::test]
async fn source_without_adapter_is_recorded_as_failed() {
    let store = Arc::new(MemoryStore::new());
    let source = add_source(&store, "ghost-feed").await;
    let ingestor = ingestor(&store, AdapterRegistry::new());

    let result = ingestor
        .run_ingestion("ghost-feed", IngestOptions::forced())
        .await;

    assert!(!result.success);
    assert!(result
        .error
        .as_deref()
        .unwrap()
        .contains("adapter not found for source `ghost-feed`"));
    let runs = store.runs_for(source.id).await;
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].error_message, result.error);
}

#[tokio::test]
async fn fetch_error_fails_the_run() {
    let feed = Feed::new(acme_items());
    feed.fail_with("upstream returned 503");
    let (store, ingestor, source) = setup("acme-news", &feed).await;

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced())
        .await;

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap().contains("upstream returned 503"));
    let health = store.health_for(source.id).await.unwrap();
    assert!(!health.success);
    assert_eq!(health.last_error, result.error);
}

#[tokio::test]
async fn insert_failure_aborts_with_partial_counters() {
    let feed = Feed::new(acme_items());
    let (store, ingestor, source) = setup("acme-news", &feed).await;
    store.reject_inserts_titled("Library extends hours").await;

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    assert!(!result.success);
    assert_eq!(result.items_fetched, 3);
    assert_eq!(result.items_created, 1);
    assert!(result.error.as_deref().unwrap().contains("Library extends hours"));
    assert_eq!(store.items().await.len(), 1);

    let runs = store.runs_for(source.id).await;
    assert_eq!(runs[0].status, RunStatus::Failed);
    assert_eq!(runs[0].counters.items_created, 1);
}

#[tokio::test]
async fn known_categories_are_linked_and_unknown_ones_ignored() {
    let mut tagged = item("Cup final preview", Some("cup-1"));
    tagged.categories = Some(vec!["Sports".to_string(), "Made Up".to_string()]);
    let feed = Feed::new(vec![tagged]);
    let (store, ingestor, _) = setup("acme-news", &feed).await;
    let sports = store.add_category("sports").await;

    let result = ingestor
        .run_ingestion("acme-news", IngestOptions::forced().at(clock()))
        .await;

    assert_eq!(result.items_created, 1);
    let item_id = store.items().await[0].id;
    assert_eq!(store.categories_of(item_id).await, vec![sports]);
}

#[tokio::test]
async fn budget_exhaustion_fails_even_when_forced() {
    let feed = Feed::new(vec![item("Liverpool vs Chelsea", Some("1208021"))]);
    let store = Arc::new(MemoryStore::new());
    let source = store
        .insert_source(
            ContentSource::new("api-sports", "API-Sports").with_config(json!({ "daily_budget": 2 })),
        )
        .await;
    let mut registry = AdapterRegistry::new();
    register_feed(&mut registry, "api-sports", &feed);
    let ingestor = ingestor(&store, registry);

    for _ in 0..2 {
        let ok = ingestor
            .run_ingestion("api-sports", IngestOptions::forced().at(clock()))
            .await;
        assert!(ok.success, "{ok:?}");
    }
    let exhausted = ingestor
        .run_ingestion("api-sports", IngestOptions::forced().at(clock()))
        .await;

    assert!(!exhausted.success);
    assert_eq!(exhausted.skipped_reason, Some(SkipReason::BudgetExceeded));
    assert_eq!(exhausted.counters(), RunCounters::default());
    assert_eq!(feed.fetches(), 3);
    assert_eq!(store.budget_used("api-sports", clock().date_naive()).await, 2);

    let last = store
        .runs_for(source.id)
        .await
        .into_iter()
        .find(|r| Some(r.id) == exhausted.run_id)
        .unwrap();
    assert_eq!(last.status, RunStatus::Skipped);
    assert_eq!(last.skip_reason, Some(SkipReason::BudgetExceeded));

    let next_day = ingestor
        .run_ingestion(
            "api-sports",
            IngestOptions::forced().at(clock() + Duration::days(1)),
        )
        .await;
    assert!(next_day.success);
}
