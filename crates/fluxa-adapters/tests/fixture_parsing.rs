use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use fluxa_adapters::{
    default_registry, AdapterError, AdapterSettings, ContentAdapter, Credentials, FetchedPayload,
    API_SPORTS_KEY, GUARDIAN_KEY, NEWSAPI_KEY,
};
use fluxa_storage::{HttpClientConfig, HttpFetcher};
use serde_json::json;

fn fixture_path(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../../fixtures")
        .join(rel)
}

fn fetched_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap()
}

fn payload(rel: &str, content_type: &str) -> FetchedPayload {
    let body = std::fs::read(fixture_path(rel)).unwrap();
    FetchedPayload::new(format!("fixture://{rel}"), content_type, body, fetched_at())
}

fn adapter(source_key: &str, source_config: serde_json::Value) -> Box<dyn ContentAdapter> {
    let settings = AdapterSettings {
        source_key: source_key.to_string(),
        source_config,
        max_items_per_run: 25,
        credentials: Credentials::default()
            .with("NEWSAPI_KEY", "test-newsapi")
            .with("GUARDIAN_API_KEY", "test-guardian")
            .with("API_SPORTS_KEY", "test-sports"),
        http: Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
    };
    default_registry().build(&settings).unwrap()
}

#[test]
fn newsapi_parses_articles_and_drops_removed_or_linkless() {
    let adapter = adapter(NEWSAPI_KEY, json!({ "category": "general" }));
    let items = adapter
        .parse(&payload("newsapi/top_headlines.json", "application/json"))
        .unwrap();

    assert_eq!(items.len(), 2);
    let first = &items[0];
    assert_eq!(first.title, "City council approves new transit plan");
    assert_eq!(first.source_url, "https://apnews.com/article/transit-plan-0001");
    assert_eq!(first.external_id, None);
    assert_eq!(
        first.published_at,
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap())
    );
    assert_eq!(
        first.excerpt.as_deref(),
        Some("The plan adds three bus rapid transit lines by 2028.")
    );
    assert_eq!(first.categories, Some(vec!["general".to_string()]));
    assert_eq!(
        first.raw_data.as_ref().unwrap()["source"]["name"],
        "Associated Press"
    );

    assert_eq!(items[1].excerpt, None);
    assert_eq!(items[1].image_url, None);
}

#[test]
fn newsapi_error_envelope_is_a_provider_error() {
    let adapter = adapter(NEWSAPI_KEY, json!({}));
    let err = adapter
        .parse(&payload("newsapi/error.json", "application/json"))
        .unwrap_err();
    match err {
        AdapterError::Provider(message) => assert!(message.contains("API key is invalid")),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn guardian_uses_content_id_and_strips_trail_text_markup() {
    let adapter = adapter(GUARDIAN_KEY, json!({ "section": "music" }));
    let items = adapter
        .parse(&payload("guardian/search.json", "application/json"))
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(
        items[0].external_id.as_deref(),
        Some("music/2026/mar/01/festival-lineup-announced")
    );
    assert_eq!(
        items[0].excerpt.as_deref(),
        Some("Exclusive: organisers confirm the full bill")
    );
    assert_eq!(items[0].categories, Some(vec!["music".to_string()]));
    assert_eq!(items[1].excerpt, None);
    assert_eq!(items[1].image_url, None);
}

#[test]
fn api_sports_builds_match_titles_and_fixture_ids() {
    let adapter = adapter(API_SPORTS_KEY, json!({ "league": "39" }));
    let items = adapter
        .parse(&payload("api-sports/fixtures.json", "application/json"))
        .unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].title, "Liverpool vs Chelsea");
    assert_eq!(items[0].external_id.as_deref(), Some("1208021"));
    assert_eq!(
        items[0].excerpt.as_deref(),
        Some("Premier League (England) · Match Finished · 2-1")
    );
    assert_eq!(
        items[0].published_at,
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 15, 0, 0).unwrap())
    );
    assert_eq!(
        items[1].excerpt.as_deref(),
        Some("Premier League (England) · Not Started")
    );
    assert_eq!(
        items[1].categories,
        Some(vec!["sports".to_string(), "Premier League".to_string()])
    );
}

#[test]
fn api_sports_error_object_is_a_provider_error() {
    let adapter = adapter(API_SPORTS_KEY, json!({}));
    let err = adapter
        .parse(&payload("api-sports/rate_limited.json", "application/json"))
        .unwrap_err();
    assert!(matches!(err, AdapterError::Provider(ref m) if m.starts_with("requests:")));
}

#[test]
fn rss_feed_maps_guid_enclosure_and_categories() {
    let adapter = adapter(
        "rss:example-sport",
        json!({ "feed_url": "https://sport.example.test/feed.xml", "category": "sport" }),
    );
    let items = adapter
        .parse(&payload("rss/feed.xml", "application/rss+xml"))
        .unwrap();

    assert_eq!(items.len(), 2);
    let derby = &items[0];
    assert_eq!(derby.external_id.as_deref(), Some("sport-0001"));
    assert_eq!(
        derby.published_at,
        Some(Utc.with_ymd_and_hms(2026, 3, 1, 8, 30, 0).unwrap())
    );
    assert_eq!(
        derby.excerpt.as_deref(),
        Some("Both sides scored late in the second half.")
    );
    assert_eq!(
        derby.image_url.as_deref(),
        Some("https://sport.example.test/img/derby.jpg")
    );
    assert_eq!(derby.categories, Some(vec!["Football".to_string()]));

    let marathon = &items[1];
    assert_eq!(marathon.external_id, None);
    assert_eq!(marathon.categories, Some(vec!["sport".to_string()]));
}

#[test]
fn rss_source_without_feed_url_is_rejected() {
    let settings = AdapterSettings {
        source_key: "rss:nowhere".to_string(),
        source_config: json!({}),
        max_items_per_run: 10,
        credentials: Credentials::default(),
        http: Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
    };
    let err = default_registry().build(&settings).err().unwrap();
    assert!(matches!(err, AdapterError::InvalidConfig { .. }));
}
