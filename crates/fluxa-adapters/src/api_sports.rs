use async_trait::async_trait;
use fluxa_core::NormalizedItem;
use fluxa_storage::FetchRequest;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    fetch_payload, non_empty, parse_timestamp, AdapterContext, AdapterError, AdapterSettings,
    ContentAdapter, FetchedPayload,
};

/// Budget-gated: every fetch spends one call of the provider's daily quota.
pub const API_SPORTS_KEY: &str = "api-sports";

const API_BASE_URL: &str = "https://v3.football.api-sports.io";

#[derive(Debug, Deserialize)]
struct Envelope {
    /// `[]` when fine, an object of field → message otherwise.
    #[serde(default)]
    errors: JsonValue,
    #[serde(default)]
    response: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
struct FixtureEntry {
    fixture: Fixture,
    league: League,
    teams: Teams,
    #[serde(default)]
    goals: Goals,
}

#[derive(Debug, Deserialize)]
struct Fixture {
    id: u64,
    date: Option<String>,
    status: Option<FixtureStatus>,
}

#[derive(Debug, Deserialize)]
struct FixtureStatus {
    long: Option<String>,
}

#[derive(Debug, Deserialize)]
struct League {
    name: String,
    country: Option<String>,
    logo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Teams {
    home: Team,
    away: Team,
}

#[derive(Debug, Deserialize)]
struct Team {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct Goals {
    home: Option<u32>,
    away: Option<u32>,
}

/// API-Sports football fixtures for the run's calendar day.
pub struct ApiSportsAdapter {
    settings: AdapterSettings,
    api_key: String,
}

impl ApiSportsAdapter {
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let api_key = settings
            .credentials
            .require(&settings.source_key, "API_SPORTS_KEY")?;
        Ok(Self {
            settings: settings.clone(),
            api_key,
        })
    }

    fn request(&self, ctx: &AdapterContext) -> FetchRequest {
        let mut request = FetchRequest::get(format!("{API_BASE_URL}/fixtures"))
            .header("x-apisports-key", self.api_key.as_str())
            .query("date", ctx.fetched_at.format("%Y-%m-%d").to_string());
        if let Some(league) = self.settings.config_str("league") {
            request = request.query("league", league);
        }
        if let Some(season) = self.settings.config_str("season") {
            request = request.query("season", season);
        }
        request
    }
}

fn provider_errors(errors: &JsonValue) -> Option<String> {
    match errors {
        JsonValue::Object(map) if !map.is_empty() => Some(
            map.iter()
                .map(|(field, msg)| format!("{field}: {}", msg.as_str().unwrap_or("error")))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        JsonValue::Array(list) if !list.is_empty() => Some(
            list.iter()
                .map(|v| v.as_str().map(ToString::to_string).unwrap_or_else(|| v.to_string()))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        _ => None,
    }
}

fn describe(entry: &FixtureEntry) -> String {
    let mut parts = vec![match &entry.league.country {
        Some(country) => format!("{} ({country})", entry.league.name),
        None => entry.league.name.clone(),
    }];
    if let Some(status) = entry.fixture.status.as_ref().and_then(|s| s.long.clone()) {
        parts.push(status);
    }
    if let (Some(home), Some(away)) = (entry.goals.home, entry.goals.away) {
        parts.push(format!("{home}-{away}"));
    }
    parts.join(" · ")
}

#[async_trait]
impl ContentAdapter for ApiSportsAdapter {
    fn source_key(&self) -> &str {
        &self.settings.source_key
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError> {
        fetch_payload(&self.settings, ctx, &self.request(ctx), "application/json").await
    }

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError> {
        let envelope: Envelope = serde_json::from_slice(&raw.body)?;
        if let Some(message) = provider_errors(&envelope.errors) {
            return Err(AdapterError::Provider(message));
        }

        let mut items = Vec::with_capacity(envelope.response.len());
        for value in envelope.response {
            let entry: FixtureEntry = serde_json::from_value(value.clone())?;
            let id = entry.fixture.id;
            items.push(NormalizedItem {
                title: format!("{} vs {}", entry.teams.home.name, entry.teams.away.name),
                source_url: format!("{API_BASE_URL}/fixtures?id={id}"),
                external_id: Some(id.to_string()),
                published_at: entry.fixture.date.as_deref().and_then(parse_timestamp),
                excerpt: Some(describe(&entry)),
                image_url: non_empty(entry.league.logo.as_deref()),
                categories: Some(vec!["sports".to_string(), entry.league.name.clone()]),
                raw_data: Some(value),
            });
        }
        Ok(items)
    }
}
