use async_trait::async_trait;
use fluxa_core::NormalizedItem;
use fluxa_storage::FetchRequest;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use crate::{
    fetch_payload, non_empty, parse_timestamp, plain_text, AdapterContext, AdapterError,
    AdapterSettings, ContentAdapter, FetchedPayload,
};

pub const GUARDIAN_KEY: &str = "guardian";

const SEARCH_URL: &str = "https://content.guardianapis.com/search";
const MAX_PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct Envelope {
    response: SearchResponse,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    results: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    id: String,
    section_id: Option<String>,
    web_title: Option<String>,
    web_url: Option<String>,
    web_publication_date: Option<String>,
    #[serde(default)]
    fields: ContentFields,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContentFields {
    trail_text: Option<String>,
    thumbnail: Option<String>,
}

/// Guardian Open Platform content search, newest first.
pub struct GuardianAdapter {
    settings: AdapterSettings,
    api_key: String,
}

impl GuardianAdapter {
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let api_key = settings
            .credentials
            .require(&settings.source_key, "GUARDIAN_API_KEY")?;
        Ok(Self {
            settings: settings.clone(),
            api_key,
        })
    }

    fn request(&self) -> FetchRequest {
        let mut request = FetchRequest::get(SEARCH_URL)
            .query("api-key", self.api_key.as_str())
            .query("order-by", "newest")
            .query("show-fields", "trailText,thumbnail")
            .query("page-size", self.settings.page_size(MAX_PAGE_SIZE).to_string());
        if let Some(section) = self.settings.config_str("section") {
            request = request.query("section", section);
        }
        if let Some(query) = self.settings.config_str("query") {
            request = request.query("q", query);
        }
        request
    }
}

#[async_trait]
impl ContentAdapter for GuardianAdapter {
    fn source_key(&self) -> &str {
        &self.settings.source_key
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError> {
        fetch_payload(&self.settings, ctx, &self.request(), "application/json").await
    }

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError> {
        let envelope: Envelope = serde_json::from_slice(&raw.body)?;
        let response = envelope.response;
        if response.status != "ok" {
            return Err(AdapterError::Provider(
                response
                    .message
                    .unwrap_or_else(|| format!("status `{}`", response.status)),
            ));
        }

        let mut items = Vec::with_capacity(response.results.len());
        for value in response.results {
            let content: Content = serde_json::from_value(value.clone())?;
            let (Some(title), Some(url)) = (
                non_empty(content.web_title.as_deref()),
                non_empty(content.web_url.as_deref()),
            ) else {
                continue;
            };
            items.push(NormalizedItem {
                title,
                source_url: url,
                external_id: Some(content.id),
                published_at: content
                    .web_publication_date
                    .as_deref()
                    .and_then(parse_timestamp),
                excerpt: content.fields.trail_text.as_deref().and_then(plain_text),
                image_url: non_empty(content.fields.thumbnail.as_deref()),
                raw_data: Some(value),
                categories: content.section_id.map(|section| vec![section]),
            });
        }
        Ok(items)
    }
}
