use async_trait::async_trait;
use fluxa_core::NormalizedItem;
use fluxa_storage::FetchRequest;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::{
    fetch_payload, non_empty, parse_timestamp, AdapterContext, AdapterError, AdapterSettings,
    ContentAdapter, FetchedPayload,
};

pub const NEWSAPI_KEY: &str = "newsapi";

const TOP_HEADLINES_URL: &str = "https://newsapi.org/v2/top-headlines";
const MAX_PAGE_SIZE: usize = 100;
/// Placeholder NewsAPI returns for articles pulled by the publisher.
const REMOVED_MARKER: &str = "[Removed]";

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<JsonValue>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

/// NewsAPI.org top headlines. Articles carry no stable id.
pub struct NewsApiAdapter {
    settings: AdapterSettings,
    api_key: String,
}

impl NewsApiAdapter {
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let api_key = settings
            .credentials
            .require(&settings.source_key, "NEWSAPI_KEY")?;
        Ok(Self {
            settings: settings.clone(),
            api_key,
        })
    }

    fn request(&self) -> FetchRequest {
        let country = self.settings.config_str("country").unwrap_or("us");
        let mut request = FetchRequest::get(TOP_HEADLINES_URL)
            .header("X-Api-Key", self.api_key.as_str())
            .query("country", country)
            .query("pageSize", self.settings.page_size(MAX_PAGE_SIZE).to_string());
        if let Some(category) = self.settings.config_str("category") {
            request = request.query("category", category);
        }
        if let Some(query) = self.settings.config_str("query") {
            request = request.query("q", query);
        }
        request
    }
}

#[async_trait]
impl ContentAdapter for NewsApiAdapter {
    fn source_key(&self) -> &str {
        &self.settings.source_key
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError> {
        fetch_payload(&self.settings, ctx, &self.request(), "application/json").await
    }

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError> {
        let envelope: Envelope = serde_json::from_slice(&raw.body)?;
        if envelope.status != "ok" {
            return Err(AdapterError::Provider(
                envelope
                    .message
                    .unwrap_or_else(|| format!("status `{}`", envelope.status)),
            ));
        }

        let categories = self
            .settings
            .config_str("category")
            .map(|c| vec![c.to_string()]);

        let mut items = Vec::with_capacity(envelope.articles.len());
        for value in envelope.articles {
            let article: Article = serde_json::from_value(value.clone())?;
            let (Some(title), Some(url)) = (
                non_empty(article.title.as_deref()),
                non_empty(article.url.as_deref()),
            ) else {
                continue;
            };
            if title == REMOVED_MARKER {
                debug!(%url, "skipping removed newsapi article");
                continue;
            }
            items.push(NormalizedItem {
                title,
                source_url: url,
                external_id: None,
                published_at: article.published_at.as_deref().and_then(parse_timestamp),
                excerpt: non_empty(article.description.as_deref()),
                image_url: non_empty(article.url_to_image.as_deref()),
                raw_data: Some(value),
                categories: categories.clone(),
            });
        }
        Ok(items)
    }
}
