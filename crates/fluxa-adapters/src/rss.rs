use async_trait::async_trait;
use fluxa_core::NormalizedItem;
use fluxa_storage::FetchRequest;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::{
    fetch_payload, non_empty, parse_timestamp, plain_text, AdapterContext, AdapterError,
    AdapterSettings, ContentAdapter, FetchedPayload,
};

/// Any source keyed `rss:<name>` is read as an RSS 2.0 feed.
pub const RSS_PREFIX: &str = "rss:";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
    #[serde(rename = "category", default)]
    categories: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
    #[serde(rename = "@type", default)]
    kind: Option<String>,
}

pub struct RssFeedAdapter {
    settings: AdapterSettings,
    feed_url: String,
}

impl RssFeedAdapter {
    pub fn from_settings(settings: &AdapterSettings) -> Result<Self, AdapterError> {
        let feed_url = settings
            .config_str("feed_url")
            .ok_or_else(|| AdapterError::InvalidConfig {
                source_key: settings.source_key.clone(),
                message: "`feed_url` is required".to_string(),
            })?
            .to_string();
        Ok(Self {
            settings: settings.clone(),
            feed_url,
        })
    }
}

#[async_trait]
impl ContentAdapter for RssFeedAdapter {
    fn source_key(&self) -> &str {
        &self.settings.source_key
    }

    async fn fetch(&self, ctx: &AdapterContext) -> Result<FetchedPayload, AdapterError> {
        let request = FetchRequest::get(self.feed_url.as_str());
        fetch_payload(&self.settings, ctx, &request, "application/rss+xml").await
    }

    fn parse(&self, raw: &FetchedPayload) -> Result<Vec<NormalizedItem>, AdapterError> {
        let rss: Rss = from_str(raw.text()?).map_err(|e| AdapterError::Parse(e.to_string()))?;
        let fallback_category = self.settings.config_str("category").map(ToString::to_string);

        let mut items = Vec::with_capacity(rss.channel.items.len());
        for item in rss.channel.items {
            let (Some(title), Some(link)) = (
                non_empty(item.title.as_deref()),
                non_empty(item.link.as_deref()),
            ) else {
                continue;
            };
            let image_url = item
                .enclosure
                .as_ref()
                .filter(|e| e.kind.as_deref().map_or(true, |k| k.starts_with("image/")))
                .map(|e| e.url.clone());
            let mut categories = item.categories.clone();
            if categories.is_empty() {
                categories.extend(fallback_category.clone());
            }
            let raw_data = serde_json::json!({
                "title": &title,
                "link": &link,
                "guid": item.guid.as_ref().map(|g| g.value.as_str()),
                "pubDate": item.pub_date.as_deref(),
                "description": item.description.as_deref(),
            });
            items.push(NormalizedItem {
                external_id: item.guid.as_ref().and_then(|g| non_empty(Some(g.value.as_str()))),
                published_at: item.pub_date.as_deref().and_then(parse_timestamp),
                excerpt: item.description.as_deref().and_then(plain_text),
                image_url,
                raw_data: Some(raw_data),
                categories: (!categories.is_empty()).then_some(categories),
                title,
                source_url: link,
            });
        }
        Ok(items)
    }
}
