//! HTTP content provider backed by a JSON search API.
//!
//! `GET {base_url}?q=<topic>&limit=<n>` with an optional `x-api-key` header,
//! expecting `{"items": [{"title", "url", "snippet"?, "source"?, "published_at"?}]}`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::{env_opt, env_parse};
use crate::error::{ConfigError, ContentError};
use crate::pipeline::types::{ContentFetch, ContentItem, ContentProvider, ContentSet};

/// Connection settings for the content API.
#[derive(Debug, Clone)]
pub struct ContentApiConfig {
    pub base_url: String,
    pub api_key: Option<SecretString>,
    pub max_items: usize,
    pub request_timeout: Duration,
}

impl ContentApiConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = env_opt("CONTENT_API_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("CONTENT_API_URL".into()))?;
        Ok(Self {
            base_url,
            api_key: env_opt("CONTENT_API_KEY").map(SecretString::from),
            max_items: env_parse("CONTENT_MAX_ITEMS", 5)?,
            request_timeout: Duration::from_secs(env_parse("CONTENT_TIMEOUT_SECS", 10)?),
        })
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    title: String,
    url: String,
    #[serde(default, alias = "description")]
    snippet: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

impl From<SearchItem> for ContentItem {
    fn from(item: SearchItem) -> Self {
        Self {
            title: item.title,
            url: item.url,
            snippet: item.snippet.unwrap_or_default(),
            source: item.source,
            published_at: item.published_at,
        }
    }
}

/// Fetches content per topic, concurrently.
pub struct HttpContentProvider {
    client: reqwest::Client,
    config: ContentApiConfig,
}

impl HttpContentProvider {
    pub fn new(config: ContentApiConfig) -> Result<Self, ContentError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ContentError::Unavailable(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn fetch_topic(&self, topic: &str) -> Result<ContentSet, ContentError> {
        let failed = |reason: String| ContentError::RequestFailed {
            topic: topic.to_string(),
            reason,
        };

        let mut request = self.client.get(&self.config.base_url).query(&[
            ("q", topic.to_string()),
            ("limit", self.config.max_items.to_string()),
        ]);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key.expose_secret());
        }

        let response = request.send().await.map_err(|e| failed(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(failed(format!("HTTP {status}")));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| ContentError::InvalidResponse(format!("{topic}: {e}")))?;

        let items: Vec<ContentItem> = body
            .items
            .into_iter()
            .take(self.config.max_items)
            .map(ContentItem::from)
            .collect();
        debug!(topic = %topic, items = items.len(), "Fetched topic content");
        Ok(ContentSet::new(topic, items))
    }
}

#[async_trait]
impl ContentProvider for HttpContentProvider {
    async fn fetch_content(&self, topics: &[String]) -> Result<ContentFetch, ContentError> {
        if topics.is_empty() {
            return Ok(ContentFetch::default());
        }

        let results = join_all(topics.iter().map(|t| self.fetch_topic(t))).await;

        let mut fetch = ContentFetch::default();
        for (topic, result) in topics.iter().zip(results) {
            match result {
                Ok(set) if set.is_empty() => debug!(topic = %topic, "No content for topic"),
                Ok(set) => {
                    fetch.content.insert(topic.clone(), set);
                }
                Err(e) => {
                    warn!(topic = %topic, error = %e, "Topic content fetch failed");
                    fetch.failed.push((topic.clone(), e));
                }
            }
        }

        // Every topic erroring means the provider is down, not that the
        // topics are quiet.
        if fetch.failed.len() == topics.len() {
            let cause = fetch
                .failed
                .pop()
                .map(|(_, e)| e.to_string())
                .unwrap_or_default();
            return Err(ContentError::Unavailable(cause));
        }
        Ok(fetch)
    }
}
