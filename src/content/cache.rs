//! TTL cache in front of a content provider.
//!
//! Keyed by topic. Only topics missing from the cache (or expired) are
//! forwarded to the inner provider. An expired entry is evicted once it has
//! been looked up and not refreshed. Quiet and failed topics are never
//! cached, so a topic that gains content is picked up by the next slice.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::ContentError;
use crate::pipeline::types::{ContentFetch, ContentProvider, ContentSet};

struct CacheEntry {
    set: ContentSet,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.stored_at.elapsed() < ttl
    }
}

pub struct CachedContentProvider {
    inner: Arc<dyn ContentProvider>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedContentProvider {
    pub fn new(inner: Arc<dyn ContentProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(self.ttl));
        before - entries.len()
    }

    async fn evict_stale(&self, topics: &[String]) {
        let mut entries = self.entries.write().await;
        for topic in topics {
            if entries.get(topic).is_some_and(|e| !e.is_fresh(self.ttl)) {
                entries.remove(topic);
            }
        }
    }
}

#[async_trait]
impl ContentProvider for CachedContentProvider {
    async fn fetch_content(&self, topics: &[String]) -> Result<ContentFetch, ContentError> {
        let mut content = HashMap::new();
        let mut missing = Vec::new();

        {
            let entries = self.entries.read().await;
            for topic in topics {
                match entries.get(topic) {
                    Some(entry) if entry.is_fresh(self.ttl) => {
                        content.insert(topic.clone(), entry.set.clone());
                    }
                    _ => missing.push(topic.clone()),
                }
            }
        }

        debug!(
            hits = content.len(),
            misses = missing.len(),
            "Content cache lookup"
        );
        if missing.is_empty() {
            return Ok(ContentFetch::complete(content));
        }

        let fetched = match self.inner.fetch_content(&missing).await {
            Ok(fetched) => fetched,
            // Serve the hits rather than failing the whole slice; the misses
            // are reported as failed topics.
            Err(e) if !content.is_empty() => {
                warn!(error = %e, "Content refresh failed; serving cached topics only");
                self.evict_stale(&missing).await;
                let cause = e.to_string();
                let failed = missing
                    .into_iter()
                    .map(|topic| (topic, ContentError::Unavailable(cause.clone())))
                    .collect();
                return Ok(ContentFetch { content, failed });
            }
            Err(e) => {
                self.evict_stale(&missing).await;
                return Err(e);
            }
        };

        let now = Instant::now();
        {
            let mut entries = self.entries.write().await;
            for (topic, set) in &fetched.content {
                entries.insert(
                    topic.clone(),
                    CacheEntry {
                        set: set.clone(),
                        stored_at: now,
                    },
                );
            }
        }
        let unrefreshed: Vec<String> = missing
            .into_iter()
            .filter(|t| !fetched.content.contains_key(t))
            .collect();
        self.evict_stale(&unrefreshed).await;

        content.extend(fetched.content);
        Ok(ContentFetch {
            content,
            failed: fetched.failed,
        })
    }
}
