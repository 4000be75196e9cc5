// src/ingest/cache.rs
//! Short-TTL cache of raw provider responses, keyed by (source, strategy, query, filters).

use std::collections::HashMap;
use std::time::Duration;

use metrics::counter;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::ingest::short_digest;
use crate::ingest::types::{SearchFilters, Strategy};

/// Entries past this count trigger an eviction sweep on insert.
const SWEEP_AT: usize = 512;

pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, (Instant, String)>>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn key(source: &str, strategy: Strategy, query: &str, filters: &SearchFilters) -> String {
        let filters_json = serde_json::to_string(filters).unwrap_or_default();
        format!(
            "{source}:{}:{}",
            strategy.as_str(),
            short_digest(&[query, &filters_json])
        )
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        match entries.get(key) {
            Some((stored_at, body)) if stored_at.elapsed() < self.ttl => {
                counter!("cache_hits_total").increment(1);
                Some(body.clone())
            }
            _ => {
                counter!("cache_misses_total").increment(1);
                None
            }
        }
    }

    pub async fn put(&self, key: String, body: String) {
        let mut entries = self.entries.write().await;
        if entries.len() >= SWEEP_AT {
            let ttl = self.ttl;
            entries.retain(|_, (stored_at, _)| stored_at.elapsed() < ttl);
        }
        entries.insert(key, (Instant::now(), body));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(60));
        let key = ResponseCache::key("indeed", Strategy::Api, "rust", &SearchFilters::default());
        assert!(cache.is_empty().await);
        cache.put(key.clone(), "body".into()).await;
        assert_eq!(cache.len().await, 1);
        assert_eq!(cache.get(&key).await.as_deref(), Some("body"));

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[test]
    fn keys_differ_by_strategy_and_filters() {
        let f = SearchFilters::default();
        let remote = SearchFilters {
            remote_only: true,
            ..Default::default()
        };
        let a = ResponseCache::key("indeed", Strategy::Api, "rust", &f);
        assert_ne!(a, ResponseCache::key("indeed", Strategy::Scrape, "rust", &f));
        assert_ne!(a, ResponseCache::key("indeed", Strategy::Api, "rust", &remote));
        assert_eq!(a, ResponseCache::key("indeed", Strategy::Api, "rust", &f));
    }
}
