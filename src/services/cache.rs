//! Keyed TTL store for provider responses.
//!
//! Expiry is lazy: an expired entry is only removed when a `get` finds it.
//! There is no background sweep and no size bound, so keys that are never read
//! again stay resident until the process restarts.

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::Instant;

use crate::services::access::AccessMode;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: Bytes,
    pub stored_at: Instant,
}

pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        {
            let entry = self.entries.get(key)?;
            if entry.stored_at.elapsed() < self.ttl {
                return Some(entry.payload.clone());
            }
        }

        // The read guard must be released before removing from the same shard.
        self.entries
            .remove_if(key, |_, entry| entry.stored_at.elapsed() >= self.ttl);
        tracing::debug!(key = %key, "Cache entry expired");
        None
    }

    pub fn set(&self, key: impl Into<String>, payload: Bytes) {
        self.entries.insert(
            key.into(),
            CacheEntry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let payload = self.get(key)?;
        match serde_json::from_slice(&payload) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                self.entries.remove(key);
                None
            }
        }
    }

    pub fn set_json<T: Serialize>(&self, key: impl Into<String>, value: &T) {
        let key = key.into();
        match serde_json::to_vec(value) {
            Ok(bytes) => self.set(key, Bytes::from(bytes)),
            Err(e) => tracing::warn!(key = %key, error = %e, "Failed to encode cache entry"),
        }
    }

    /// Number of resident entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub fn listing_key(mode: AccessMode, folder_id: &str, search: Option<&str>) -> String {
    format!("listing:{}:{}:{}", mode, folder_id, search.unwrap_or(""))
}

pub fn detail_key(mode: AccessMode, file_id: &str) -> String {
    format!("detail:{}:{}", mode, file_id)
}

pub fn path_key(folder_id: &str, mode: AccessMode) -> String {
    format!("path:{}:{}", folder_id, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hit_within_ttl() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.set("detail:public:a", Bytes::from_static(b"payload"));

        tokio::time::advance(Duration::from_secs(299)).await;
        assert_eq!(cache.get("detail:public:a"), Some(Bytes::from_static(b"payload")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_removed_on_read() {
        let cache = ResponseCache::new(Duration::from_secs(300));
        cache.set("detail:public:a", Bytes::from_static(b"payload"));
        assert_eq!(cache.len(), 1);

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.get("detail:public:a"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unread_expired_entries_stay_resident() {
        let cache = ResponseCache::new(Duration::from_secs(1));
        cache.set("a", Bytes::from_static(b"1"));
        cache.set("b", Bytes::from_static(b"2"));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_key_schemes() {
        assert_eq!(
            listing_key(AccessMode::Private, "f1", Some("cats")),
            "listing:private:f1:cats"
        );
        assert_eq!(listing_key(AccessMode::Public, "f1", None), "listing:public:f1:");
        assert_eq!(detail_key(AccessMode::Public, "x"), "detail:public:x");
        assert_eq!(path_key("x", AccessMode::Private), "path:x:private");
    }
}
