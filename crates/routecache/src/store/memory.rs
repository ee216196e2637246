//! In-process remote store.
//!
//! Backed by a `DashMap` for values and one `tokio::sync::broadcast`
//! channel per pub/sub channel. Cloning the store shares the same data, so
//! several cache managers built on clones behave like instances sharing one
//! Redis.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::StreamExt;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_stream::wrappers::BroadcastStream;

use super::{MessageStream, RemoteStore, StoreFlags};
use crate::error::CacheResult;

const CHANNEL_CAPACITY: usize = 1024;

/// A stored value with an optional deadline.
#[derive(Clone, Debug)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline <= now)
    }
}

/// Process-local store with TTL and pub/sub support.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: Arc<DashMap<String, StoredValue>>,
    channels: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live (non-expired) value exists for `key`.
    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.values
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of stored values, expired ones included until they are read.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .value()
            .clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let now = Instant::now();
        if let Some(entry) = self.values.get(key) {
            if !entry.is_expired(now) {
                return Ok(Some(entry.value.clone()));
            }
            drop(entry);
            self.values.remove_if(key, |_, entry| entry.is_expired(now));
        }
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        _flags: StoreFlags,
    ) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.values
            .insert(key.to_string(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.values.remove(key);
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()> {
        // No receivers is not a failure, matching Redis PUBLISH semantics.
        let _ = self.sender(channel).send(message.to_string());
        tracing::trace!(channel = %channel, message = %message, "published (memory)");
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let receiver = self.sender(channel).subscribe();
        let channel = channel.to_string();
        let stream = BroadcastStream::new(receiver).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(message) => Some(message),
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "subscriber lagged, messages dropped");
                        None
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_set_delete() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);

        store
            .set("k", "v".to_string(), None, StoreFlags::NONE)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.delete("k").await.unwrap();
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let store = MemoryStore::new();
        store
            .set(
                "k",
                "v".to_string(),
                Some(Duration::from_millis(50)),
                StoreFlags::NONE,
            )
            .await
            .unwrap();
        assert!(store.contains("k"));

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(!store.contains("k"));
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_clones_share_data() {
        let a = MemoryStore::new();
        let b = a.clone();
        a.set("k", "v".to_string(), None, StoreFlags::FIRE_AND_FORGET)
            .await
            .unwrap();
        assert_eq!(b.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_publish_reaches_all_subscribers() {
        let store = MemoryStore::new();
        let mut first = store.subscribe("ch").await.unwrap();
        let mut second = store.clone().subscribe("ch").await.unwrap();

        store.publish("ch", "route-a").await.unwrap();
        store.publish("other", "ignored").await.unwrap();

        assert_eq!(first.next().await.as_deref(), Some("route-a"));
        assert_eq!(second.next().await.as_deref(), Some("route-a"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let store = MemoryStore::new();
        assert!(store.publish("ch", "nobody").await.is_ok());
    }
}
