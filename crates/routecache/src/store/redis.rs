//! Redis-backed remote store.
//!
//! Commands go through a `deadpool-redis` pool. SUBSCRIBE cannot use a
//! pooled connection, so each subscription opens a dedicated pub/sub
//! connection from its own client.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, Runtime, redis::AsyncCommands};
use futures_util::StreamExt;

use super::{MessageStream, RemoteStore, StoreFlags};
use crate::config::StoreConfig;
use crate::error::{CacheError, CacheResult};

/// Shared store backed by Redis.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
    url: String,
}

impl RedisStore {
    /// Wrap an existing pool. `url` is used to open pub/sub connections.
    pub fn new(pool: Pool, url: impl Into<String>) -> Self {
        Self {
            pool,
            url: url.into(),
        }
    }

    /// Create the connection pool and check that Redis answers.
    pub async fn connect(config: &StoreConfig) -> CacheResult<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(timeout);
        pool_config.timeouts.create = Some(timeout);
        pool_config.timeouts.recycle = Some(timeout);

        let mut redis_config = deadpool_redis::Config::from_url(&config.url);
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::connection(format!("failed to create Redis pool: {e}")))?;

        // Fail fast instead of on the first cache read.
        pool.get().await?;

        tracing::info!(url = %config.url, "Connected to Redis");
        Ok(Self::new(pool, config.url.clone()))
    }

    /// Whether a connection can currently be obtained (for health checks).
    pub async fn is_available(&self) -> bool {
        self.pool.get().await.is_ok()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // PSETEX rejects 0.
    (ttl.as_millis() as u64).max(1)
}

async fn write(pool: &Pool, key: &str, value: &str, ttl: Option<Duration>) -> CacheResult<()> {
    let mut conn = pool.get().await?;
    match ttl {
        Some(ttl) => {
            conn.pset_ex::<_, _, ()>(key, value, ttl_millis(ttl))
                .await?
        }
        None => conn.set::<_, _, ()>(key, value).await?,
    }
    Ok(())
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn get(&self, key: &str) -> CacheResult<Option<String>> {
        let mut conn = self.pool.get().await?;
        let value = conn.get::<_, Option<String>>(key).await?;
        Ok(value)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        flags: StoreFlags,
    ) -> CacheResult<()> {
        if !flags.fire_and_forget {
            return write(&self.pool, key, &value, ttl).await;
        }

        let pool = self.pool.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            if let Err(e) = write(&pool, &key, &value, ttl).await {
                tracing::warn!(key = %key, error = %e, "Redis SET error");
            } else {
                tracing::debug!(key = %key, "cache set (fire-and-forget)");
            }
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()> {
        let mut conn = self.pool.get().await?;
        conn.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream> {
        let client = deadpool_redis::redis::Client::open(self.url.as_str())
            .map_err(|e| CacheError::connection(format!("failed to create Redis client: {e}")))?;

        let mut pubsub = client
            .get_async_pubsub()
            .await
            .map_err(|e| CacheError::connection(format!("failed to get pub/sub connection: {e}")))?;

        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| CacheError::subscribe(e.to_string()))?;

        tracing::info!(channel = %channel, "Subscribed to Redis channel");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            match msg.get_payload::<String>() {
                Ok(payload) => Some(payload),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse pub/sub message payload");
                    None
                }
            }
        });
        Ok(stream.boxed())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
