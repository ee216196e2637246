//! Distributed read-through cache.
//!
//! Values live in a shared remote store (Redis) keyed by a canonical
//! rendering of the request that produced them. Each process keeps an
//! [`InvalidationIndex`] so that saving an entity resets every key tagged
//! with it, and resetting a key publishes its route on the
//! [`InvalidationBus`] so dependents on every instance are reset too.
//!
//! ```no_run
//! use routecache::{CacheManager, CacheSettings, EntryOptions, KeyParts, ResetBy};
//!
//! # async fn run() -> routecache::CacheResult<()> {
//! let manager = CacheManager::get_or_init(CacheSettings::new("orders"), None).await?;
//! let key = KeyParts::new("orders", "GET", "api/orders/{id}")
//!     .with_argument("id", serde_json::json!(7))
//!     .build();
//! let order = manager
//!     .get_or_add(&key, &ResetBy::new().entity_tag("Order"), EntryOptions::default(), || async {
//!         Ok::<_, std::io::Error>(Some("{\"id\":7}".to_string()))
//!     })
//!     .await?;
//!
//! // After saving an order anywhere in this process:
//! routecache::after_save_changes(["Order"]).await;
//! # let _ = order;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

pub mod bus;
pub mod codec;
pub mod config;
pub mod error;
pub mod expiry;
pub mod index;
pub mod key;
pub mod lock;
pub mod manager;
pub mod metrics;
pub mod observability;
pub mod observer;
pub mod store;

pub use bus::{DEFAULT_CHANNEL, InvalidationBus, RouteResetHandler};
pub use config::{CacheSettings, EntryDefaults, EntryOptions, StoreConfig};
pub use error::{BoxError, CacheError, CacheResult, ErrorCategory};
pub use expiry::{ExpiryRecord, LocalExpiryTracker};
pub use index::{InvalidationIndex, Relationship, ResetBy, entity_tag};
pub use key::{CacheKey, KeyParts, RouteKey};
pub use lock::KeyLockRegistry;
pub use manager::{CacheManager, CacheManagerBuilder, ManagerStats, after_save_changes};
pub use observer::{CacheObserver, NoopObserver};
pub use store::{MemoryStore, RedisStore, RemoteStore, StoreFlags};

/// Create the remote store described by `config`.
///
/// Falls back to an in-process [`MemoryStore`] when the store is disabled or
/// Redis cannot be reached, so the cache keeps working within one instance.
pub async fn create_remote_store(config: &StoreConfig) -> Arc<dyn RemoteStore> {
    if !config.enabled {
        tracing::info!("Redis disabled, using in-process store");
        return Arc::new(MemoryStore::new());
    }

    tracing::info!(url = %config.url, "Connecting to Redis");

    match RedisStore::connect(config).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to in-process store; invalidation will not reach other instances."
            );
            Arc::new(MemoryStore::new())
        }
    }
}
