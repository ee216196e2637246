//! Cache-aside orchestration.
//!
//! ## Read Path
//!
//! ```text
//! get_or_add → register tags → GET ─hit─→ decode
//!                                │
//!                               miss → per-key lock → GET ─hit─→ decode
//!                                                       │
//!                                                      miss → producer → SET → register
//! ```
//!
//! ## Invalidation Path
//!
//! ```text
//! reset_by_entity_tags / reset_by_dependency_route / sweep
//!   → drain bucket → for each key: DEL, unlink, PUBLISH own route
//! ```
//!
//! The remote store is the source of truth for values. The local index and
//! expiry records only exist so that group resets can find keys.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::bus::{InvalidationBus, RouteResetHandler};
use crate::codec;
use crate::config::{CacheSettings, EntryOptions, ensure_valid};
use crate::error::{BoxError, CacheError, CacheResult};
use crate::expiry::{ExpiryRecord, LocalExpiryTracker};
use crate::index::{InvalidationIndex, Relationship, ResetBy};
use crate::key::{CacheKey, KeyParts, RouteKey};
use crate::lock::KeyLockRegistry;
use crate::metrics::{self, ResetReason};
use crate::observer::CacheObserver;
use crate::store::RemoteStore;

/// Recomputations slower than this are logged as warnings.
const SLOW_RECOMPUTE: Duration = Duration::from_secs(1);

static SHARED: OnceCell<Arc<CacheManager>> = OnceCell::const_new();

/// Snapshot of the manager's local bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    pub relationships: usize,
    pub entity_buckets: usize,
    pub route_buckets: usize,
    pub key_locks: usize,
    pub tracked_keys: usize,
}

/// Read-through cache with single-flight recomputation and group resets.
///
/// Meant to be created once per process and shared through `Arc`. Use
/// [`CacheManager::builder`] for explicit construction (tests, dependency
/// injection) or [`CacheManager::get_or_init`] for the process-wide instance.
pub struct CacheManager {
    settings: CacheSettings,
    store: Arc<dyn RemoteStore>,
    bus: InvalidationBus,
    index: InvalidationIndex,
    locks: KeyLockRegistry,
    expiry: Option<LocalExpiryTracker>,
    observer: RwLock<Option<Arc<dyn CacheObserver>>>,
}

impl CacheManager {
    pub fn builder(settings: CacheSettings) -> CacheManagerBuilder {
        CacheManagerBuilder::new(settings)
    }

    /// Return the process-wide manager, starting it on first use.
    ///
    /// Later calls ignore `settings`. An `observer` passed to a later call is
    /// installed only if the running instance has none.
    pub async fn get_or_init(
        settings: CacheSettings,
        observer: Option<Arc<dyn CacheObserver>>,
    ) -> CacheResult<Arc<Self>> {
        if let Some(manager) = SHARED.get() {
            if let Some(observer) = observer {
                manager.set_observer_if_unset(observer);
            }
            return Ok(Arc::clone(manager));
        }

        let initial = observer.clone();
        let manager = SHARED
            .get_or_try_init(|| async move {
                let mut builder = CacheManager::builder(settings);
                if let Some(observer) = initial {
                    builder = builder.observer(observer);
                }
                builder.start().await
            })
            .await?;

        if let Some(observer) = observer {
            manager.set_observer_if_unset(observer);
        }
        Ok(Arc::clone(manager))
    }

    /// The process-wide manager, if it has been initialized.
    pub fn shared() -> Option<Arc<Self>> {
        SHARED.get().cloned()
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn index(&self) -> &InvalidationIndex {
        &self.index
    }

    /// Install `observer` unless one is already present.
    pub fn set_observer_if_unset(&self, observer: Arc<dyn CacheObserver>) {
        let mut slot = self.observer.write();
        if slot.is_none() {
            *slot = Some(observer);
        }
    }

    fn notify(&self, event: impl FnOnce(&dyn CacheObserver)) {
        let observer = self.observer.read().clone();
        if let Some(observer) = observer {
            event(observer.as_ref());
        }
    }

    /// Key parts for a route of this service, honouring the configured
    /// query-string policy.
    pub fn key_parts(&self, method: &str, route: &str) -> KeyParts {
        KeyParts::new(&self.settings.service_name, method, route)
            .include_query(self.settings.defaults.use_query_in_key)
    }

    /// Default options for entries of this service.
    pub fn default_options(&self) -> EntryOptions {
        EntryOptions::from_defaults(&self.settings.defaults)
    }

    /// Return the cached value for `key`, computing it with `producer` on a
    /// miss.
    ///
    /// Concurrent callers for the same key in this process wait for a single
    /// producer run and observe its value. Producer and store errors
    /// propagate; nothing is cached when the producer fails.
    pub async fn get_or_add<F, Fut, E>(
        &self,
        key: &CacheKey,
        reset_by: &ResetBy,
        options: EntryOptions,
        producer: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
        E: Into<BoxError>,
    {
        self.get_or_add_raw(key.as_str(), key.route(), reset_by, options, producer)
            .await
    }

    /// [`get_or_add`](Self::get_or_add) for a key built elsewhere.
    pub async fn get_or_add_raw<F, Fut, E>(
        &self,
        key: &str,
        route: &RouteKey,
        reset_by: &ResetBy,
        options: EntryOptions,
        producer: F,
    ) -> CacheResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<String>, E>>,
        E: Into<BoxError>,
    {
        let relationship = Relationship::new(route.clone(), reset_by);

        // Registered before the read so a reset racing with us can find it.
        self.register(key, &relationship, options.expiry);

        if let Some(stored) = self.store.get(key).await? {
            return Ok(self.hit(key, &stored));
        }

        // A reset may have raced with the registration above.
        self.forget(key);

        let _guard = self.locks.acquire(key).await;

        if let Some(stored) = self.store.get(key).await? {
            self.register(key, &relationship, options.expiry);
            return Ok(self.hit(key, &stored));
        }

        tracing::debug!(key = %key, "cache miss, recomputing");
        self.notify(|o| o.on_miss(key));

        let started = Instant::now();
        let produced = producer().await.map_err(CacheError::producer)?;
        let encoded = codec::encode(produced.as_deref())?;
        let value = codec::decode(&encoded);

        self.store
            .set(key, encoded, options.expiry, options.flags)
            .await?;
        self.register(key, &relationship, options.expiry);

        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed > SLOW_RECOMPUTE {
            tracing::warn!(key = %key, elapsed_ms, "[ATTENTION] cache miss, slow recompute");
        } else {
            tracing::info!(key = %key, elapsed_ms, "cache miss, value recomputed");
        }
        metrics::record_miss(elapsed);
        self.notify(|o| o.on_recomputed(key, elapsed));

        Ok(value)
    }

    fn hit(&self, key: &str, stored: &str) -> Option<String> {
        tracing::debug!(key = %key, len = stored.len(), "cache hit");
        metrics::record_hit();
        self.notify(|o| o.on_hit(key));
        codec::decode(stored)
    }

    fn register(&self, key: &str, relationship: &Relationship, expiry: Option<Duration>) {
        self.index.register(key, relationship.clone());
        if let Some(tracker) = &self.expiry {
            tracker.track(ExpiryRecord::new(key, expiry));
        }
    }

    /// Drop local bookkeeping for `key` without touching the store.
    fn forget(&self, key: &str) {
        self.index.remove(key);
        if let Some(tracker) = &self.expiry {
            tracker.untrack(key);
        }
    }

    /// Reset every key filed under any of `tags`. Returns the number of keys
    /// reset. Call after mutating the corresponding entities.
    pub async fn reset_by_entity_tags<I, S>(&self, tags: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = self.index.drain_entity_tags(tags);
        for key in &keys {
            self.reset_key_for(key, ResetReason::Entity).await;
        }
        if !keys.is_empty() {
            tracing::info!(count = keys.len(), "reset by entity tags");
        }
        keys.len()
    }

    /// Reset every key that declared a dependency on `route`.
    ///
    /// `route` is normalized like a composed route key first, so
    /// `Orders$GET$api/Orders/` matches `orders$get$api/orders`.
    pub async fn reset_by_dependency_route(&self, route: &str) -> usize {
        let route = RouteKey::from_tag(route);
        if route.is_empty() {
            return 0;
        }
        let keys = self.index.drain_dependency_route(route.as_str());
        for key in &keys {
            self.reset_key_for(key, ResetReason::Route).await;
        }
        if !keys.is_empty() {
            tracing::info!(route = %route, count = keys.len(), "reset by route");
        }
        self.notify(|o| o.on_route_reset(route.as_str(), keys.len()));
        keys.len()
    }

    /// Reset one key: delete it remotely, drop its local bookkeeping and
    /// publish its route so dependents cascade. Never fails.
    pub async fn reset_key(&self, key: &str) {
        self.reset_key_for(key, ResetReason::Direct).await;
    }

    async fn reset_key_for(&self, key: &str, reason: ResetReason) {
        if let Err(e) = self.store.delete(key).await {
            tracing::warn!(key = %key, error = %e, "failed to delete cache entry");
        }

        let relationship = self.index.remove(key);
        if let Some(tracker) = &self.expiry {
            tracker.untrack(key);
        }

        tracing::debug!(key = %key, reason = reason.as_str(), "cache key reset");
        metrics::record_reset(reason);
        self.notify(|o| o.on_key_reset(key));

        if let Some(relationship) = relationship {
            let route = relationship.route;
            if !route.is_empty() && self.bus.publish(route.as_str()).await {
                self.notify(|o| o.on_route_published(route.as_str()));
            }
        }
    }

    /// Reset every key whose local expiry has passed. Skipped (returning 0)
    /// when sweeping is disabled or another sweep is still running.
    pub async fn sweep_expired(&self) -> usize {
        let Some(tracker) = &self.expiry else {
            return 0;
        };
        let Some(_sweep) = tracker.begin_sweep() else {
            tracing::debug!("sweep already running, skipping");
            return 0;
        };

        let expired = tracker.expired(Instant::now());
        for key in &expired {
            self.reset_key_for(key, ResetReason::Sweep).await;
        }
        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "swept expired cache keys");
        }
        metrics::set_tracked_keys(tracker.len());
        expired.len()
    }

    pub fn stats(&self) -> ManagerStats {
        ManagerStats {
            relationships: self.index.len(),
            entity_buckets: self.index.entity_bucket_count(),
            route_buckets: self.index.route_bucket_count(),
            key_locks: self.locks.len(),
            tracked_keys: self.expiry.as_ref().map_or(0, LocalExpiryTracker::len),
        }
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.expiry
            .as_ref()
            .is_some_and(|tracker| tracker.is_tracked(key))
    }

    fn spawn_sweeper(manager: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(manager);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    return;
                };
                if manager
                    .expiry
                    .as_ref()
                    .is_some_and(LocalExpiryTracker::is_sweeping)
                {
                    continue;
                }
                tokio::spawn(async move {
                    manager.sweep_expired().await;
                });
            }
        })
    }
}

#[async_trait]
impl RouteResetHandler for CacheManager {
    async fn reset_route(&self, route: &str) {
        self.reset_by_dependency_route(route).await;
    }
}

/// Reset `tags` on the process-wide manager after entities were saved.
///
/// Does nothing when the shared manager was never initialized.
pub async fn after_save_changes<I, S>(tags: I) -> usize
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    match CacheManager::shared() {
        Some(manager) => manager.reset_by_entity_tags(tags).await,
        None => 0,
    }
}

/// Builder for [`CacheManager`].
pub struct CacheManagerBuilder {
    settings: CacheSettings,
    store: Option<Arc<dyn RemoteStore>>,
    observer: Option<Arc<dyn CacheObserver>>,
}

impl CacheManagerBuilder {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            store: None,
            observer: None,
        }
    }

    /// Use this store instead of connecting from the settings.
    pub fn store(mut self, store: Arc<dyn RemoteStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn CacheObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Build the manager, subscribe to the invalidation channel and start
    /// the sweep when configured.
    pub async fn start(self) -> CacheResult<Arc<CacheManager>> {
        ensure_valid(&self.settings)?;

        let store = match self.store {
            Some(store) => store,
            None => crate::create_remote_store(&self.settings.store).await,
        };
        let bus = InvalidationBus::new(Arc::clone(&store), self.settings.channel.clone());
        let sweep_interval = self.settings.sweep_interval();

        let manager = Arc::new(CacheManager {
            expiry: sweep_interval.map(LocalExpiryTracker::new),
            settings: self.settings,
            store,
            bus,
            index: InvalidationIndex::new(),
            locks: KeyLockRegistry::new(),
            observer: RwLock::new(self.observer),
        });

        let handler: Arc<dyn RouteResetHandler> = manager.clone();
        let handler: Weak<dyn RouteResetHandler> = Arc::downgrade(&handler);
        manager.bus.listen(handler).await;

        if let Some(interval) = sweep_interval {
            CacheManager::spawn_sweeper(&manager, interval);
        }

        tracing::info!(
            service = %manager.settings.service_name,
            backend = manager.store.backend_name(),
            channel = %manager.bus.channel(),
            sweep_interval_ms = manager.settings.sweep_interval_ms,
            "cache manager started"
        );
        Ok(manager)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn manager(store: &MemoryStore) -> Arc<CacheManager> {
        CacheManager::builder(CacheSettings::new("orders"))
            .store(Arc::new(store.clone()))
            .start()
            .await
            .unwrap()
    }

    fn key(route: &str, id: i64) -> CacheKey {
        KeyParts::new("orders", "GET", route)
            .with_argument("id", serde_json::json!(id))
            .build()
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let calls = AtomicUsize::new(0);
        let k = key("api/orders/{id}", 1);

        for _ in 0..3 {
            let value = manager
                .get_or_add(&k, &ResetBy::new(), EntryOptions::default(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, CacheError>(Some("order-1".to_string()))
                })
                .await
                .unwrap();
            assert_eq!(value.as_deref(), Some("order-1"));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(store.contains(k.as_str()));
        assert!(manager.index().contains_key(k.as_str()));
    }

    #[tokio::test]
    async fn test_producer_error_propagates_and_caches_nothing() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let k = key("api/orders/{id}", 2);

        let err = manager
            .get_or_add(&k, &ResetBy::new(), EntryOptions::default(), || async {
                Err::<Option<String>, _>(std::io::Error::other("db down"))
            })
            .await
            .unwrap_err();
        assert!(err.is_producer());
        assert!(!store.contains(k.as_str()));

        // The lock was released: a second call runs its producer.
        let value = tokio::time::timeout(
            Duration::from_secs(1),
            manager.get_or_add(&k, &ResetBy::new(), EntryOptions::default(), || async {
                Ok::<_, CacheError>(Some("ok".to_string()))
            }),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(value.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn test_reserved_value_is_rejected() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let k = key("api/orders/{id}", 3);

        let err = manager
            .get_or_add(&k, &ResetBy::new(), EntryOptions::default(), || async {
                Ok::<_, CacheError>(Some(codec::NULL_TOKEN.to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::ReservedValue { .. }));
        assert!(!store.contains(k.as_str()));
    }

    #[tokio::test]
    async fn test_reset_key_publishes_own_route() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let upstream = key("api/orders/{id}", 4);
        let downstream = KeyParts::new("orders", "GET", "api/summary").build();
        let depends = ResetBy::new().dependency(upstream.route().clone());

        manager
            .get_or_add(&upstream, &ResetBy::new(), EntryOptions::default(), || async {
                Ok::<_, CacheError>(Some("order".to_string()))
            })
            .await
            .unwrap();
        manager
            .get_or_add(&downstream, &depends, EntryOptions::default(), || async {
                Ok::<_, CacheError>(Some("summary".to_string()))
            })
            .await
            .unwrap();

        manager.reset_key(upstream.as_str()).await;

        for _ in 0..100 {
            if !store.contains(downstream.as_str()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!store.contains(upstream.as_str()));
        assert!(!store.contains(downstream.as_str()));
        assert!(!manager.index().contains_key(downstream.as_str()));
    }

    #[tokio::test]
    async fn test_key_parts_follow_query_policy() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let key = manager.key_parts("GET", "api/orders").with_query("page", "2").build();
        assert_eq!(key.as_str(), "orders$get$api/orders$");

        let mut settings = CacheSettings::new("orders");
        settings.defaults.use_query_in_key = true;
        let manager = CacheManager::builder(settings)
            .store(Arc::new(store.clone()))
            .start()
            .await
            .unwrap();
        let key = manager.key_parts("GET", "api/orders").with_query("page", "2").build();
        assert_eq!(key.as_str(), r#"orders$get$api/orders$${"page":["2"]}"#);
    }

    #[tokio::test]
    async fn test_sweep_disabled_by_default() {
        let store = MemoryStore::new();
        let manager = manager(&store).await;
        assert_eq!(manager.sweep_expired().await, 0);
        assert_eq!(manager.stats().tracked_keys, 0);
    }

    #[tokio::test]
    async fn test_invalid_settings_rejected() {
        let result = CacheManager::builder(CacheSettings::default())
            .store(Arc::new(MemoryStore::new()))
            .start()
            .await;
        assert!(matches!(result, Err(CacheError::Config { .. })));
    }

    #[tokio::test]
    async fn test_observer_installed_once() {
        struct Counting(AtomicUsize);
        impl CacheObserver for Counting {
            fn on_hit(&self, _key: &str) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let store = MemoryStore::new();
        let manager = manager(&store).await;
        let first = Arc::new(Counting(AtomicUsize::new(0)));
        let second = Arc::new(Counting(AtomicUsize::new(0)));
        manager.set_observer_if_unset(first.clone());
        manager.set_observer_if_unset(second.clone());

        let k = key("api/orders/{id}", 5);
        for _ in 0..2 {
            manager
                .get_or_add(&k, &ResetBy::new(), EntryOptions::default(), || async {
                    Ok::<_, CacheError>(Some("v".to_string()))
                })
                .await
                .unwrap();
        }

        assert_eq!(first.0.load(Ordering::SeqCst), 1);
        assert_eq!(second.0.load(Ordering::SeqCst), 0);
    }
}
