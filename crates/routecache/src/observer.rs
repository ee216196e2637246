//! Hooks for host applications that want to watch cache activity.
//!
//! Every method has a no-op default. Hooks run synchronously on the calling
//! task, so implementations should be quick and must not panic.

use std::time::Duration;

/// Observer of cache events.
pub trait CacheObserver: Send + Sync {
    /// Value served from the remote store.
    fn on_hit(&self, _key: &str) {}

    /// Value is missing and about to be recomputed.
    fn on_miss(&self, _key: &str) {}

    /// Value was missing and has been recomputed and stored.
    fn on_recomputed(&self, _key: &str, _elapsed: Duration) {}

    /// One cache key was reset (remote entry deleted, index cleaned).
    fn on_key_reset(&self, _key: &str) {}

    /// A route tag was published on the invalidation bus.
    fn on_route_published(&self, _route: &str) {}

    /// A dependency route reset cleared `count` keys.
    fn on_route_reset(&self, _route: &str, _count: usize) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {}
