//! Cache metrics.
//!
//! Recorded through the `metrics` facade; installing a recorder/exporter is
//! up to the host application.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metric names as constants for consistency.
pub mod names {
    pub const HITS_TOTAL: &str = "routecache_hits_total";
    pub const MISSES_TOTAL: &str = "routecache_misses_total";
    pub const RESETS_TOTAL: &str = "routecache_resets_total";
    pub const PUBLISH_FAILURES_TOTAL: &str = "routecache_publish_failures_total";
    pub const RECOMPUTE_DURATION_SECONDS: &str = "routecache_recompute_duration_seconds";
    pub const TRACKED_KEYS: &str = "routecache_tracked_keys";
}

/// Why a key was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    Entity,
    Route,
    Sweep,
    Direct,
}

impl ResetReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Entity => "entity",
            Self::Route => "route",
            Self::Sweep => "sweep",
            Self::Direct => "direct",
        }
    }
}

/// Record a cache hit.
pub fn record_hit() {
    counter!(names::HITS_TOTAL).increment(1);
}

/// Record a cache miss that led to a recomputation.
pub fn record_miss(elapsed: Duration) {
    counter!(names::MISSES_TOTAL).increment(1);
    histogram!(names::RECOMPUTE_DURATION_SECONDS).record(elapsed.as_secs_f64());
}

/// Record a key reset.
pub fn record_reset(reason: ResetReason) {
    counter!(names::RESETS_TOTAL, "reason" => reason.as_str()).increment(1);
}

/// Record a failed invalidation publish.
pub fn record_publish_failure() {
    counter!(names::PUBLISH_FAILURES_TOTAL).increment(1);
}

/// Set the number of keys with a local expiry record.
pub fn set_tracked_keys(count: usize) {
    gauge!(names::TRACKED_KEYS).set(count as f64);
}
