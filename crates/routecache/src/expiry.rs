//! Local expiry bookkeeping for the periodic sweep.
//!
//! The process-local index has no way to learn that a remote TTL lapsed.
//! Each tracked key remembers when it was registered and when it should be
//! considered stale; the sweep resets every key past that instant.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// A cache key with its registration and local expiry instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiryRecord {
    pub key: String,
    pub created_at: Instant,
    /// `None` means the entry never expires locally.
    pub expires_at: Option<Instant>,
}

impl ExpiryRecord {
    pub fn new(key: impl Into<String>, expiry: Option<Duration>) -> Self {
        let created_at = Instant::now();
        Self {
            key: key.into(),
            created_at,
            expires_at: expiry.map(|ttl| created_at + ttl),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|deadline| deadline < now)
    }
}

/// Tracks expiry records and guards against overlapping sweeps.
#[derive(Debug)]
pub struct LocalExpiryTracker {
    records: DashMap<String, ExpiryRecord>,
    interval: Duration,
    sweeping: AtomicBool,
}

impl LocalExpiryTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            records: DashMap::new(),
            interval,
            sweeping: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Insert the record unless the key is already tracked.
    ///
    /// An existing record keeps its first deadline, so repeated reads of
    /// a live entry do not push its local expiry further out.
    pub fn track(&self, record: ExpiryRecord) {
        self.records.entry(record.key.clone()).or_insert(record);
    }

    pub fn untrack(&self, key: &str) -> Option<ExpiryRecord> {
        self.records.remove(key).map(|(_, record)| record)
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Keys whose local expiry has passed at `now`.
    pub fn expired(&self, now: Instant) -> Vec<String> {
        self.records
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Mark a sweep as running. Returns `None` if one already is.
    pub fn begin_sweep(&self) -> Option<SweepGuard<'_>> {
        self.sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SweepGuard { tracker: self })
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Clears the sweeping flag when dropped.
pub struct SweepGuard<'a> {
    tracker: &'a LocalExpiryTracker,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.tracker.sweeping.store(false, Ordering::Release);
    }
}
