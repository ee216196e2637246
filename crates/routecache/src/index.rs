//! Process-local reverse index from invalidation tags to cache keys.
//!
//! ## Structure
//!
//! ```text
//! relationships:  cache key        → Relationship { route, entity tags, dependency routes }
//! entity buckets: entity tag       → {cache key, ...}
//! route buckets:  dependency route → {cache key, ...}
//! ```
//!
//! Every bucket has its own lock, so resets of unrelated tags never
//! serialize against each other.

use std::any::type_name;
use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::key::RouteKey;

/// Which group resets should clear an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResetBy {
    /// Domain-entity tags; a mutation of any of these clears the entry.
    pub entity_tags: Vec<String>,
    /// Routes this entry depends on; resetting any of them cascades here.
    pub dependency_routes: Vec<RouteKey>,
}

impl ResetBy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset when entity type `T` changes.
    pub fn entity<T: ?Sized>(self) -> Self {
        self.entity_tag(entity_tag::<T>())
    }

    pub fn entity_tag(mut self, tag: impl Into<String>) -> Self {
        self.entity_tags.push(tag.into());
        self
    }

    pub fn dependency(mut self, route: RouteKey) -> Self {
        self.dependency_routes.push(route);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entity_tags.is_empty() && self.dependency_routes.is_empty()
    }
}

/// Tag identifying the Rust type `T` as a domain entity.
pub fn entity_tag<T: ?Sized>() -> String {
    type_name::<T>().to_string()
}

/// Binding of one cache key to its own route and the tags it is filed under.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relationship {
    pub route: RouteKey,
    pub entity_tags: Vec<String>,
    pub dependency_routes: Vec<String>,
}

impl Relationship {
    pub fn new(route: RouteKey, reset_by: &ResetBy) -> Self {
        Self {
            route,
            entity_tags: reset_by.entity_tags.clone(),
            dependency_routes: reset_by
                .dependency_routes
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| r.as_str().to_string())
                .collect(),
        }
    }
}

type Bucket = Arc<Mutex<HashSet<String>>>;

/// Tag-keyed map of individually locked key sets.
///
/// Drained buckets stay in the map empty. Dropping them would race a
/// concurrent `add` that already holds the bucket's `Arc`, losing its key,
/// so the map grows with the number of distinct tags ever registered.
#[derive(Debug, Default)]
struct BucketMap {
    buckets: DashMap<String, Bucket>,
}

impl BucketMap {
    fn bucket(&self, tag: &str) -> Bucket {
        if let Some(bucket) = self.buckets.get(tag) {
            return Arc::clone(bucket.value());
        }
        Arc::clone(self.buckets.entry(tag.to_string()).or_default().value())
    }

    fn add(&self, tag: &str, key: &str) -> bool {
        self.bucket(tag).lock().insert(key.to_string())
    }

    fn remove(&self, tag: &str, key: &str) -> bool {
        match self.buckets.get(tag) {
            Some(bucket) => bucket.lock().remove(key),
            None => false,
        }
    }

    /// Take every key out of the bucket in one step.
    fn drain(&self, tag: &str) -> HashSet<String> {
        match self.buckets.get(tag) {
            Some(bucket) => std::mem::take(&mut *bucket.lock()),
            None => HashSet::new(),
        }
    }

    fn contains(&self, tag: &str, key: &str) -> bool {
        self.buckets
            .get(tag)
            .is_some_and(|bucket| bucket.lock().contains(key))
    }

    fn len(&self) -> usize {
        self.buckets.len()
    }
}

/// Reverse index of entity tags and dependency routes to cache keys.
#[derive(Debug, Default)]
pub struct InvalidationIndex {
    relationships: DashMap<String, Relationship>,
    entities: BucketMap,
    routes: BucketMap,
}

impl InvalidationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `relationship` for `key` and file the key under its tags.
    ///
    /// Registering the same relationship again is a no-op; tags dropped
    /// since the previous registration are unlinked.
    pub fn register(&self, key: &str, relationship: Relationship) {
        for tag in &relationship.entity_tags {
            self.entities.add(tag, key);
        }
        for route in &relationship.dependency_routes {
            self.routes.add(route, key);
        }

        let previous = self.relationships.insert(key.to_string(), relationship);

        if let Some(previous) = previous {
            if let Some(current) = self.relationships.get(key) {
                for tag in previous
                    .entity_tags
                    .iter()
                    .filter(|t| !current.entity_tags.contains(t))
                {
                    self.entities.remove(tag, key);
                }
                for route in previous
                    .dependency_routes
                    .iter()
                    .filter(|r| !current.dependency_routes.contains(r))
                {
                    self.routes.remove(route, key);
                }
            }
        }
    }

    /// Drop the relationship for `key` and unlink it from every bucket.
    pub fn remove(&self, key: &str) -> Option<Relationship> {
        let (_, relationship) = self.relationships.remove(key)?;
        for tag in &relationship.entity_tags {
            self.entities.remove(tag, key);
        }
        for route in &relationship.dependency_routes {
            self.routes.remove(route, key);
        }
        Some(relationship)
    }

    /// Drain the buckets of every tag, returning each key once.
    pub fn drain_entity_tags<I, S>(&self, tags: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut keys = Vec::new();
        for tag in tags {
            for key in self.entities.drain(tag.as_ref()) {
                if seen.insert(key.clone()) {
                    keys.push(key);
                }
            }
        }
        keys
    }

    /// Drain the bucket of keys depending on `route`.
    pub fn drain_dependency_route(&self, route: &str) -> Vec<String> {
        self.routes.drain(route).into_iter().collect()
    }

    pub fn relationship(&self, key: &str) -> Option<Relationship> {
        self.relationships.get(key).map(|r| r.value().clone())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.relationships.contains_key(key)
    }

    pub fn is_filed_under_entity(&self, tag: &str, key: &str) -> bool {
        self.entities.contains(tag, key)
    }

    pub fn is_filed_under_route(&self, route: &str, key: &str) -> bool {
        self.routes.contains(route, key)
    }

    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relationships.is_empty()
    }

    pub fn entity_bucket_count(&self) -> usize {
        self.entities.len()
    }

    pub fn route_bucket_count(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order;
    struct Customer;

    fn relationship(route: &str, reset_by: &ResetBy) -> Relationship {
        Relationship::new(RouteKey::from_tag(route), reset_by)
    }

    #[test]
    fn test_entity_tag_uses_type_name() {
        let reset_by = ResetBy::new().entity::<Order>();
        assert_eq!(reset_by.entity_tags, vec![entity_tag::<Order>()]);
        assert_ne!(entity_tag::<Order>(), entity_tag::<Customer>());
    }

    #[test]
    fn test_register_files_key_under_all_tags() {
        let index = InvalidationIndex::new();
        let reset_by = ResetBy::new()
            .entity_tag("order")
            .entity_tag("customer")
            .dependency(RouteKey::for_route("billing", "GET", "api/invoices"));
        index.register("k1", relationship("orders$get$api/orders", &reset_by));

        assert!(index.contains_key("k1"));
        assert!(index.is_filed_under_entity("order", "k1"));
        assert!(index.is_filed_under_entity("customer", "k1"));
        assert!(index.is_filed_under_route("billing$get$api/invoices", "k1"));
    }

    #[test]
    fn test_remove_unlinks_everywhere() {
        let index = InvalidationIndex::new();
        let reset_by = ResetBy::new()
            .entity_tag("order")
            .dependency(RouteKey::from_tag("r"));
        index.register("k1", relationship("own", &reset_by));

        let removed = index.remove("k1").unwrap();
        assert_eq!(removed.route.as_str(), "own");
        assert!(!index.contains_key("k1"));
        assert!(!index.is_filed_under_entity("order", "k1"));
        assert!(!index.is_filed_under_route("r", "k1"));
        assert!(index.remove("k1").is_none());
    }

    #[test]
    fn test_reregister_with_fewer_tags_unlinks_stale_ones() {
        let index = InvalidationIndex::new();
        let both = ResetBy::new().entity_tag("a").entity_tag("b");
        let only_a = ResetBy::new().entity_tag("a");
        index.register("k", relationship("own", &both));
        index.register("k", relationship("own", &only_a));

        assert!(index.is_filed_under_entity("a", "k"));
        assert!(!index.is_filed_under_entity("b", "k"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_drain_deduplicates_across_tags() {
        let index = InvalidationIndex::new();
        let both = ResetBy::new().entity_tag("a").entity_tag("b");
        index.register("k1", relationship("own", &both));
        index.register("k2", relationship("own", &ResetBy::new().entity_tag("b")));

        let mut keys = index.drain_entity_tags(["a", "b"]);
        keys.sort();
        assert_eq!(keys, vec!["k1".to_string(), "k2".to_string()]);
        assert!(index.drain_entity_tags(["a", "b"]).is_empty());
    }

    #[test]
    fn test_drained_buckets_are_kept_and_reused() {
        let index = InvalidationIndex::new();
        let reset_by = ResetBy::new()
            .entity_tag("order")
            .dependency(RouteKey::from_tag("r"));
        index.register("k1", relationship("own", &reset_by));

        assert_eq!(index.drain_entity_tags(["order"]), vec!["k1".to_string()]);
        assert_eq!(index.drain_dependency_route("r"), vec!["k1".to_string()]);
        assert_eq!(index.entity_bucket_count(), 1);
        assert_eq!(index.route_bucket_count(), 1);

        index.register("k2", relationship("own", &reset_by));
        assert!(index.is_filed_under_entity("order", "k2"));
        assert_eq!(index.entity_bucket_count(), 1);
        assert_eq!(index.route_bucket_count(), 1);
    }

    #[test]
    fn test_drain_unknown_tag_is_empty() {
        let index = InvalidationIndex::new();
        assert!(index.drain_entity_tags(["missing"]).is_empty());
        assert!(index.drain_dependency_route("missing").is_empty());
        assert_eq!(index.entity_bucket_count(), 0);
    }

    #[test]
    fn test_empty_dependency_routes_are_ignored() {
        let reset_by = ResetBy::new().dependency(RouteKey::default());
        let rel = Relationship::new(RouteKey::from_tag("own"), &reset_by);
        assert!(rel.dependency_routes.is_empty());
    }
}
