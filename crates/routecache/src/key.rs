//! Deterministic cache key construction.
//!
//! ## Key Format
//!
//! ```text
//! route key: {service}${method}${route}              e.g. orders$get$api/orders/{id}
//! cache key: {route key}${arguments}[${query}]       e.g. orders$get$api/orders/{id}${"id":7}
//! ```
//!
//! Both are lower-cased. Arguments and query parameters are serialized with
//! sorted keys so that equal logical requests always produce equal keys,
//! regardless of the order in which the caller collected them.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Value};

/// Coarse identifier of a route: `service$method$route`.
///
/// Acts as an entry's own publish tag and as the tag another entry can
/// declare a dependency on. May be empty when the route is blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RouteKey(String);

impl RouteKey {
    /// Build the route key for a `(service, method, route)` triple.
    ///
    /// A blank route yields an empty key, which never gets published.
    pub fn new(service: &str, method: &str, route: &str) -> Self {
        if route.trim().is_empty() {
            return Self::default();
        }
        Self(compose_route(service, method, route))
    }

    /// Route key of another (micro)service's endpoint this entry depends on.
    #[inline]
    pub fn for_route(service: &str, method: &str, route: &str) -> Self {
        Self(compose_route(service, method, route))
    }

    /// Route key from a raw tag, e.g. one received from the bus or typed by
    /// an operator. Normalized the same way as composed keys.
    pub fn from_tag(tag: impl AsRef<str>) -> Self {
        Self(normalize_tag(tag.as_ref().trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RouteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RouteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn compose_route(service: &str, method: &str, route: &str) -> String {
    normalize_tag(&format!("{service}${method}${route}"))
}

fn normalize_tag(tag: &str) -> String {
    tag.trim_end_matches('/').to_lowercase()
}

/// Raw ingredients of a cache key, as extracted from a call by the caller.
#[derive(Debug, Clone, Default)]
pub struct KeyParts {
    pub service: String,
    pub method: String,
    pub route: String,
    pub arguments: Option<Map<String, Value>>,
    pub query: Option<BTreeMap<String, Vec<String>>>,
    /// Leave query parameters out of the key even when present.
    pub ignore_query: bool,
}

impl KeyParts {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        route: impl Into<String>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            route: route.into(),
            ..Default::default()
        }
    }

    /// Add one named call argument.
    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments
            .get_or_insert_with(Map::new)
            .insert(name.into(), value);
        self
    }

    /// Replace the whole argument set.
    pub fn with_arguments(mut self, arguments: Map<String, Value>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    /// Append a query parameter value. Repeated names accumulate values.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query
            .get_or_insert_with(BTreeMap::new)
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Whether query parameters take part in the key.
    pub fn include_query(mut self, enabled: bool) -> Self {
        self.ignore_query = !enabled;
        self
    }

    pub fn build(&self) -> CacheKey {
        CacheKey::build(self)
    }
}

/// Case-normalized cache key together with the route key it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    route: RouteKey,
}

impl CacheKey {
    /// Build the cache key for the given parts.
    pub fn build(parts: &KeyParts) -> Self {
        let route_segment = compose_route(&parts.service, &parts.method, &parts.route);

        let arguments = parts
            .arguments
            .as_ref()
            .map(|args| canonical_json(&Value::Object(args.clone())))
            .unwrap_or_default();

        let query = match &parts.query {
            Some(query) if !parts.ignore_query && !query.is_empty() => {
                format!("${}", canonical_query(query))
            }
            _ => String::new(),
        };

        Self {
            key: format!("{route_segment}${arguments}{query}").to_lowercase(),
            route: RouteKey::new(&parts.service, &parts.method, &parts.route),
        }
    }

    /// Pair an already-built key string with its route key.
    pub fn from_parts(key: impl Into<String>, route: RouteKey) -> Self {
        Self {
            key: key.into(),
            route,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn route(&self) -> &RouteKey {
        &self.route
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Serialize a JSON value with object keys sorted and null members dropped.
fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> = map
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k, canonicalize(v)))
                .collect();
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn canonical_query(query: &BTreeMap<String, Vec<String>>) -> String {
    let mut out = Map::new();
    for (name, values) in query {
        let mut values = values.clone();
        values.sort();
        out.insert(
            name.clone(),
            Value::Array(values.into_iter().map(Value::String).collect()),
        );
    }
    Value::Object(out).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_route_key_format() {
        let route = RouteKey::new("Orders", "GET", "api/Orders/{id}/");
        assert_eq!(route.as_str(), "orders$get$api/orders/{id}");
    }

    #[test]
    fn test_blank_route_has_no_route_key() {
        assert!(RouteKey::new("orders", "GET", "  ").is_empty());
        let key = KeyParts::new("orders", "GET", "").build();
        assert!(key.route().is_empty());
        assert_eq!(key.as_str(), "orders$get$$");
    }

    #[test]
    fn test_cache_key_without_arguments() {
        let key = KeyParts::new("orders", "GET", "api/orders").build();
        assert_eq!(key.as_str(), "orders$get$api/orders$");
        assert_eq!(key.route().as_str(), "orders$get$api/orders");
    }

    #[test]
    fn test_cache_key_is_lowercased() {
        let key = KeyParts::new("Orders", "GET", "api/orders")
            .with_argument("Name", json!("Alice"))
            .build();
        assert_eq!(key.as_str(), r#"orders$get$api/orders${"name":"alice"}"#);
    }

    #[test]
    fn test_argument_order_does_not_matter() {
        let a = KeyParts::new("orders", "GET", "api/orders")
            .with_argument("page", json!(2))
            .with_argument("filter", json!({"status": "open", "customer": 12}))
            .build();
        let b = KeyParts::new("orders", "GET", "api/orders")
            .with_argument("filter", json!({"customer": 12, "status": "open"}))
            .with_argument("page", json!(2))
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_arguments_are_dropped() {
        let a = KeyParts::new("orders", "GET", "api/orders")
            .with_argument("page", json!(1))
            .with_argument("cursor", Value::Null)
            .build();
        let b = KeyParts::new("orders", "GET", "api/orders")
            .with_argument("page", json!(1))
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let a = KeyParts::new("orders", "GET", "api/orders")
            .with_query("tag", "b")
            .with_query("sort", "asc")
            .with_query("tag", "a")
            .build();
        let b = KeyParts::new("orders", "GET", "api/orders")
            .with_query("sort", "asc")
            .with_query("tag", "a")
            .with_query("tag", "b")
            .build();
        assert_eq!(a, b);
        assert_eq!(
            a.as_str(),
            r#"orders$get$api/orders$${"sort":["asc"],"tag":["a","b"]}"#
        );
    }

    #[test]
    fn test_query_changes_key() {
        let plain = KeyParts::new("orders", "GET", "api/orders").build();
        let with_query = KeyParts::new("orders", "GET", "api/orders")
            .with_query("page", "2")
            .build();
        assert_ne!(plain, with_query);
        assert_eq!(plain.route(), with_query.route());

        let ignored = KeyParts::new("orders", "GET", "api/orders")
            .with_query("page", "2")
            .include_query(false)
            .build();
        assert_eq!(plain, ignored);
    }

    #[test]
    fn test_raw_tags_are_normalized() {
        let composed = RouteKey::for_route("Orders", "GET", "api/Orders/");
        assert_eq!(RouteKey::from_tag("Orders$GET$api/Orders/"), composed);
        assert_eq!(RouteKey::from_tag("  orders$get$api/orders  "), composed);
        assert!(RouteKey::from_tag("   ").is_empty());
    }

    #[test]
    fn test_dependency_route_matches_route_key() {
        let own = KeyParts::new("catalog", "GET", "api/products/").build();
        let dep = RouteKey::for_route("Catalog", "get", "api/products");
        assert_eq!(own.route(), &dep);
    }
}
