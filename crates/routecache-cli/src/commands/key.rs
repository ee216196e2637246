use anyhow::{Context, Result};
use routecache::KeyParts;

use crate::cli::KeyArgs;
use crate::output::print_field;

fn split_pair<'a>(pair: &'a str, what: &str) -> Result<(&'a str, &'a str)> {
    pair.split_once('=')
        .with_context(|| format!("Invalid {what} \"{pair}\". Expected format: name=value"))
}

/// Build the key from command-line parts.
pub fn build(args: &KeyArgs) -> Result<routecache::CacheKey> {
    let mut parts = KeyParts::new(&args.service, &args.method, &args.route);

    for pair in &args.args {
        let (name, raw) = split_pair(pair, "argument")?;
        // Bare words are taken as strings.
        let value = serde_json::from_str(raw)
            .unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
        parts = parts.with_argument(name, value);
    }

    for pair in &args.query {
        let (name, value) = split_pair(pair, "query parameter")?;
        parts = parts.with_query(name, value);
    }

    Ok(parts.build())
}

pub fn show(args: &KeyArgs) -> Result<()> {
    let key = build(args)?;
    print_field("Key", key.as_str());
    print_field("Route", key.route().as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(arguments: &[&str], query: &[&str]) -> KeyArgs {
        KeyArgs {
            service: "orders".into(),
            method: "GET".into(),
            route: "api/orders/{id}".into(),
            args: arguments.iter().map(|s| s.to_string()).collect(),
            query: query.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_build_parses_json_and_bare_arguments() {
        let key = build(&args(&["id=7", "name=bob"], &[])).unwrap();
        assert_eq!(
            key.as_str(),
            r#"orders$get$api/orders/{id}${"id":7,"name":"bob"}"#
        );
        assert_eq!(key.route().as_str(), "orders$get$api/orders/{id}");
    }

    #[test]
    fn test_build_rejects_malformed_pairs() {
        assert!(build(&args(&["id"], &[])).is_err());
        assert!(build(&args(&[], &["sort"])).is_err());
    }
}
