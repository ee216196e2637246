use anyhow::{Context, Result};
use colored::Colorize;
use routecache::{
    CacheSettings, InvalidationBus, RemoteStore, RouteKey, codec, create_remote_store,
};
use std::sync::Arc;

use crate::output::{print_cached, print_field, print_success};

async fn connect(settings: &CacheSettings) -> Result<Arc<dyn RemoteStore>> {
    let store = create_remote_store(&settings.store).await;
    if store.backend_name() != "redis" {
        anyhow::bail!(
            "Redis at {} is unavailable; nothing to inspect in a fresh in-process store",
            settings.store.url
        );
    }
    Ok(store)
}

pub async fn get(settings: &CacheSettings, key: &str) -> Result<()> {
    let store = connect(settings).await?;
    let stored = store
        .get(key)
        .await
        .with_context(|| format!("Failed to read {key}"))?;

    match stored {
        Some(raw) => print_cached(codec::decode(&raw).as_deref()),
        None => println!("{} {}", "Not cached:".yellow(), key),
    }
    Ok(())
}

pub async fn delete(settings: &CacheSettings, key: &str, route: Option<&str>) -> Result<()> {
    let store = connect(settings).await?;
    store
        .delete(key)
        .await
        .with_context(|| format!("Failed to delete {key}"))?;
    print_success(&format!("Deleted {}", key.cyan()));

    if let Some(route) = route {
        publish(settings, store, route).await?;
    }
    Ok(())
}

/// Normalize an operator-typed route tag the way composed route keys are.
fn route_tag(raw: &str) -> Result<RouteKey> {
    let route = RouteKey::from_tag(raw);
    if route.is_empty() {
        anyhow::bail!("Route tag must not be empty");
    }
    Ok(route)
}

pub async fn publish_reset(settings: &CacheSettings, route: &str) -> Result<()> {
    let store = connect(settings).await?;
    publish(settings, store, route).await
}

async fn publish(settings: &CacheSettings, store: Arc<dyn RemoteStore>, route: &str) -> Result<()> {
    let route = route_tag(route)?;
    let route = route.as_str();

    let bus = InvalidationBus::new(store, settings.channel.clone());
    if !bus.publish(route).await {
        anyhow::bail!("Failed to publish reset for route {route}");
    }
    print_success(&format!(
        "Published reset for {} on {}",
        route.cyan(),
        settings.channel
    ));
    Ok(())
}

pub fn show_config(settings: &CacheSettings) -> Result<()> {
    let rendered = toml::to_string_pretty(settings).context("Failed to render configuration")?;
    print_field("Service", &settings.service_name);
    println!("{rendered}");
    Ok(())
}
