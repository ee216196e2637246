//! Cross-instance invalidation over the store's pub/sub channel.
//!
//! ## Example Flow
//!
//! ```text
//! Instance 1: reset key K (route R = "orders$get$api/orders")
//!   ↓
//! PUBLISH routecache:reset_route "orders$get$api/orders"
//!   ↓
//! Instance 1: listener receives R → resets local dependents of R
//! Instance 2: listener receives R → resets local dependents of R
//! ```
//!
//! Publishing is best-effort. Every instance, including the publisher,
//! handles every message; resetting an empty bucket is a no-op.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::task::JoinHandle;

use crate::error::CacheResult;
use crate::store::{MessageStream, RemoteStore};

/// Default channel shared by all instances of one deployment.
pub const DEFAULT_CHANNEL: &str = "routecache:reset_route";

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Receiver of route tags arriving on the bus.
#[async_trait]
pub trait RouteResetHandler: Send + Sync {
    async fn reset_route(&self, route: &str);
}

/// Publisher and subscriber for route invalidation messages.
#[derive(Clone)]
pub struct InvalidationBus {
    store: Arc<dyn RemoteStore>,
    channel: String,
}

impl InvalidationBus {
    pub fn new(store: Arc<dyn RemoteStore>, channel: impl Into<String>) -> Self {
        Self {
            store,
            channel: channel.into(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Publish a route tag. Failures are logged, never returned.
    pub async fn publish(&self, route: &str) -> bool {
        match self.store.publish(&self.channel, route).await {
            Ok(()) => {
                tracing::debug!(route = %route, channel = %self.channel, "published route reset");
                true
            }
            Err(e) => {
                tracing::warn!(route = %route, error = %e, "failed to publish route reset");
                crate::metrics::record_publish_failure();
                false
            }
        }
    }

    /// Subscribe and forward every message to `handler` in a background task.
    ///
    /// The first subscription is attempted before this returns, so messages
    /// published afterwards are not missed. The task reconnects with
    /// exponential backoff and stops once `handler` has been dropped.
    pub async fn listen(&self, handler: Weak<dyn RouteResetHandler>) -> JoinHandle<()> {
        let first = self.store.subscribe(&self.channel).await;
        let bus = self.clone();
        tokio::spawn(async move { bus.run(first, handler).await })
    }

    async fn run(
        &self,
        mut attempt: CacheResult<MessageStream>,
        handler: Weak<dyn RouteResetHandler>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match attempt {
                Ok(stream) => {
                    tracing::info!(channel = %self.channel, "listening for route resets");
                    backoff = INITIAL_BACKOFF;
                    if !forward(stream, &handler).await {
                        tracing::debug!("route reset handler dropped, stopping listener");
                        return;
                    }
                    tracing::warn!(channel = %self.channel, "invalidation subscription ended, reconnecting");
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        backoff_secs = backoff.as_secs(),
                        "invalidation listener error, reconnecting..."
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }

            if handler.strong_count() == 0 {
                return;
            }
            attempt = self.store.subscribe(&self.channel).await;
        }
    }
}

/// Deliver messages until the stream ends (`true`) or the handler is gone
/// (`false`).
async fn forward(mut stream: MessageStream, handler: &Weak<dyn RouteResetHandler>) -> bool {
    while let Some(route) = stream.next().await {
        let Some(handler) = handler.upgrade() else {
            return false;
        };
        tracing::debug!(route = %route, "received route reset");
        handler.reset_route(&route).await;
    }
    true
}
