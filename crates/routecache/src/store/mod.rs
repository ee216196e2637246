//! Remote key-value store contract.
//!
//! The cache treats the shared store as the single source of truth for
//! values. Two backends are provided:
//!
//! - **Memory**: single-process store, also used to simulate several
//!   instances sharing one store in tests
//! - **Redis**: shared store across instances, pub/sub for invalidation
//!
//! Values are opaque strings; see [`crate::codec`] for how `None` and empty
//! values are represented.

pub mod memory;
pub mod redis;

use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::CacheResult;

pub use memory::MemoryStore;
pub use redis::RedisStore;

/// Stream of raw messages received on a subscribed channel.
///
/// The stream ends when the underlying subscription is lost.
pub type MessageStream = BoxStream<'static, String>;

/// Per-write options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreFlags {
    /// Do not wait for the store to acknowledge the write; failures are
    /// logged instead of returned.
    pub fire_and_forget: bool,
}

impl StoreFlags {
    pub const NONE: StoreFlags = StoreFlags {
        fire_and_forget: false,
    };

    pub const FIRE_AND_FORGET: StoreFlags = StoreFlags {
        fire_and_forget: true,
    };
}

/// Thin contract over the shared key-value service.
///
/// Implementations must be thread-safe (`Send + Sync`). A `get` that finds
/// nothing returns `Ok(None)`; errors are reserved for infrastructure
/// failures.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a value.
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    /// Write a value, overwriting any existing one. `ttl = None` keeps the
    /// value until it is deleted.
    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
        flags: StoreFlags,
    ) -> CacheResult<()>;

    /// Delete a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Publish a message to every subscriber of `channel`.
    async fn publish(&self, channel: &str, message: &str) -> CacheResult<()>;

    /// Subscribe to `channel`.
    async fn subscribe(&self, channel: &str) -> CacheResult<MessageStream>;

    /// Name of the backend for logging.
    fn backend_name(&self) -> &'static str;
}
