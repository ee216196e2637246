use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bus::DEFAULT_CHANNEL;
use crate::error::{CacheError, CacheResult};
use crate::store::StoreFlags;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Name of this service; first segment of every key it builds.
    #[serde(default)]
    pub service_name: String,
    #[serde(default)]
    pub store: StoreConfig,
    /// Pub/sub channel shared by all instances of the deployment
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Sweep interval for locally expired entries. Unset disables the sweep.
    #[serde(default)]
    pub sweep_interval_ms: Option<u64>,
    #[serde(default)]
    pub defaults: EntryDefaults,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            service_name: String::new(),
            store: StoreConfig::default(),
            channel: default_channel(),
            sweep_interval_ms: None,
            defaults: EntryDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl CacheSettings {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        self.sweep_interval_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.service_name.trim().is_empty() {
            return Err("service_name must not be empty".into());
        }
        if self.channel.trim().is_empty() {
            return Err("channel must not be empty".into());
        }
        if self.sweep_interval_ms == Some(0) {
            return Err("sweep_interval_ms must be > 0 when set".into());
        }
        if self.store.enabled && self.store.pool_size == 0 {
            return Err("store.pool_size must be > 0".into());
        }
        if self.store.enabled && self.store.url.trim().is_empty() {
            return Err("store.url must not be empty when the store is enabled".into());
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }
}

fn default_channel() -> String {
    DEFAULT_CHANNEL.to_string()
}

/// Remote store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Use Redis; when disabled (or unreachable) an in-process store is used
    #[serde(default = "default_store_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://127.0.0.1:6379")
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_store_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_store_enabled() -> bool {
    true
}

fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_store_pool_size() -> usize {
    10
}

fn default_store_timeout_ms() -> u64 {
    5000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            enabled: default_store_enabled(),
            url: default_store_url(),
            pool_size: default_store_pool_size(),
            timeout_ms: default_store_timeout_ms(),
        }
    }
}

/// Defaults applied to entries that carry no explicit options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntryDefaults {
    /// Remote TTL and local expiry in seconds. Unset keeps entries until reset.
    #[serde(default)]
    pub expiry_secs: Option<u64>,
    /// Include extra query string parameters in the cache key
    #[serde(default)]
    pub use_query_in_key: bool,
    /// Write to the store without waiting for acknowledgement
    #[serde(default)]
    pub fire_and_forget: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Options for one cached entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryOptions {
    /// Remote TTL and local expiry. `None` keeps the entry until reset.
    pub expiry: Option<Duration>,
    pub flags: StoreFlags,
}

impl EntryOptions {
    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            expiry: Some(expiry),
            ..Default::default()
        }
    }

    pub fn from_defaults(defaults: &EntryDefaults) -> Self {
        Self {
            expiry: defaults.expiry_secs.map(Duration::from_secs),
            flags: StoreFlags {
                fire_and_forget: defaults.fire_and_forget,
            },
        }
    }
}

pub mod loader {
    use super::CacheSettings;
    use crate::error::{CacheError, CacheResult};
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "routecache.toml";

    pub fn load_settings(path: Option<&str>) -> CacheResult<CacheSettings> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if pathbuf.exists() {
                    builder = builder.add_source(File::from(pathbuf));
                }
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // Environment variable overrides, e.g., ROUTECACHE__STORE__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("ROUTECACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::config(format!("config build error: {e}")))?;
        let settings: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| CacheError::config(format!("config deserialize error: {e}")))?;
        settings.validate().map_err(CacheError::config)?;
        Ok(settings)
    }

    pub fn load_settings_from<P: AsRef<Path>>(path: P) -> CacheResult<CacheSettings> {
        let p = path.as_ref().to_string_lossy().to_string();
        load_settings(Some(&p))
    }
}

/// Validate settings, turning the message into a [`CacheError`].
pub(crate) fn ensure_valid(settings: &CacheSettings) -> CacheResult<()> {
    settings.validate().map_err(CacheError::config)
}
