//! Watcher configuration.
//!
//! Loaded with priority: hardcoded defaults, then an optional TOML file, then
//! `WATCHER__*` environment variables (highest priority).

use std::time::Duration;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;

use crate::constants::DEFAULT_REQUEST_QUEUE_CAPACITY;
use crate::constants::DEFAULT_SYNC_PERIOD_MS;
use crate::Error;
use crate::Result;

#[derive(Debug, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Delay between two sync passes, in milliseconds.
    /// Must not be changed while any watch is active.
    #[serde(default = "default_sync_period_ms")]
    pub sync_period_ms: u64,

    /// Capacity of the coordinator's request channel.
    #[serde(default = "default_request_queue_capacity")]
    pub request_queue_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            sync_period_ms: default_sync_period_ms(),
            request_queue_capacity: default_request_queue_capacity(),
        }
    }
}

impl WatcherConfig {
    /// Load configuration from an optional file path with an environment
    /// variable overlay, e.g. `WATCHER__SYNC_PERIOD_MS=100`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        if let Some(path) = path {
            config = config.add_source(File::with_name(path).required(true));
        }

        config = config.add_source(
            Environment::with_prefix("WATCHER")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let settings: Self = config.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.sync_period_ms == 0 {
            return Err(Error::Config(
                "sync_period_ms must be greater than 0".into(),
            ));
        }
        if self.request_queue_capacity == 0 {
            return Err(Error::Config(
                "request_queue_capacity must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_ms)
    }
}

fn default_sync_period_ms() -> u64 {
    DEFAULT_SYNC_PERIOD_MS
}

fn default_request_queue_capacity() -> usize {
    DEFAULT_REQUEST_QUEUE_CAPACITY
}
