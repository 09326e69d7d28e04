//! Watcher error hierarchy.
//!
//! Categorized by operational concern: caller subscription defects, change-log
//! failures, configuration problems, and lifecycle signals. Every variant is
//! `Clone` so the terminal cause of a stopped watcher can be cached and handed
//! to every waiter.

use crate::WatchKey;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// Caller defects in the subscription registry (duplicate or unknown
    /// registrations).
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    /// Change-log read failures.
    #[error(transparent)]
    Log(#[from] LogError),

    /// The change log has dropped history the watcher had not yet consumed.
    /// Downstream caches may be stale in an undetectable way, so the whole
    /// owning process must restart, not just this watcher.
    #[error("change log history lost; owning process must restart")]
    RestartRequired,

    /// Configuration load or validation failures.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The watcher is shutting down. Not a failure: `Watcher::wait` reports a
    /// clean shutdown when this is the loop's exit cause.
    #[error("watcher is shutting down")]
    Cancelled,
}

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Error::Config(e.to_string())
    }
}

/// Registering or removing a watch in a way the registry forbids.
/// These indicate a bug in the caller, not in the watcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SubscriptionError {
    /// The channel is already registered for the key.
    #[error("channel already registered for {key}")]
    Duplicate { key: WatchKey },

    /// No matching registration exists for the key and channel.
    #[error("no channel registered for {key}")]
    Unknown { key: WatchKey },
}

/// Failures reported by the external change-log reader.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LogError {
    /// Generic read failure; terminates the watcher.
    #[error("change log read failed: {0}")]
    Io(String),

    /// The log's retention window advanced past the reader's position.
    /// Distinguished from `Io` because lost entries cannot be resynchronized.
    #[error("change log position lost")]
    PositionLost,
}
