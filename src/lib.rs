//! A change-log watcher for cluster-state notification fan-out.
//!
//! The watcher consumes an abstract, append-only log of document deltas
//! (see [`ChangeLog`]) and turns it into typed [`Change`] notifications
//! delivered to any number of independent subscriber channels, with strict
//! per-pass de-duplication, chronological ordering, and recovery semantics.
//!
//! All mutable state (subscriptions, log cursor, pending deliveries) is owned
//! by a single coordinating task; the public [`Watcher`] handle communicates
//! with it exclusively through message passing.

mod changelog;
mod config;
mod constants;
mod core;
mod errors;
mod types;

pub use changelog::*;
pub use config::*;
pub use constants::REVNO_DELETED;
pub use errors::*;
pub use types::*;

pub use self::core::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
