//! The change-log reader contract consumed by the watcher.
//!
//! The log itself is maintained elsewhere (by the transaction mechanism that
//! mutates the documents); the watcher only reads it. Entries carry opaque but
//! monotonically increasing ids, so "newer than" is well defined.

mod mem;

pub use mem::*;


use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::DocId;
use crate::LogError;

/// Monotonically increasing identity of a log entry.
pub type EntryId = u64;

/// Per-collection delta recorded in one log entry: which documents were
/// touched and the revno each one ended up with. The two sequences are
/// index-aligned and must have equal length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaBatch {
    pub collection: String,
    pub ids: Vec<DocId>,
    pub revnos: Vec<i64>,
}

impl DeltaBatch {
    pub fn new(
        collection: impl Into<String>,
        ids: Vec<DocId>,
        revnos: Vec<i64>,
    ) -> Self {
        Self {
            collection: collection.into(),
            ids,
            revnos,
        }
    }
}

/// One entry of the append-only change log: everything a single transaction
/// touched, grouped per collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: EntryId,
    pub batches: Vec<DeltaBatch>,
}

/// Ordered reader over the append-only change log.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ChangeLog: Send + Sync + 'static {
    /// Id of the most recent entry, or `None` if the log is empty.
    /// Used once at startup to position the cursor so that history predating
    /// the watcher's creation is ignored.
    async fn most_recent_id(&self) -> std::result::Result<Option<EntryId>, LogError>;

    /// Opens an iterator over entries strictly newer than `since`, yielded
    /// newest-first. Fails with [`LogError::PositionLost`], at open or during
    /// iteration, when the log's retention window has advanced past `since`.
    async fn read_since(
        &self,
        since: Option<EntryId>,
    ) -> std::result::Result<Box<dyn LogIter>, LogError>;
}

/// Iterator handed out by [`ChangeLog::read_since`].
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogIter: Send {
    /// The next (older) entry, or `None` when the read is exhausted.
    async fn next(&mut self) -> std::result::Result<Option<LogEntry>, LogError>;
}
