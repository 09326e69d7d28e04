//! In-memory capped change log.
//!
//! The embedded counterpart of the external log: producers append delta
//! batches, the watcher reads them through the [`ChangeLog`] contract. The
//! log retains only the most recent `capacity` entries, so a reader that
//! falls behind the retention window observes [`LogError::PositionLost`],
//! just like a capped on-disk log overflowing.

use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::trace;

use super::ChangeLog;
use super::DeltaBatch;
use super::EntryId;
use super::LogEntry;
use super::LogIter;
use crate::LogError;

pub struct MemChangeLog {
    inner: RwLock<MemChangeLogInner>,
}

struct MemChangeLogInner {
    entries: VecDeque<LogEntry>,
    next_id: EntryId,
    capacity: usize,
}

impl MemChangeLog {
    /// Creates an empty log retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "change log capacity must be positive");
        Self {
            inner: RwLock::new(MemChangeLogInner {
                entries: VecDeque::with_capacity(capacity),
                next_id: 1,
                capacity,
            }),
        }
    }

    /// Appends one log entry holding the given delta batches and returns the
    /// id assigned to it. The oldest entry is evicted once the log is full.
    pub fn append(
        &self,
        batches: Vec<DeltaBatch>,
    ) -> EntryId {
        let mut inner = self.inner.write();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.push_back(LogEntry { id, batches });
        if inner.entries.len() > inner.capacity {
            let evicted = inner.entries.pop_front();
            trace!("evicted log entry: {:?}", evicted.map(|e| e.id));
        }
        id
    }

    /// Number of currently retained entries.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().entries.is_empty()
    }
}

#[async_trait]
impl ChangeLog for MemChangeLog {
    async fn most_recent_id(&self) -> std::result::Result<Option<EntryId>, LogError> {
        Ok(self.inner.read().entries.back().map(|e| e.id))
    }

    async fn read_since(
        &self,
        since: Option<EntryId>,
    ) -> std::result::Result<Box<dyn LogIter>, LogError> {
        let inner = self.inner.read();
        let oldest_retained = inner.entries.front().map(|e| e.id);
        // A reader positioned at `since` has consumed everything up to and
        // including that id; eviction of any later entry loses its position.
        // A `None` reader has consumed nothing, so any eviction at all does.
        let next_unread = since.map_or(1, |s| s + 1);
        match oldest_retained {
            Some(oldest) => {
                if next_unread < oldest {
                    return Err(LogError::PositionLost);
                }
            }
            None => {
                if next_unread < inner.next_id {
                    return Err(LogError::PositionLost);
                }
            }
        }
        // Snapshot newer-than-since entries, newest first.
        let entries: Vec<LogEntry> = inner
            .entries
            .iter()
            .rev()
            .take_while(|e| since.map_or(true, |s| e.id > s))
            .cloned()
            .collect();
        Ok(Box::new(MemLogIter {
            entries: entries.into_iter(),
        }))
    }
}

struct MemLogIter {
    entries: std::vec::IntoIter<LogEntry>,
}

#[async_trait]
impl LogIter for MemLogIter {
    async fn next(&mut self) -> std::result::Result<Option<LogEntry>, LogError> {
        Ok(self.entries.next())
    }
}
