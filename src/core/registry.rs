//! The subscription registry: which channel wants to hear about which key.
//!
//! Mutated exclusively by the coordinator task, so no locking is involved.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::constants::REVNO_COLLECTION_WATCH;
use crate::constants::REVNO_NEVER_OBSERVED;
use crate::Change;
use crate::DocId;
use crate::SubscriptionError;
use crate::WatchKey;

/// Predicate applied to document ids by collection-wide watches.
pub type WatchFilter = Arc<dyn Fn(&DocId) -> bool + Send + Sync>;

/// One registered observer of a watch key.
pub(crate) struct WatchEntry {
    pub(crate) ch: mpsc::Sender<Change>,
    /// Last revno delivered to this entry. Only consulted for
    /// document-level entries; collection-wide entries see every change.
    pub(crate) last_revno: i64,
    /// Only set on collection-wide entries.
    pub(crate) filter: Option<WatchFilter>,
}

impl WatchEntry {
    pub(crate) fn document(ch: mpsc::Sender<Change>) -> Self {
        Self {
            ch,
            last_revno: REVNO_NEVER_OBSERVED,
            filter: None,
        }
    }

    pub(crate) fn collection(
        ch: mpsc::Sender<Change>,
        filter: Option<WatchFilter>,
    ) -> Self {
        Self {
            ch,
            last_revno: REVNO_COLLECTION_WATCH,
            filter,
        }
    }
}

impl fmt::Debug for WatchEntry {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.debug_struct("WatchEntry")
            .field("last_revno", &self.last_revno)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Registry {
    watches: HashMap<WatchKey, Vec<WatchEntry>>,
}

impl Registry {
    /// Registers `entry` under `key`. Fails without mutating anything if the
    /// entry's channel is already registered for the key.
    pub(crate) fn add(
        &mut self,
        key: WatchKey,
        entry: WatchEntry,
    ) -> std::result::Result<(), SubscriptionError> {
        if self.is_registered(&key, &entry.ch) {
            return Err(SubscriptionError::Duplicate { key });
        }
        self.watches.entry(key).or_default().push(entry);
        Ok(())
    }

    /// Registers `ch` as a document-level watch of every id in `ids`,
    /// atomically: if the channel is already registered for any of the ids
    /// the whole call fails and the registry is left untouched.
    pub(crate) fn add_multi(
        &mut self,
        collection: &str,
        ids: Vec<DocId>,
        ch: mpsc::Sender<Change>,
    ) -> std::result::Result<(), SubscriptionError> {
        for id in &ids {
            let key = WatchKey::document(collection, id.clone());
            if self.is_registered(&key, &ch) {
                return Err(SubscriptionError::Duplicate { key });
            }
        }
        for id in ids {
            let key = WatchKey::document(collection, id);
            self.watches
                .entry(key)
                .or_default()
                .push(WatchEntry::document(ch.clone()));
        }
        Ok(())
    }

    /// Removes the entry registered for (`key`, `ch`). Fails if no such
    /// entry exists.
    pub(crate) fn remove(
        &mut self,
        key: &WatchKey,
        ch: &mpsc::Sender<Change>,
    ) -> std::result::Result<(), SubscriptionError> {
        let entries = match self.watches.get_mut(key) {
            Some(entries) => entries,
            None => return Err(SubscriptionError::Unknown { key: key.clone() }),
        };
        match entries.iter().position(|e| e.ch.same_channel(ch)) {
            Some(i) => {
                entries.swap_remove(i);
                if entries.is_empty() {
                    self.watches.remove(key);
                }
                Ok(())
            }
            None => Err(SubscriptionError::Unknown { key: key.clone() }),
        }
    }

    /// Entries registered for exactly `key`. Document-level matching also
    /// consults the collection-wide key separately.
    pub(crate) fn entries(
        &self,
        key: &WatchKey,
    ) -> &[WatchEntry] {
        self.watches.get(key).map_or(&[], |entries| entries.as_slice())
    }

    pub(crate) fn entries_mut(
        &mut self,
        key: &WatchKey,
    ) -> Option<&mut Vec<WatchEntry>> {
        self.watches.get_mut(key)
    }

    pub(crate) fn is_registered(
        &self,
        key: &WatchKey,
        ch: &mpsc::Sender<Change>,
    ) -> bool {
        self.entries(key).iter().any(|e| e.ch.same_channel(ch))
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.watches.is_empty()
    }
}
