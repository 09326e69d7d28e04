//! Core notification types shared between the watcher and its subscribers.

use std::fmt;

use crate::constants::REVNO_DELETED;

/// Identity of a watched document. The underlying log stores heterogeneous
/// ids; strings and integers cover every producer in practice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocId {
    Str(String),
    Int(i64),
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        DocId::Str(value.to_string())
    }
}

impl From<String> for DocId {
    fn from(value: String) -> Self {
        DocId::Str(value)
    }
}

impl From<i64> for DocId {
    fn from(value: i64) -> Self {
        DocId::Int(value)
    }
}

impl fmt::Display for DocId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match self {
            DocId::Str(s) => write!(f, "{:?}", s),
            DocId::Int(i) => write!(f, "{}", i),
        }
    }
}

/// A single document change observed from the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Collection holding the document.
    pub collection: String,

    /// The document's id within the collection.
    pub id: DocId,

    /// Latest known revision number for the document, or
    /// [`REVNO_DELETED`] if the document was removed.
    pub revno: i64,
}

impl Change {
    /// Whether this change reports a deletion.
    pub fn is_deleted(&self) -> bool {
        self.revno == REVNO_DELETED
    }
}

/// Identifies either one document or an entire collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub(crate) collection: String,
    // None when watching the whole collection
    pub(crate) id: Option<DocId>,
}

impl WatchKey {
    /// Key for a single document.
    pub fn document(
        collection: impl Into<String>,
        id: impl Into<DocId>,
    ) -> Self {
        Self {
            collection: collection.into(),
            id: Some(id.into()),
        }
    }

    /// Key for an entire collection.
    pub fn collection(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            id: None,
        }
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn doc_id(&self) -> Option<&DocId> {
        self.id.as_ref()
    }

    /// Returns whether this key, which may refer to a particular document or
    /// an entire collection, matches `other`, which refers to a particular
    /// document.
    pub(crate) fn matches(
        &self,
        other: &WatchKey,
    ) -> bool {
        if self.collection != other.collection {
            return false;
        }
        match &self.id {
            // refers to the entire collection
            None => true,
            Some(id) => Some(id) == other.id.as_ref(),
        }
    }
}

impl fmt::Display for WatchKey {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        match &self.id {
            None => write!(f, "collection {:?}", self.collection),
            Some(id) => write!(f, "document {} in collection {:?}", id, self.collection),
        }
    }
}
