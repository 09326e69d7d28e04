//! Request messages delivered from the public API into the coordinator loop.

use tokio::sync::mpsc;
use tokio::sync::oneshot;

use super::WatchEntry;
use crate::Change;
use crate::DocId;
use crate::Result;
use crate::WatchKey;

#[derive(Debug)]
pub(crate) enum Request {
    /// Register one watch entry. The coordinator answers on `registered`
    /// once the registry mutation has been applied (or rejected).
    Watch {
        key: WatchKey,
        entry: WatchEntry,
        registered: oneshot::Sender<Result<()>>,
    },

    /// Register one channel against a set of documents in a collection,
    /// atomically: either every id is registered or none is.
    WatchMulti {
        collection: String,
        ids: Vec<DocId>,
        ch: mpsc::Sender<Change>,
        completed: oneshot::Sender<Result<()>>,
    },

    /// Remove a registration. Fire-and-forget: removing an unknown
    /// registration is a caller bug and terminates the watcher.
    Unwatch {
        key: WatchKey,
        ch: mpsc::Sender<Change>,
    },

    /// Force an out-of-cycle sync pass.
    Sync,
}
