//! The change-log watcher coordinator.
//!
//! A single tokio task owns the subscription registry, the log cursor, and
//! the pending-event queues. The public [`Watcher`] handle is a set of thin
//! wrappers that turn calls into [`Request`] messages; registration calls
//! block until the coordinator has applied them, so a caller can register a
//! watch and then read the watched document knowing no later change will be
//! missed. There is no initial event at this layer.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::trace;
use tracing::warn;

use super::Registry;
use super::Request;
use super::WatchEntry;
use super::WatchFilter;
use crate::changelog::ChangeLog;
use crate::changelog::EntryId;
use crate::constants::REVNO_DELETED;
use crate::Change;
use crate::DocId;
use crate::Error;
use crate::LogError;
use crate::Result;
use crate::WatchKey;
use crate::WatcherConfig;

/// An event queued for delivery to one subscriber channel.
/// `ch` is cleared in place when the registration is removed before the
/// event could be flushed.
#[derive(Debug)]
pub(crate) struct PendingEvent {
    pub(crate) ch: Option<mpsc::Sender<Change>>,
    pub(crate) key: WatchKey,
    pub(crate) revno: i64,
}

/// Handle to a running watcher. Cheap to clone; all clones drive the same
/// coordinator task.
#[derive(Clone)]
pub struct Watcher {
    request_tx: mpsc::Sender<Request>,
    // Dying signal: set by kill(), observed at every suspension point.
    cancel: CancellationToken,
    // Dead signal: set once the coordinator task has terminated.
    dead: CancellationToken,
    terminal: Arc<Mutex<Option<Result<()>>>>,
}

impl Watcher {
    /// Starts a watcher observing `log`. History that precedes this call is
    /// ignored. Must be called from within a tokio runtime.
    pub fn new(
        log: Arc<dyn ChangeLog>,
        config: WatcherConfig,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_capacity);
        let cancel = CancellationToken::new();
        let dead = CancellationToken::new();
        let terminal: Arc<Mutex<Option<Result<()>>>> = Arc::new(Mutex::new(None));

        let mut core = WatcherCore {
            log,
            registry: Registry::default(),
            cursor: None,
            need_sync: true,
            sync_events: Vec::new(),
            request_events: Vec::new(),
            request_rx,
            cancel: cancel.clone(),
            sync_period: config.sync_period(),
        };
        {
            let terminal = terminal.clone();
            let dead = dead.clone();
            tokio::spawn(async move {
                let result = match core.run().await {
                    // An externally requested shutdown is a clean exit.
                    Err(Error::Cancelled) => Ok(()),
                    other => other,
                };
                if let Err(e) = &result {
                    warn!("watcher loop failed: {}", e);
                }
                *terminal.lock() = Some(result);
                dead.cancel();
            });
        }

        Self {
            request_tx,
            cancel,
            dead,
            terminal,
        }
    }

    /// Returns a watcher that is already dead and reports `err` as its
    /// terminal cause.
    pub fn new_dead(err: Error) -> Self {
        let (request_tx, _) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dead = CancellationToken::new();
        dead.cancel();
        Self {
            request_tx,
            cancel,
            dead,
            terminal: Arc::new(Mutex::new(Some(Err(err)))),
        }
    }

    /// Starts watching one document. An event is sent on `ch` whenever the
    /// document's revno is observed to change. Does not return until the
    /// watch is registered; registering the same channel twice for the same
    /// document is a caller bug and fails with
    /// [`SubscriptionError::Duplicate`](crate::SubscriptionError::Duplicate).
    pub async fn watch(
        &self,
        collection: impl Into<String>,
        id: impl Into<DocId>,
        ch: mpsc::Sender<Change>,
    ) -> Result<()> {
        let (registered_tx, registered_rx) = oneshot::channel();
        self.send_and_wait(
            Request::Watch {
                key: WatchKey::document(collection, id),
                entry: WatchEntry::document(ch),
                registered: registered_tx,
            },
            registered_rx,
        )
        .await
    }

    /// Starts watching every document of a collection. Collection-wide
    /// watches see every observed change, not a per-document high-water mark.
    pub async fn watch_collection(
        &self,
        collection: impl Into<String>,
        ch: mpsc::Sender<Change>,
    ) -> Result<()> {
        let (registered_tx, registered_rx) = oneshot::channel();
        self.send_and_wait(
            Request::Watch {
                key: WatchKey::collection(collection),
                entry: WatchEntry::collection(ch, None),
                registered: registered_tx,
            },
            registered_rx,
        )
        .await
    }

    /// Like [`watch_collection`](Self::watch_collection), but an event is
    /// only sent for document ids the filter accepts.
    pub async fn watch_collection_with_filter(
        &self,
        collection: impl Into<String>,
        ch: mpsc::Sender<Change>,
        filter: impl Fn(&DocId) -> bool + Send + Sync + 'static,
    ) -> Result<()> {
        let (registered_tx, registered_rx) = oneshot::channel();
        let filter: WatchFilter = Arc::new(filter);
        self.send_and_wait(
            Request::Watch {
                key: WatchKey::collection(collection),
                entry: WatchEntry::collection(ch, Some(filter)),
                registered: registered_tx,
            },
            registered_rx,
        )
        .await
    }

    /// Registers `ch` against every id in `ids` within one collection, in one
    /// request. Atomic: if the channel is already registered for any of the
    /// ids, the call fails and none of them are registered.
    pub async fn watch_multi(
        &self,
        collection: impl Into<String>,
        ids: Vec<DocId>,
        ch: mpsc::Sender<Change>,
    ) -> Result<()> {
        let (completed_tx, completed_rx) = oneshot::channel();
        self.send_and_wait(
            Request::WatchMulti {
                collection: collection.into(),
                ids,
                ch,
                completed: completed_tx,
            },
            completed_rx,
        )
        .await
    }

    /// Stops watching one document. Fire-and-forget: the returned result only
    /// reports whether the request could be queued. Unwatching something that
    /// was never watched is a caller bug and terminates the watcher; the
    /// cause is reported by [`wait`](Self::wait).
    pub async fn unwatch(
        &self,
        collection: impl Into<String>,
        id: impl Into<DocId>,
        ch: mpsc::Sender<Change>,
    ) -> Result<()> {
        self.send_req(Request::Unwatch {
            key: WatchKey::document(collection, id),
            ch,
        })
        .await
    }

    /// Stops a watch started with [`watch_collection`](Self::watch_collection)
    /// or [`watch_collection_with_filter`](Self::watch_collection_with_filter).
    pub async fn unwatch_collection(
        &self,
        collection: impl Into<String>,
        ch: mpsc::Sender<Change>,
    ) -> Result<()> {
        self.send_req(Request::Unwatch {
            key: WatchKey::collection(collection),
            ch,
        })
        .await
    }

    /// Forces the watcher to run a sync pass without waiting for the timer.
    pub async fn start_sync(&self) -> Result<()> {
        self.send_req(Request::Sync).await
    }

    /// Requests shutdown. Non-blocking; pair with [`wait`](Self::wait).
    pub fn kill(&self) {
        self.cancel.cancel();
    }

    /// Blocks until the watcher has terminated and returns the terminal
    /// cause, or `Ok(())` for an externally requested, clean shutdown.
    pub async fn wait(&self) -> Result<()> {
        self.dead.cancelled().await;
        self.terminal.lock().clone().unwrap_or(Ok(()))
    }

    /// Kill and wait.
    pub async fn stop(&self) -> Result<()> {
        self.kill();
        self.wait().await
    }

    /// Completes once the watcher has terminated.
    pub async fn dead(&self) {
        self.dead.cancelled().await;
    }

    pub fn is_dead(&self) -> bool {
        self.dead.is_cancelled()
    }

    /// The error the watcher stopped with, if it has stopped with one.
    pub fn err(&self) -> Option<Error> {
        self.terminal
            .lock()
            .as_ref()
            .and_then(|result| result.as_ref().err().cloned())
    }

    async fn send_req(
        &self,
        req: Request,
    ) -> Result<()> {
        tokio::select! {
            res = self.request_tx.send(req) => res.map_err(|_| Error::Cancelled),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn send_and_wait(
        &self,
        req: Request,
        answer: oneshot::Receiver<Result<()>>,
    ) -> Result<()> {
        tokio::select! {
            res = self.request_tx.send(req) => {
                if res.is_err() {
                    return Err(Error::Cancelled);
                }
            }
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
        }
        tokio::select! {
            res = answer => res.unwrap_or(Err(Error::Cancelled)),
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

enum FlushQueue {
    // newest first, drained in reverse
    Sync,
    // oldest first, drained in order, may grow mid-flush
    Request,
}

enum FlushStep {
    Request(Option<Request>),
    Sent(bool),
}

/// State owned by the coordinator task. Nothing outside that task ever
/// touches these fields.
pub(crate) struct WatcherCore {
    pub(crate) log: Arc<dyn ChangeLog>,
    pub(crate) registry: Registry,

    /// Most recent log entry observed by a sync pass. `None` until the first
    /// pass of a watcher created against an empty log.
    pub(crate) cursor: Option<EntryId>,

    /// Set when a sync pass should take place.
    pub(crate) need_sync: bool,

    /// Events queued for delivery. `sync_events` is produced newest-first by
    /// the sync pass and drained in reverse, which yields chronological
    /// delivery order. `request_events` is drained oldest-first afterwards.
    pub(crate) sync_events: Vec<PendingEvent>,
    pub(crate) request_events: Vec<PendingEvent>,

    pub(crate) request_rx: mpsc::Receiver<Request>,
    pub(crate) cancel: CancellationToken,
    pub(crate) sync_period: Duration,
}

impl WatcherCore {
    /// The main coordinator loop. Never returns `Ok`: the exit cause is
    /// either [`Error::Cancelled`] or a genuine failure.
    pub(crate) async fn run(&mut self) -> Result<()> {
        self.cursor = self.log.most_recent_id().await.map_err(terminal_cause)?;
        self.need_sync = true;

        let cancel = self.cancel.clone();
        let mut interval = self.sync_interval();
        loop {
            if self.need_sync {
                self.sync().await.map_err(terminal_cause)?;
                self.flush().await?;
                interval.reset();
            }

            let received = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),

                _ = interval.tick() => None,

                req = self.request_rx.recv() => Some(req),
            };
            match received {
                None => self.need_sync = true,
                // every handle holding the request channel is gone
                Some(None) => return Err(Error::Cancelled),
                Some(Some(req)) => {
                    self.handle(req)?;
                    self.flush().await?;
                }
            }
        }
    }

    /// Timer driving the periodic sync passes.
    /// Behavior: if ticks are missed, the timer waits for the next tick
    /// instead of firing immediately.
    fn sync_interval(&self) -> tokio::time::Interval {
        let mut interval = tokio::time::interval(self.sync_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval
    }

    /// One sync pass: drain log entries newer than the cursor and queue
    /// events for the registered watches.
    pub(crate) async fn sync(&mut self) -> std::result::Result<(), LogError> {
        self.need_sync = false;
        // Iterate through log entries in reverse insertion order (newest
        // first). The newest entry becomes the cursor before any processing,
        // so an aborted pass is not replayed.
        let mut iter = self.log.read_since(self.cursor).await?;
        let mut seen: HashSet<WatchKey> = HashSet::new();
        let mut first = true;
        let last = self.cursor;
        while let Some(entry) = iter.next().await? {
            trace!("got change log entry: {}", entry.id);
            if first {
                self.cursor = Some(entry.id);
                first = false;
            }
            if last.map_or(false, |last| entry.id <= last) {
                break;
            }
            for batch in &entry.batches {
                if batch.ids.is_empty() || batch.ids.len() != batch.revnos.len() {
                    warn!(
                        "change log entry {} has invalid delta batch for collection {:?}",
                        entry.id, batch.collection
                    );
                    continue;
                }
                // Walk the batch from its last element to its first: within
                // one entry the most recent row for a duplicated id wins.
                for i in (0..batch.ids.len()).rev() {
                    let key = WatchKey::document(batch.collection.clone(), batch.ids[i].clone());
                    if !seen.insert(key.clone()) {
                        continue;
                    }
                    let mut revno = batch.revnos[i];
                    if revno < 0 {
                        revno = REVNO_DELETED;
                    }
                    // Queue notifications for collection-wide watches.
                    let collection_key = WatchKey::collection(batch.collection.clone());
                    for info in self.registry.entries(&collection_key) {
                        if let Some(filter) = &info.filter {
                            if !filter(&batch.ids[i]) {
                                continue;
                            }
                        }
                        self.sync_events.push(PendingEvent {
                            ch: Some(info.ch.clone()),
                            key: key.clone(),
                            revno,
                        });
                    }
                    // Queue notifications for document-level watches.
                    if let Some(infos) = self.registry.entries_mut(&key) {
                        for info in infos {
                            if revno > info.last_revno || (revno < 0 && info.last_revno >= 0) {
                                info.last_revno = revno;
                                self.sync_events.push(PendingEvent {
                                    ch: Some(info.ch.clone()),
                                    key: key.clone(),
                                    revno,
                                });
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Sends all pending events to their respective channels, staying
    /// responsive to cancellation and to new requests while a slow
    /// subscriber blocks a send.
    pub(crate) async fn flush(&mut self) -> Result<()> {
        // sync_events are stored newest first.
        let mut i = self.sync_events.len();
        while i > 0 {
            i -= 1;
            self.deliver(FlushQueue::Sync, i).await?;
        }
        // request_events are stored oldest first, and may grow during the
        // loop.
        let mut i = 0;
        while i < self.request_events.len() {
            self.deliver(FlushQueue::Request, i).await?;
            i += 1;
        }
        self.sync_events.clear();
        self.request_events.clear();
        Ok(())
    }

    async fn deliver(
        &mut self,
        queue: FlushQueue,
        index: usize,
    ) -> Result<()> {
        let cancel = self.cancel.clone();
        loop {
            // Re-read the event every round: a request handled below may
            // have purged it.
            let event = match queue {
                FlushQueue::Sync => &self.sync_events[index],
                FlushQueue::Request => &self.request_events[index],
            };
            let ch = match &event.ch {
                Some(ch) => ch.clone(),
                None => return Ok(()),
            };
            let change = Change {
                collection: event.key.collection.clone(),
                id: event
                    .key
                    .id
                    .clone()
                    .expect("pending events always reference a document"),
                revno: event.revno,
            };

            let step = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),

                req = self.request_rx.recv() => FlushStep::Request(req),

                res = ch.send(change) => FlushStep::Sent(res.is_ok()),
            };
            match step {
                FlushStep::Request(Some(req)) => {
                    self.handle(req)?;
                    continue;
                }
                FlushStep::Request(None) => return Err(Error::Cancelled),
                FlushStep::Sent(true) => return Ok(()),
                FlushStep::Sent(false) => {
                    // The subscriber dropped its receiver without
                    // unwatching; nothing useful to deliver to.
                    warn!(
                        "dropping change for {}: subscriber channel closed",
                        self.event_key(&queue, index)
                    );
                    return Ok(());
                }
            }
        }
    }

    fn event_key(
        &self,
        queue: &FlushQueue,
        index: usize,
    ) -> &WatchKey {
        match queue {
            FlushQueue::Sync => &self.sync_events[index].key,
            FlushQueue::Request => &self.request_events[index].key,
        }
    }

    /// Applies one request to the coordinator state. A failure here is a
    /// terminal condition for the watcher.
    pub(crate) fn handle(
        &mut self,
        req: Request,
    ) -> Result<()> {
        trace!("got request: {:?}", req);
        match req {
            Request::Sync => {
                self.need_sync = true;
            }
            Request::Watch {
                key,
                entry,
                registered,
            } => {
                let result = self.registry.add(key, entry).map_err(Error::from);
                let _ = registered.send(result);
            }
            Request::WatchMulti {
                collection,
                ids,
                ch,
                completed,
            } => {
                let result = self
                    .registry
                    .add_multi(&collection, ids, ch)
                    .map_err(Error::from);
                let _ = completed.send(result);
            }
            Request::Unwatch { key, ch } => {
                self.registry.remove(&key, &ch)?;
                // Purge matching events that were queued but not yet
                // delivered; the caller believes the watch is gone.
                for event in self
                    .request_events
                    .iter_mut()
                    .chain(self.sync_events.iter_mut())
                {
                    let purge = key.matches(&event.key)
                        && event.ch.as_ref().map_or(false, |c| c.same_channel(&ch));
                    if purge {
                        event.ch = None;
                    }
                }
            }
        }
        Ok(())
    }
}

fn terminal_cause(e: LogError) -> Error {
    match e {
        // Entries may have been lost for good; downstream state can only be
        // repaired by restarting the owning process.
        LogError::PositionLost => Error::RestartRequired,
        other => Error::Log(other),
    }
}
