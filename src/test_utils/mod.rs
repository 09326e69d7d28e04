//! Shared helpers between unit tests and integration tests.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::changelog::DeltaBatch;
use crate::Change;
use crate::DocId;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    env_logger::init();
});

pub fn enable_logger() {
    *LOGGER_INIT;
}

/// Builds a delta batch for `collection` from (id, revno) pairs.
pub fn batch(
    collection: &str,
    pairs: &[(&str, i64)],
) -> DeltaBatch {
    DeltaBatch::new(
        collection,
        pairs.iter().map(|(id, _)| DocId::from(*id)).collect(),
        pairs.iter().map(|(_, revno)| *revno).collect(),
    )
}

pub fn change(
    collection: &str,
    id: &str,
    revno: i64,
) -> Change {
    Change {
        collection: collection.to_string(),
        id: DocId::from(id),
        revno,
    }
}

/// Receives the next change, failing the test if none arrives in time.
pub async fn recv_change(rx: &mut mpsc::Receiver<Change>) -> Change {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("Should receive a change in time")
        .expect("Change channel closed unexpectedly")
}

/// Asserts that no change is delivered within a short window.
pub async fn assert_no_change(rx: &mut mpsc::Receiver<Change>) {
    if let Ok(Some(change)) = timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected change delivered: {:?}", change);
    }
}
