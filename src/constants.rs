// -
// Revision number sentinels

/// Revno reported for a deleted document. Any negative revno observed from
/// the log is normalized to this value before delivery.
pub const REVNO_DELETED: i64 = -1;

/// Internal "never observed" sentinel used as the initial revno of a
/// document-level watch. Must never reach a subscriber channel.
pub(crate) const REVNO_NEVER_OBSERVED: i64 = -2;

/// Initial revno recorded for collection-wide watch entries. Collection
/// watches see every change, so the value is never consulted.
pub(crate) const REVNO_COLLECTION_WATCH: i64 = 0;

// -
// Tunables

/// Default delay between two sync passes, in milliseconds.
/// It must not be changed while any watch is active.
pub(crate) const DEFAULT_SYNC_PERIOD_MS: u64 = 5_000;

/// Default capacity of the coordinator's request channel.
pub(crate) const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 16;
