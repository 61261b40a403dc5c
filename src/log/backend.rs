//! Backend trait for append-only log storage.
//!
//! This module defines the abstraction layer for the log store the queue
//! engine runs on, allowing different implementations (Redis Streams,
//! in-memory) to be used interchangeably. All coordination state (pending
//! lists, entry ownership, idle timers) lives behind this trait; the engine
//! adds no locking of its own.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::RecordFields;

/// Errors that can occur during log backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Redis operation failed
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Backend cannot be reached (connection refused, dropped, or I/O failure)
    #[error("log backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Whether this error is a connectivity failure rather than a command
    /// failure. Connectivity failures are retryable at the integration layer.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_))
    }
}

/// Where a newly created consumer group starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPosition {
    /// Deliver every entry already in the log.
    Beginning,
    /// Deliver only entries appended after group creation.
    End,
}

/// One entry read from the log: its backend-assigned ID plus raw fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Backend-assigned, monotonically increasing within the log.
    pub id: String,
    /// Raw field-value pairs; decoded by the codec layer.
    pub fields: RecordFields,
}

/// One entry in a group's pending list: delivered but not yet acknowledged.
#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub id: String,
    /// Consumer currently owning the entry.
    pub consumer: String,
    /// Time since the entry was last delivered to its owner.
    pub idle: Duration,
    /// Number of times the entry has been delivered.
    pub delivery_count: u64,
}

/// Append-only, consumer-group-capable log store.
///
/// Implementations must provide the atomicity guarantees the engine depends
/// on:
///
/// - appends are atomic and IDs increase monotonically;
/// - [`read_new`](LogBackend::read_new) atomically marks an entry as
///   delivered-and-pending to exactly one consumer; no two consumers ever
///   receive the same entry as new;
/// - [`claim`](LogBackend::claim) atomically transfers ownership and
///   re-validates the minimum idle time at claim time, so a consumer that
///   resumed right before a reclaim wins the race;
/// - [`acknowledge`](LogBackend::acknowledge) atomically and permanently
///   removes an entry from the pending set.
///
/// Implementations must be `Send + Sync`; the engine is shared across tasks.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Create a consumer group. Idempotent: creating a group that already
    /// exists is not an error.
    async fn create_group(&self, group: &str, start: StartPosition) -> Result<(), BackendError>;

    /// Append a record to the log, returning its assigned entry ID.
    async fn append(&self, fields: &RecordFields) -> Result<String, BackendError>;

    /// Read up to `count` entries not yet delivered to any consumer in the
    /// group, delivering them to `consumer` and adding them to the group's
    /// pending list.
    ///
    /// `block` bounds how long to wait for an entry to arrive; `None` or a
    /// zero duration return immediately. An empty result is the normal
    /// "nothing available" signal, never an error.
    ///
    /// `no_ack` declares that this read cycle will not be followed by an
    /// acknowledgment (the peek mode). Delivered entries still enter the
    /// pending list and stay there until explicitly acknowledged or claimed
    /// away.
    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        no_ack: bool,
    ) -> Result<Vec<LogEntry>, BackendError>;

    /// Remove an entry from the group's pending list. Returns whether the
    /// entry was pending; acknowledging an unknown or already-acknowledged
    /// entry returns `false`, not an error.
    async fn acknowledge(&self, group: &str, entry_id: &str) -> Result<bool, BackendError>;

    /// List up to `count` pending entries across all consumers of the group,
    /// oldest entry ID first. A group with no pending list yet yields an
    /// empty list.
    async fn list_pending(&self, group: &str, count: usize)
        -> Result<Vec<PendingEntry>, BackendError>;

    /// Transfer ownership of the listed entries to `consumer`, but only for
    /// entries whose idle time still exceeds `min_idle` at claim time.
    /// Returns the successfully claimed entries; entries that lost the idle
    /// re-check (their owner resumed) are silently skipped.
    ///
    /// A successful claim resets the entry's idle timer and increments its
    /// delivery count.
    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> Result<Vec<LogEntry>, BackendError>;

    /// Total number of entries in the log, acknowledged or not.
    async fn len(&self) -> Result<u64, BackendError>;

    /// Number of pending entries in the group. A group with no pending list
    /// yet reads as zero, never an error.
    async fn pending_count(&self, group: &str) -> Result<u64, BackendError>;

    /// Drop the oldest entries until at most `max_len` remain, returning how
    /// many were removed. Pending bookkeeping for trimmed entries is left to
    /// expire through the claim path.
    async fn trim(&self, max_len: u64) -> Result<u64, BackendError>;
}
