//! The work queue engine.
//!
//! [`WorkQueue`] is stateless: every piece of coordination state (the
//! group cursor, pending lists, ownership, idle timers) lives in the
//! [`LogBackend`]. The engine adds no locking, so any number of instances
//! may run against the same log and group from separate tasks, threads, or
//! processes.
//!
//! Dequeue here is receive-and-complete: an entry is delivered, processed,
//! and acknowledged within one call. The only window that leaves an entry
//! pending is a crash strictly between delivery and acknowledgment (or a
//! [`peek`](WorkQueue::peek), which deliberately never acknowledges); the
//! reclaim path exists to recover exactly those entries.

pub mod reclaim;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::codec::{self, WorkItem};
use crate::config::QueueSettings;
use crate::error::QueueError;
use crate::log::{LogBackend, LogEntry, StartPosition};
use crate::metrics::{
    ACK_FAILURES_TOTAL, DELIVERY_LATENCY_SECONDS, ITEMS_COMPLETED_TOTAL, ITEMS_ENQUEUED_TOTAL,
    ITEMS_RECLAIMED_TOTAL, MALFORMED_RECORDS_TOTAL,
};

use self::reclaim::{ReclaimOptions, ReclaimPolicy};

/// Options for constructing a [`WorkQueue`].
#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Consumer group the queue operates in.
    pub group: String,
    /// Default block timeout used when
    /// [`receive_with_reclaim`](WorkQueue::receive_with_reclaim) falls
    /// through to a fresh read.
    pub block_timeout: Duration,
    pub reclaim: ReclaimOptions,
}

impl QueueOptions {
    /// Options with the default block timeout and reclaim policy.
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            block_timeout: Duration::from_secs(5),
            reclaim: ReclaimOptions::default(),
        }
    }

    pub fn from_settings(settings: &QueueSettings) -> Self {
        Self {
            group: settings.group.clone(),
            block_timeout: Duration::from_millis(settings.block_timeout_ms),
            reclaim: ReclaimOptions {
                min_idle: Duration::from_millis(settings.reclaim_min_idle_ms),
                scan_count: settings.reclaim_scan_count,
            },
        }
    }
}

/// An item handed to a consumer, together with its log entry ID.
#[derive(Debug, Clone)]
pub struct ReceivedItem {
    /// Backend-assigned entry ID; the unit of acknowledgment and claim.
    pub entry_id: String,
    pub item: WorkItem,
}

/// Point-in-time queue counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    /// Entries in the log, acknowledged or not.
    pub total_entries: u64,
    /// Entries delivered but not yet acknowledged.
    pub pending_count: u64,
}

/// Priority-tagged work queue over an append-only log.
///
/// Priority is carried as metadata on every item but does not influence
/// delivery order: entries are linearized strictly by append order. Consumer
/// names are always supplied by the caller; the engine never defaults them,
/// so concurrent consumers stay distinguishable in the pending list.
pub struct WorkQueue {
    backend: Arc<dyn LogBackend>,
    group: String,
    block_timeout: Duration,
    reclaim: ReclaimPolicy,
}

impl WorkQueue {
    /// Create a queue over `backend`, creating the consumer group if it does
    /// not exist yet (an existing group is left untouched).
    pub async fn new(
        backend: Arc<dyn LogBackend>,
        options: QueueOptions,
    ) -> Result<Self, QueueError> {
        backend
            .create_group(&options.group, StartPosition::Beginning)
            .await?;
        Ok(Self {
            backend,
            group: options.group,
            block_timeout: options.block_timeout,
            reclaim: ReclaimPolicy::new(options.reclaim),
        })
    }

    /// Append a work item, returning its entry ID.
    ///
    /// No priority-based placement occurs; the backend linearizes entries by
    /// append order. Fails only when the backend is unreachable.
    pub async fn enqueue(
        &self,
        payload: impl Into<String>,
        priority: i64,
    ) -> Result<String, QueueError> {
        let item = WorkItem::new(payload, priority);
        let entry_id = self.backend.append(&codec::encode(&item)).await?;
        ITEMS_ENQUEUED_TOTAL.inc();
        tracing::debug!(entry_id = %entry_id, priority = item.priority, "work item enqueued");
        Ok(entry_id)
    }

    /// Receive the next unclaimed entry for `consumer` and complete it in
    /// the same call: decode, process, acknowledge.
    ///
    /// Blocks up to `block` when the log is drained; `None` or a zero
    /// duration return immediately. `Ok(None)` is the normal empty signal,
    /// never an error.
    pub async fn receive_and_complete(
        &self,
        consumer: &str,
        block: Option<Duration>,
    ) -> Result<Option<ReceivedItem>, QueueError> {
        let mut delivered = self
            .backend
            .read_new(&self.group, consumer, 1, block, false)
            .await?;
        match delivered.pop() {
            Some(entry) => self.finish(consumer, entry).await.map(Some),
            None => Ok(None),
        }
    }

    /// Look at the next entry without completing it.
    ///
    /// Not a read-only peek: the entry is delivered into `consumer`'s
    /// pending set and counts against it until someone calls
    /// [`complete`](WorkQueue::complete) or the reclaim path takes it over
    /// once it has sat idle past the threshold.
    pub async fn peek(&self, consumer: &str) -> Result<Option<ReceivedItem>, QueueError> {
        let mut delivered = self
            .backend
            .read_new(&self.group, consumer, 1, None, true)
            .await?;
        let Some(entry) = delivered.pop() else {
            return Ok(None);
        };
        let item = decode_entry(&entry)?;
        tracing::debug!(
            entry_id = %entry.id,
            consumer = %consumer,
            "entry peeked, left pending"
        );
        Ok(Some(ReceivedItem {
            entry_id: entry.id,
            item,
        }))
    }

    /// Recover a stalled entry if one exists, otherwise receive fresh work.
    ///
    /// A recovered entry is re-delivered to `consumer` and completed by the
    /// same receive-and-complete logic as a fresh one. The fallthrough read
    /// uses the configured block timeout.
    pub async fn receive_with_reclaim(
        &self,
        consumer: &str,
    ) -> Result<Option<ReceivedItem>, QueueError> {
        if let Some(entry) = self
            .reclaim
            .reclaim_one(self.backend.as_ref(), &self.group, consumer)
            .await?
        {
            ITEMS_RECLAIMED_TOTAL.inc();
            tracing::info!(
                entry_id = %entry.id,
                consumer = %consumer,
                "reclaimed stalled entry"
            );
            return self.finish(consumer, entry).await.map(Some);
        }
        self.receive_and_complete(consumer, Some(self.block_timeout))
            .await
    }

    /// Acknowledge an entry by ID, removing it from the pending set.
    ///
    /// For entries obtained through [`peek`](WorkQueue::peek), and for
    /// discarding entries a [`MalformedRecord`](QueueError::MalformedRecord)
    /// error left pending. The engine never discards those on its own.
    /// Returns whether the entry was still pending.
    pub async fn complete(&self, entry_id: &str) -> Result<bool, QueueError> {
        let acked = self
            .backend
            .acknowledge(&self.group, entry_id)
            .await
            .map_err(|source| QueueError::AckFailed {
                entry_id: entry_id.to_string(),
                source,
            })?;
        if acked {
            ITEMS_COMPLETED_TOTAL.inc();
        }
        Ok(acked)
    }

    /// Log length and group pending count. Best-effort: a group with no
    /// pending list yet reports zero pending rather than failing.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let total_entries = self.backend.len().await?;
        let pending_count = self.backend.pending_count(&self.group).await?;
        Ok(QueueStats {
            total_entries,
            pending_count,
        })
    }

    /// Drop the oldest entries until at most `max_len` remain.
    pub async fn trim(&self, max_len: u64) -> Result<u64, QueueError> {
        let removed = self.backend.trim(max_len).await?;
        if removed > 0 {
            tracing::info!(removed, max_len, "trimmed log");
        }
        Ok(removed)
    }

    /// Decode, process, and acknowledge one delivered entry.
    async fn finish(&self, consumer: &str, entry: LogEntry) -> Result<ReceivedItem, QueueError> {
        let item = decode_entry(&entry)?;

        // Processing hook: runs before the acknowledgment.
        tracing::info!(
            entry_id = %entry.id,
            consumer = %consumer,
            priority = item.priority,
            "processing work item"
        );

        match self.backend.acknowledge(&self.group, &entry.id).await {
            Ok(acked) => {
                if !acked {
                    // Someone else already removed it; the work is done
                    // either way.
                    tracing::debug!(entry_id = %entry.id, "entry was no longer pending at ack");
                }
            }
            Err(source) => {
                ACK_FAILURES_TOTAL.inc();
                return Err(QueueError::AckFailed {
                    entry_id: entry.id,
                    source,
                });
            }
        }

        ITEMS_COMPLETED_TOTAL.inc();
        observe_delivery_latency(item.created_at);

        Ok(ReceivedItem {
            entry_id: entry.id,
            item,
        })
    }
}

fn decode_entry(entry: &LogEntry) -> Result<WorkItem, QueueError> {
    codec::decode(&entry.fields).map_err(|source| {
        MALFORMED_RECORDS_TOTAL.inc();
        tracing::warn!(entry_id = %entry.id, error = %source, "malformed record");
        QueueError::MalformedRecord {
            entry_id: entry.id.clone(),
            source,
        }
    })
}

fn observe_delivery_latency(created_at: i64) {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let elapsed = now.saturating_sub(created_at);
    if elapsed >= 0 {
        DELIVERY_LATENCY_SECONDS.observe(elapsed as f64 / 1e9);
    }
}
