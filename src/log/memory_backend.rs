//! In-memory log backend.
//!
//! Implements the full [`LogBackend`] contract (consumer-group cursors,
//! pending lists, idle timers, delivery counts, blocking reads) against a
//! single in-process log. Used for unit and integration tests and for local
//! development without a Redis server; entries are lost on restart.
//!
//! Operations against a group that was never created behave like the empty
//! group: reads deliver nothing, the pending list is empty and its count is
//! zero. The engine always creates its group up front, so this path is only
//! reachable through direct backend use.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use crate::codec::RecordFields;

use super::backend::{BackendError, LogBackend, LogEntry, PendingEntry, StartPosition};

/// In-memory, single-log backend.
///
/// One `Mutex` guards the whole log state: the group cursor and the pending
/// list must move together when an entry is delivered. Critical sections
/// never hold the lock across an await.
pub struct MemoryLogBackend {
    state: Mutex<LogState>,
    /// Wakes readers blocked in `read_new` when an entry is appended.
    appended: Notify,
}

#[derive(Default)]
struct LogState {
    /// Sequence number for the next appended entry; starts at 1.
    next_seq: u64,
    /// The log proper, in append order. Trimmed entries are removed.
    entries: BTreeMap<u64, RecordFields>,
    groups: HashMap<String, GroupState>,
}

struct GroupState {
    /// Lowest sequence number not yet delivered as new to any consumer.
    cursor: u64,
    pending: BTreeMap<u64, PendingState>,
}

struct PendingState {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

impl MemoryLogBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                next_seq: 1,
                ..LogState::default()
            }),
            appended: Notify::new(),
        }
    }

    fn format_id(seq: u64) -> String {
        format!("{seq}-0")
    }

    fn parse_id(entry_id: &str) -> Option<u64> {
        let seq = entry_id.split('-').next()?;
        seq.parse().ok()
    }

    /// Deliver up to `count` undelivered entries to `consumer`, moving them
    /// into the group's pending list. Returns an empty vec when the group is
    /// unknown or caught up.
    fn deliver_new(
        state: &mut LogState,
        group: &str,
        consumer: &str,
        count: usize,
    ) -> Vec<LogEntry> {
        let Some(group_state) = state.groups.get_mut(group) else {
            return Vec::new();
        };

        let mut delivered = Vec::new();
        for (&seq, fields) in state.entries.range(group_state.cursor..).take(count) {
            group_state.pending.insert(
                seq,
                PendingState {
                    consumer: consumer.to_string(),
                    delivered_at: Instant::now(),
                    delivery_count: 1,
                },
            );
            group_state.cursor = seq + 1;
            delivered.push(LogEntry {
                id: Self::format_id(seq),
                fields: fields.clone(),
            });
        }
        delivered
    }
}

impl Default for MemoryLogBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LogBackend for MemoryLogBackend {
    async fn create_group(&self, group: &str, start: StartPosition) -> Result<(), BackendError> {
        let mut state = self.state.lock().await;
        if state.groups.contains_key(group) {
            return Ok(());
        }
        let cursor = match start {
            StartPosition::Beginning => 1,
            StartPosition::End => state.next_seq,
        };
        state.groups.insert(
            group.to_string(),
            GroupState {
                cursor,
                pending: BTreeMap::new(),
            },
        );
        tracing::debug!(group = %group, cursor, "consumer group created");
        Ok(())
    }

    async fn append(&self, fields: &RecordFields) -> Result<String, BackendError> {
        let id = {
            let mut state = self.state.lock().await;
            let seq = state.next_seq;
            state.next_seq += 1;
            state.entries.insert(seq, fields.clone());
            Self::format_id(seq)
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn read_new(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block: Option<Duration>,
        _no_ack: bool,
    ) -> Result<Vec<LogEntry>, BackendError> {
        let wait = block.filter(|d| !d.is_zero());
        let deadline = wait.map(|d| Instant::now() + d);

        loop {
            // Register for wakeups before checking state so an append between
            // the check and the await cannot be missed.
            let notified = self.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                let delivered = Self::deliver_new(&mut state, group, consumer, count);
                if !delivered.is_empty() {
                    return Ok(delivered);
                }
            }

            let Some(deadline) = deadline else {
                return Ok(Vec::new());
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(deadline - now, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, group: &str, entry_id: &str) -> Result<bool, BackendError> {
        let Some(seq) = Self::parse_id(entry_id) else {
            return Ok(false);
        };
        let mut state = self.state.lock().await;
        let acked = state
            .groups
            .get_mut(group)
            .map(|g| g.pending.remove(&seq).is_some())
            .unwrap_or(false);
        Ok(acked)
    }

    async fn list_pending(
        &self,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, BackendError> {
        let state = self.state.lock().await;
        let Some(group_state) = state.groups.get(group) else {
            return Ok(Vec::new());
        };
        let pending = group_state
            .pending
            .iter()
            .take(count)
            .map(|(&seq, p)| PendingEntry {
                id: Self::format_id(seq),
                consumer: p.consumer.clone(),
                idle: p.delivered_at.elapsed(),
                delivery_count: p.delivery_count,
            })
            .collect();
        Ok(pending)
    }

    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> Result<Vec<LogEntry>, BackendError> {
        let mut state = self.state.lock().await;
        let mut claimed = Vec::new();

        for entry_id in entry_ids {
            let Some(seq) = Self::parse_id(entry_id) else {
                continue;
            };
            // Split-borrow dance: look up fields first, then mutate the group.
            let fields = match state.entries.get(&seq) {
                Some(fields) => fields.clone(),
                None => {
                    // Entry was trimmed out from under its pending record.
                    if let Some(g) = state.groups.get_mut(group) {
                        g.pending.remove(&seq);
                    }
                    continue;
                }
            };
            let Some(group_state) = state.groups.get_mut(group) else {
                break;
            };
            let Some(pending) = group_state.pending.get_mut(&seq) else {
                continue;
            };
            // Idle is re-validated at claim time: an owner that resumed and
            // reset its timer keeps the entry.
            if pending.delivered_at.elapsed() < min_idle {
                continue;
            }
            pending.consumer = consumer.to_string();
            pending.delivered_at = Instant::now();
            pending.delivery_count += 1;
            claimed.push(LogEntry {
                id: entry_id.clone(),
                fields,
            });
        }

        Ok(claimed)
    }

    async fn len(&self) -> Result<u64, BackendError> {
        let state = self.state.lock().await;
        Ok(state.entries.len() as u64)
    }

    async fn pending_count(&self, group: &str) -> Result<u64, BackendError> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .get(group)
            .map(|g| g.pending.len() as u64)
            .unwrap_or(0))
    }

    async fn trim(&self, max_len: u64) -> Result<u64, BackendError> {
        let mut state = self.state.lock().await;
        let mut removed = 0;
        while state.entries.len() as u64 > max_len && state.entries.pop_first().is_some() {
            removed += 1;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(payload: &str) -> RecordFields {
        vec![("item".to_string(), payload.to_string())]
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_ids() {
        let backend = MemoryLogBackend::new();
        let a = backend.append(&fields("a")).await.unwrap();
        let b = backend.append(&fields("b")).await.unwrap();
        assert_eq!(a, "1-0");
        assert_eq!(b, "2-0");
        assert_eq!(backend.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_create_group_is_idempotent() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_group_started_at_end_skips_existing_entries() {
        let backend = MemoryLogBackend::new();
        backend.append(&fields("old")).await.unwrap();
        backend.create_group("g", StartPosition::End).await.unwrap();

        let read = backend.read_new("g", "c1", 1, None, false).await.unwrap();
        assert!(read.is_empty());

        backend.append(&fields("new")).await.unwrap();
        let read = backend.read_new("g", "c1", 1, None, false).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].fields, fields("new"));
    }

    #[tokio::test]
    async fn test_read_new_moves_entry_to_pending() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        backend.append(&fields("a")).await.unwrap();

        let read = backend.read_new("g", "c1", 1, None, false).await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(backend.pending_count("g").await.unwrap(), 1);

        let pending = backend.list_pending("g", 10).await.unwrap();
        assert_eq!(pending[0].consumer, "c1");
        assert_eq!(pending[0].delivery_count, 1);
    }

    #[tokio::test]
    async fn test_no_duplicate_fresh_delivery_across_consumers() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        backend.append(&fields("a")).await.unwrap();

        let first = backend.read_new("g", "c1", 1, None, false).await.unwrap();
        let second = backend.read_new("g", "c2", 1, None, false).await.unwrap();
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_acknowledge_removes_from_pending() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        let id = backend.append(&fields("a")).await.unwrap();
        backend.read_new("g", "c1", 1, None, false).await.unwrap();

        assert!(backend.acknowledge("g", &id).await.unwrap());
        assert_eq!(backend.pending_count("g").await.unwrap(), 0);

        // Second acknowledgment is a no-op, not an error.
        assert!(!backend.acknowledge("g", &id).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_respects_min_idle() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        let id = backend.append(&fields("a")).await.unwrap();
        backend.read_new("g", "c1", 1, None, false).await.unwrap();

        // Freshly delivered: idle below threshold, claim is a no-op.
        let claimed = backend
            .claim("g", "c2", Duration::from_millis(50), &[id.clone()])
            .await
            .unwrap();
        assert!(claimed.is_empty());

        tokio::time::sleep(Duration::from_millis(80)).await;
        let claimed = backend
            .claim("g", "c2", Duration::from_millis(50), &[id])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        let pending = backend.list_pending("g", 10).await.unwrap();
        assert_eq!(pending[0].consumer, "c2");
        assert_eq!(pending[0].delivery_count, 2);
    }

    #[tokio::test]
    async fn test_claim_resets_idle_timer() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        let id = backend.append(&fields("a")).await.unwrap();
        backend.read_new("g", "c1", 1, None, false).await.unwrap();

        tokio::time::sleep(Duration::from_millis(80)).await;
        let claimed = backend
            .claim("g", "c2", Duration::from_millis(50), &[id.clone()])
            .await
            .unwrap();
        assert_eq!(claimed.len(), 1);

        // Idle restarted at the claim, so a concurrent second claim loses.
        let claimed = backend
            .claim("g", "c3", Duration::from_millis(50), &[id])
            .await
            .unwrap();
        assert!(claimed.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let backend = std::sync::Arc::new(MemoryLogBackend::new());
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();

        let reader = backend.clone();
        let handle = tokio::spawn(async move {
            reader
                .read_new("g", "c1", 1, Some(Duration::from_secs(5)), false)
                .await
                .unwrap()
        });

        tokio::time::sleep(Duration::from_millis(30)).await;
        backend.append(&fields("late")).await.unwrap();

        let read = handle.await.unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].fields, fields("late"));
    }

    #[tokio::test]
    async fn test_blocking_read_times_out_empty() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();

        let start = Instant::now();
        let read = backend
            .read_new("g", "c1", 1, Some(Duration::from_millis(60)), false)
            .await
            .unwrap();
        assert!(read.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_zero_block_returns_immediately() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();

        let start = Instant::now();
        let read = backend
            .read_new("g", "c1", 1, Some(Duration::ZERO), false)
            .await
            .unwrap();
        assert!(read.is_empty());
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_unknown_group_reads_as_empty() {
        let backend = MemoryLogBackend::new();
        backend.append(&fields("a")).await.unwrap();

        assert!(backend
            .read_new("ghost", "c1", 1, None, false)
            .await
            .unwrap()
            .is_empty());
        assert!(backend.list_pending("ghost", 10).await.unwrap().is_empty());
        assert_eq!(backend.pending_count("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_trim_drops_oldest_entries() {
        let backend = MemoryLogBackend::new();
        for i in 0..5 {
            backend.append(&fields(&format!("e{i}"))).await.unwrap();
        }

        let removed = backend.trim(2).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(backend.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_claim_of_trimmed_entry_is_dropped() {
        let backend = MemoryLogBackend::new();
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        let id = backend.append(&fields("a")).await.unwrap();
        backend.read_new("g", "c1", 1, None, false).await.unwrap();
        backend.trim(0).await.unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let claimed = backend
            .claim("g", "c2", Duration::ZERO, &[id])
            .await
            .unwrap();
        assert!(claimed.is_empty());
        assert_eq!(backend.pending_count("g").await.unwrap(), 0);
    }
}
