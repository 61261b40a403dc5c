//! Recovery of stalled pending entries.
//!
//! A consumer that dies or hangs between delivery and acknowledgment leaves
//! its entry in the group's pending list forever. The reclaim policy scans a
//! bounded page of that list and transfers ownership of entries idle past a
//! threshold to the requesting consumer. The backend re-validates idleness
//! at claim time, so an owner that resumed right before the reclaim keeps
//! its entry and the transfer is silently skipped.

use std::time::Duration;

use crate::log::{BackendError, LogBackend, LogEntry};

/// Tuning knobs for the reclaim policy.
#[derive(Debug, Clone)]
pub struct ReclaimOptions {
    /// Minimum time an entry must sit idle in the pending list before it is
    /// eligible for ownership transfer.
    pub min_idle: Duration,
    /// Upper bound on pending entries inspected per call.
    pub scan_count: usize,
}

impl Default for ReclaimOptions {
    fn default() -> Self {
        Self {
            min_idle: Duration::from_secs(30),
            scan_count: 10,
        }
    }
}

pub(crate) struct ReclaimPolicy {
    min_idle: Duration,
    scan_count: usize,
}

impl ReclaimPolicy {
    pub(crate) fn new(options: ReclaimOptions) -> Self {
        Self {
            min_idle: options.min_idle,
            scan_count: options.scan_count,
        }
    }

    /// Try to recover one stalled entry for `consumer`.
    ///
    /// Scans the pending list oldest-first, requests ownership transfer for
    /// every idle-eligible entry on the page, and returns the first entry
    /// actually claimed. Remaining claimed entries stay pending under
    /// `consumer` with fresh idle timers and are picked up by later calls;
    /// consuming one entry per call bounds the work a single reclaim does.
    ///
    /// `Ok(None)` means nothing was stalled (or every candidate lost the
    /// idle re-check). That is a normal outcome, not an error.
    pub(crate) async fn reclaim_one(
        &self,
        backend: &dyn LogBackend,
        group: &str,
        consumer: &str,
    ) -> Result<Option<LogEntry>, BackendError> {
        let pending = backend.list_pending(group, self.scan_count).await?;

        let stalled: Vec<String> = pending
            .iter()
            .filter(|entry| entry.idle >= self.min_idle)
            .map(|entry| entry.id.clone())
            .collect();
        if stalled.is_empty() {
            return Ok(None);
        }

        tracing::debug!(
            group = %group,
            consumer = %consumer,
            candidates = stalled.len(),
            "claiming stalled entries"
        );

        let mut claimed = backend
            .claim(group, consumer, self.min_idle, &stalled)
            .await?;
        if claimed.is_empty() {
            // Every candidate's owner resumed before the claim landed.
            tracing::debug!(group = %group, "no stalled entries survived the idle re-check");
            return Ok(None);
        }

        Ok(Some(claimed.remove(0)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::codec::{encode, WorkItem};
    use crate::log::{MemoryLogBackend, StartPosition};

    async fn backend_with_pending(count: usize) -> Arc<MemoryLogBackend> {
        let backend = Arc::new(MemoryLogBackend::new());
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();
        for i in 0..count {
            backend
                .append(&encode(&WorkItem::new(format!("task-{i}"), 1)))
                .await
                .unwrap();
        }
        // Deliver everything to a consumer that then goes silent.
        backend
            .read_new("g", "stalled-worker", count, None, false)
            .await
            .unwrap();
        backend
    }

    #[tokio::test]
    async fn test_nothing_pending_reclaims_nothing() {
        let backend = Arc::new(MemoryLogBackend::new());
        backend
            .create_group("g", StartPosition::Beginning)
            .await
            .unwrap();

        let policy = ReclaimPolicy::new(ReclaimOptions::default());
        let result = policy
            .reclaim_one(backend.as_ref(), "g", "rescuer")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_fresh_entries_are_never_reclaimed() {
        let backend = backend_with_pending(3).await;
        let policy = ReclaimPolicy::new(ReclaimOptions {
            min_idle: Duration::from_secs(30),
            scan_count: 10,
        });

        let result = policy
            .reclaim_one(backend.as_ref(), "g", "rescuer")
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_reclaims_oldest_stalled_entry_first() {
        let backend = backend_with_pending(3).await;
        let policy = ReclaimPolicy::new(ReclaimOptions {
            min_idle: Duration::from_millis(40),
            scan_count: 10,
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let entry = policy
            .reclaim_one(backend.as_ref(), "g", "rescuer")
            .await
            .unwrap()
            .expect("stalled entry should be reclaimed");
        assert_eq!(entry.id, "1-0");

        // Ownership moved and the delivery count went up.
        let pending = backend.list_pending("g", 10).await.unwrap();
        let first = pending.iter().find(|p| p.id == "1-0").unwrap();
        assert_eq!(first.consumer, "rescuer");
        assert_eq!(first.delivery_count, 2);
    }

    #[tokio::test]
    async fn test_second_reclaim_after_claim_finds_timer_reset() {
        let backend = backend_with_pending(1).await;
        let policy = ReclaimPolicy::new(ReclaimOptions {
            min_idle: Duration::from_millis(40),
            scan_count: 10,
        });

        tokio::time::sleep(Duration::from_millis(60)).await;
        let first = policy
            .reclaim_one(backend.as_ref(), "g", "rescuer-a")
            .await
            .unwrap();
        assert!(first.is_some());

        // The claim reset the idle timer, so a follow-up reclaim sees
        // nothing eligible.
        let result = policy
            .reclaim_one(backend.as_ref(), "g", "rescuer-b")
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
