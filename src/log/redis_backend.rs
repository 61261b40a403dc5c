//! Redis Streams log backend.
//!
//! Maps the [`LogBackend`] contract onto one Redis stream key and its
//! consumer groups: `XADD`/`XREADGROUP`/`XACK`/`XPENDING`/`XCLAIM`/`XLEN`/
//! `XTRIM`. Entries persist and survive process restarts; replication and
//! delivery-tracking guarantees come from Redis itself.
//!
//! Reads never pass `NOACK`: peeked entries must land in the group's pending
//! list so they stay reclaimable, which is exactly what a plain `XREADGROUP`
//! without a following `XACK` gives.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};

use crate::codec::RecordFields;

use super::backend::{BackendError, LogBackend, LogEntry, PendingEntry, StartPosition};

/// Reply shape of `XREADGROUP` for a single stream: stream name paired with
/// `(id, fields)` entries. `None` when the read returned nothing.
type ReadReply = Option<Vec<(String, Vec<(String, RecordFields)>)>>;

/// Reply shape of the extended `XPENDING` form:
/// `(id, consumer, idle_ms, delivery_count)`.
type PendingReply = Vec<(String, String, u64, u64)>;

/// Reply shape of the summary `XPENDING` form:
/// `(count, min_id, max_id, per_consumer_counts)`.
type PendingSummaryReply = (u64, Option<String>, Option<String>, Option<Vec<(String, String)>>);

/// Log backend persisted in a Redis stream.
pub struct RedisLogBackend {
    /// Multiplexed auto-reconnecting connection, cloned per operation.
    conn: ConnectionManager,
    /// Stream key this backend is bound to.
    stream: String,
}

impl RedisLogBackend {
    /// Connect to Redis and bind to `stream`.
    pub async fn connect(url: &str, stream: impl Into<String>) -> Result<Self, BackendError> {
        let client = Client::open(url).map_err(map_error)?;
        let conn = client.get_connection_manager().await.map_err(map_error)?;
        let stream = stream.into();
        tracing::info!(stream = %stream, "connected to redis log backend");
        Ok(Self { conn, stream })
    }

    /// Stream key this backend operates on.
    pub fn stream(&self) -> &str {
        &self.stream
    }
}

/// Connection-class failures surface as `Unavailable`; everything else keeps
/// the Redis error verbatim.
fn map_error(err: RedisError) -> BackendError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_connection_dropped() {
        BackendError::Unavailable(err.to_string())
    } else {
        BackendError::Redis(err)
    }
}

fn is_error_code(err: &RedisError, code: &str) -> bool {
    err.code() == Some(code)
}

impl StartPosition {
    fn as_stream_id(self) -> &'static str {
        match self {
            StartPosition::Beginning => "0",
            StartPosition::End => "$",
        }
    }
}

#[async_trait]
impl LogBackend for RedisLogBackend {
    async fn create_group(&self, group: &str, start: StartPosition) -> Result<(), BackendError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(group)
            .arg(start.as_stream_id())
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => {
                tracing::debug!(stream = %self.stream, group = %group, "consumer group created");
                Ok(())
            }
            // The group already existing is the expected steady state.
            Err(e) if is_error_code(&e, "BUSYGROUP") => Ok(()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn append(&self, fields: &RecordFields) -> Result<String, BackendError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream).arg("*");
        for (field, value) in fields {
            cmd.arg(field).arg(value);
        }
        let id: String = cmd.query_async(&mut conn).await.map_err(map_error)?;
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
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count);
        // BLOCK 0 would block forever in Redis; a zero timeout here means a
        // non-blocking read, so it is simply omitted.
        if let Some(block) = block.filter(|d| !d.is_zero()) {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(&self.stream).arg(">");

        let reply: ReadReply = cmd.query_async(&mut conn).await.map_err(map_error)?;
        let entries = reply
            .into_iter()
            .flatten()
            .flat_map(|(_, entries)| entries)
            .map(|(id, fields)| LogEntry { id, fields })
            .collect();
        Ok(entries)
    }

    async fn acknowledge(&self, group: &str, entry_id: &str) -> Result<bool, BackendError> {
        let mut conn = self.conn.clone();
        let acked: u64 = redis::cmd("XACK")
            .arg(&self.stream)
            .arg(group)
            .arg(entry_id)
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(acked == 1)
    }

    async fn list_pending(
        &self,
        group: &str,
        count: usize,
    ) -> Result<Vec<PendingEntry>, BackendError> {
        let mut conn = self.conn.clone();
        let result: Result<PendingReply, RedisError> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(group)
            .arg("-")
            .arg("+")
            .arg(count)
            .query_async(&mut conn)
            .await;

        match result {
            Ok(reply) => Ok(reply
                .into_iter()
                .map(|(id, consumer, idle_ms, delivery_count)| PendingEntry {
                    id,
                    consumer,
                    idle: Duration::from_millis(idle_ms),
                    delivery_count,
                })
                .collect()),
            // A group that never delivered anything has nothing to reclaim.
            Err(e) if is_error_code(&e, "NOGROUP") => Ok(Vec::new()),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn claim(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        entry_ids: &[String],
    ) -> Result<Vec<LogEntry>, BackendError> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XCLAIM");
        cmd.arg(&self.stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle.as_millis() as u64);
        for id in entry_ids {
            cmd.arg(id);
        }

        let reply: Vec<(String, RecordFields)> =
            cmd.query_async(&mut conn).await.map_err(map_error)?;
        Ok(reply
            .into_iter()
            .map(|(id, fields)| LogEntry { id, fields })
            .collect())
    }

    async fn len(&self) -> Result<u64, BackendError> {
        let mut conn = self.conn.clone();
        let len: u64 = redis::cmd("XLEN")
            .arg(&self.stream)
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(len)
    }

    async fn pending_count(&self, group: &str) -> Result<u64, BackendError> {
        let mut conn = self.conn.clone();
        let result: Result<PendingSummaryReply, RedisError> = redis::cmd("XPENDING")
            .arg(&self.stream)
            .arg(group)
            .query_async(&mut conn)
            .await;

        match result {
            Ok((count, _, _, _)) => Ok(count),
            // No pending list yet reads as zero, never an error.
            Err(e) if is_error_code(&e, "NOGROUP") => Ok(0),
            Err(e) => Err(map_error(e)),
        }
    }

    async fn trim(&self, max_len: u64) -> Result<u64, BackendError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("XTRIM")
            .arg(&self.stream)
            .arg("MAXLEN")
            .arg(max_len)
            .query_async(&mut conn)
            .await
            .map_err(map_error)?;
        Ok(removed)
    }
}
