//! Priority-tagged work queue on an append-only log with consumer-group
//! recovery.
//!
//! Producers append work items to a durable log (Redis Streams in
//! production, in-memory for tests); pools of consumers receive items
//! at-most-once-in-flight and recover entries whose consumer died or stalled
//! mid-processing. Priority is carried as metadata on each item but delivery
//! order is strictly append order; the log is FIFO.
//!
//! The engine is stateless; all coordination lives in the [`LogBackend`].
//! Callers supply consumer names explicitly on every operation.

// Storage layer
pub mod codec;
pub mod log;

// Engine
pub mod engine;
pub mod error;

// Supporting modules
pub mod config;
pub mod metrics;
pub mod telemetry;

pub use codec::{CodecError, WorkItem};
pub use config::Settings;
pub use engine::reclaim::ReclaimOptions;
pub use engine::{QueueOptions, QueueStats, ReceivedItem, WorkQueue};
pub use error::{QueueError, Result};
pub use log::{
    create_log_backend, BackendError, LogBackend, LogEntry, MemoryLogBackend, PendingEntry,
    RedisLogBackend, StartPosition,
};
