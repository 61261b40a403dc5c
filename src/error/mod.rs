//! Engine-level error taxonomy.
//!
//! "Nothing available right now" is not an error anywhere in this crate:
//! dequeue, peek, and reclaim signal it as `Ok(None)`, and a missing pending
//! list reads as a zero count. Everything else propagates verbatim.

use thiserror::Error;

use crate::codec::CodecError;
use crate::log::BackendError;

#[derive(Debug, Error)]
pub enum QueueError {
    /// A log backend operation failed. Connectivity failures are
    /// distinguishable through
    /// [`is_unavailable`](QueueError::is_unavailable); retrying is the
    /// caller's decision, the engine never retries internally.
    #[error("log backend failure: {0}")]
    Backend(#[from] BackendError),

    /// A delivered record failed to decode. The entry stays in the pending
    /// set; the caller can discard it with an explicit completion or leave
    /// it for reclaim.
    #[error("malformed record {entry_id}: {source}")]
    MalformedRecord {
        entry_id: String,
        #[source]
        source: CodecError,
    },

    /// Acknowledgment failed after the item was processed. The item may be
    /// redelivered later: delivery is at-least-once, not exactly-once.
    #[error("failed to acknowledge entry {entry_id}: {source}")]
    AckFailed {
        entry_id: String,
        #[source]
        source: BackendError,
    },
}

impl QueueError {
    /// Whether the underlying cause is the backend being unreachable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            QueueError::Backend(source) => source.is_unavailable(),
            QueueError::AckFailed { source, .. } => source.is_unavailable(),
            QueueError::MalformedRecord { .. } => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
