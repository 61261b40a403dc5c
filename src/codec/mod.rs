//! Wire codec for work items stored in the log.
//!
//! Items are persisted as string field-value records with the fields `item`,
//! `priority`, and `created`. These names are the persisted-state layout:
//! streams written by older producers must keep decoding, so they must not
//! change.

use chrono::Utc;
use thiserror::Error;

/// Field holding the opaque payload.
pub const FIELD_ITEM: &str = "item";
/// Field holding the producer-supplied priority as a decimal string.
pub const FIELD_PRIORITY: &str = "priority";
/// Field holding the enqueue timestamp, nanoseconds since the Unix epoch.
pub const FIELD_CREATED: &str = "created";

/// String field-value pairs as stored in one log record.
pub type RecordFields = Vec<(String, String)>;

/// Errors raised when a stored record cannot be decoded.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A required field is absent from the record.
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),

    /// A numeric field did not parse as an integer.
    #[error("field `{field}` has non-integer value {value:?}")]
    InvalidInteger {
        field: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },
}

/// A unit of work carried by the queue.
///
/// `priority` is metadata only: delivery order is append order, and the
/// log-backed design does not reorder by priority. Callers that need true
/// priority scheduling need a separate index on top of this queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Opaque producer-supplied payload.
    pub payload: String,
    /// Producer-supplied priority; carried through delivery, not used for ordering.
    pub priority: i64,
    /// Enqueue timestamp, nanoseconds since the Unix epoch. Immutable.
    pub created_at: i64,
}

impl WorkItem {
    /// Create an item stamped with the current time.
    pub fn new(payload: impl Into<String>, priority: i64) -> Self {
        Self {
            payload: payload.into(),
            priority,
            // Saturates once the clock passes the year 2262.
            created_at: Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX),
        }
    }
}

/// Encode an item into record fields. Never fails.
pub fn encode(item: &WorkItem) -> RecordFields {
    vec![
        (FIELD_ITEM.to_string(), item.payload.clone()),
        (FIELD_PRIORITY.to_string(), item.priority.to_string()),
        (FIELD_CREATED.to_string(), item.created_at.to_string()),
    ]
}

/// Decode record fields back into an item.
///
/// Partial or corrupt records are rejected rather than defaulted so that a
/// damaged entry cannot silently lose its priority or timestamp.
pub fn decode(fields: &[(String, String)]) -> Result<WorkItem, CodecError> {
    let payload = lookup(fields, FIELD_ITEM)?.to_string();
    let priority = parse_int(fields, FIELD_PRIORITY)?;
    let created_at = parse_int(fields, FIELD_CREATED)?;

    Ok(WorkItem {
        payload,
        priority,
        created_at,
    })
}

fn lookup<'a>(fields: &'a [(String, String)], name: &'static str) -> Result<&'a str, CodecError> {
    fields
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
        .ok_or(CodecError::MissingField(name))
}

fn parse_int(fields: &[(String, String)], name: &'static str) -> Result<i64, CodecError> {
    let value = lookup(fields, name)?;
    value.parse().map_err(|source| CodecError::InvalidInteger {
        field: name,
        value: value.to_string(),
        source,
    })
}
