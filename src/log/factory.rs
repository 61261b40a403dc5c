//! Log backend factory.

use std::sync::Arc;

use crate::config::Settings;

use super::backend::{BackendError, LogBackend};
use super::memory_backend::MemoryLogBackend;
use super::redis_backend::RedisLogBackend;

/// Create a log backend based on configuration.
///
/// `queue.backend = "redis"` connects to the configured Redis server and
/// binds to the configured stream key; anything else yields the in-memory
/// backend, which keeps local development and tests free of external
/// services.
pub async fn create_log_backend(settings: &Settings) -> Result<Arc<dyn LogBackend>, BackendError> {
    match settings.queue.backend.as_str() {
        "redis" => {
            tracing::info!(
                backend = "redis",
                stream = %settings.queue.stream,
                "creating redis log backend"
            );
            let backend =
                RedisLogBackend::connect(&settings.redis.url, settings.queue.stream.clone())
                    .await?;
            Ok(Arc::new(backend))
        }
        other => {
            if other != "memory" {
                tracing::warn!(
                    backend = %other,
                    "unknown log backend requested, falling back to memory"
                );
            } else {
                tracing::info!(backend = "memory", "creating memory log backend");
            }
            Ok(Arc::new(MemoryLogBackend::new()))
        }
    }
}
