use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub queue: QueueSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Log backend selector: "redis" or "memory".
    #[serde(default = "default_backend")]
    pub backend: String,
    /// Stream key holding the work log.
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Consumer group the engine operates in.
    #[serde(default = "default_group")]
    pub group: String,
    /// Default block timeout for reads that fall through reclaim, in ms.
    #[serde(default = "default_block_timeout_ms")]
    pub block_timeout_ms: u64,
    /// Idle threshold before a pending entry becomes reclaimable, in ms.
    #[serde(default = "default_reclaim_min_idle_ms")]
    pub reclaim_min_idle_ms: u64,
    /// Pending entries inspected per reclaim call.
    #[serde(default = "default_reclaim_scan_count")]
    pub reclaim_scan_count: usize,
    /// Optional cap on log length, enforced by explicit trim calls.
    #[serde(default)]
    pub max_stream_length: Option<u64>,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_backend() -> String {
    "memory".to_string()
}

fn default_stream() -> String {
    "work_items".to_string()
}

fn default_group() -> String {
    "workers".to_string()
}

fn default_block_timeout_ms() -> u64 {
    5000 // 5 seconds
}

fn default_reclaim_min_idle_ms() -> u64 {
    30_000 // 30 seconds
}

fn default_reclaim_scan_count() -> usize {
    10
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            // Start with default values
            .set_default("redis.url", default_redis_url())?
            .set_default("queue.backend", default_backend())?
            .set_default("queue.stream", default_stream())?
            .set_default("queue.group", default_group())?
            .set_default("queue.block_timeout_ms", default_block_timeout_ms())?
            .set_default("queue.reclaim_min_idle_ms", default_reclaim_min_idle_ms())?
            .set_default(
                "queue.reclaim_scan_count",
                default_reclaim_scan_count() as u64,
            )?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Load from environment variables
            // REDIS__URL, QUEUE__BACKEND, QUEUE__STREAM, QUEUE__GROUP, etc.
            .add_source(Environment::default().separator("__").try_parsing(true));

        builder.build()?.try_deserialize()
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            stream: default_stream(),
            group: default_group(),
            block_timeout_ms: default_block_timeout_ms(),
            reclaim_min_idle_ms: default_reclaim_min_idle_ms(),
            reclaim_scan_count: default_reclaim_scan_count(),
            max_stream_length: None,
        }
    }
}
