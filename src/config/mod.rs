//! Layered configuration: defaults, config files, environment.

mod settings;

pub use settings::{QueueSettings, RedisConfig, Settings};
