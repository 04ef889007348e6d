//! Application Configuration
//!
//! Loads settings from an optional YAML file (pointed at by the
//! `CONFIG_PATH` environment variable) layered under `GATEWAY__`-prefixed
//! environment overrides. Every section carries defaults so the gateway can
//! boot against a local MongoDB/Redis with no file at all.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

/// Main configuration for the gateway process.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(rename = "async", default)]
    pub async_tasks: AsyncConfig,
    /// Upstream endpoints keyed by caller version.
    #[serde(default)]
    pub targets: HashMap<String, TargetConfig>,
}

/// Document store connection settings.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub db: String,
}

/// Inbound signature verification settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enable_signature: bool,
    /// Accepted clock skew for `X-Timestamp`, in seconds.
    #[serde(default = "default_signature_time_window")]
    pub signature_time_window: u64,
}

/// Asynchronous task pipeline settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    #[serde(default)]
    pub redis: RedisSettings,
}

/// Redis connection settings for the task queue.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisSettings {
    pub addr: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub db: i64,
    #[serde(default = "default_queue_key")]
    pub queue_key: String,
}

/// A single upstream endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    /// Upstream request timeout in milliseconds.
    #[serde(default = "default_target_timeout_ms")]
    pub timeout: u64,
}

impl Config {
    /// Load configuration from `CONFIG_PATH` (if set) and the environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Ok(path) = std::env::var("CONFIG_PATH") {
            builder = builder.add_source(config::File::from(std::path::Path::new(&path)));
        }

        builder = builder.add_source(config::Environment::with_prefix("GATEWAY").separator("__"));

        builder.build()?.try_deserialize()
    }

    /// Resolve the upstream target for a caller version.
    pub fn target_for(&self, version: &str) -> Option<&TargetConfig> {
        self.targets.get(version)
    }
}

impl TargetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}

impl RedisSettings {
    /// Connection URL for the redis client, folding in password and db index.
    pub fn url(&self) -> String {
        if self.password.is_empty() {
            format!("redis://{}/{}", self.addr, self.db)
        } else {
            format!("redis://:{}@{}/{}", self.password, self.addr, self.db)
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            async_tasks: AsyncConfig::default(),
            targets: HashMap::new(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_signature_time_window() -> u64 {
    300
}

fn default_worker_count() -> usize {
    10
}

fn default_queue_key() -> String {
    "api_gateway:task_queue".to_string()
}

fn default_target_timeout_ms() -> u64 {
    30_000
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "mongodb://127.0.0.1:27017".to_string(),
            db: "api_gateway".to_string(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enable_signature: false,
            signature_time_window: default_signature_time_window(),
        }
    }
}

impl Default for AsyncConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            worker_count: default_worker_count(),
            redis: RedisSettings::default(),
        }
    }
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
            queue_key: default_queue_key(),
        }
    }
}
