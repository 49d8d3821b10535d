//! Configuration management
//!
//! Layered as compiled defaults, then an optional TOML file, then
//! `CALLMARKET__SECTION__KEY` environment variables.

use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "callmarket";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub signaling: SignalingConfig,
    pub dispatcher: DispatcherConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
}

/// Negotiation windows and call bounds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long an advisor has to answer a pending request
    pub accept_timeout_secs: u64,
    /// How long a client has to join after acceptance
    pub join_timeout_secs: u64,
    pub min_duration_minutes: u32,
    pub max_duration_minutes: u32,
    pub sweep_interval_secs: u64,
    /// Slack given to party-side timers before the sweeper steps in
    pub sweep_grace_secs: u64,
}

impl SessionConfig {
    pub fn accept_window(&self) -> Duration {
        Duration::from_secs(self.accept_timeout_secs)
    }

    pub fn join_window(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingConfig {
    pub app_id: String,
    pub app_certificate: String,
    pub token_ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Buffered changes per subscriber before it starts lagging
    pub channel_capacity: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "postgres://postgres@localhost/callmarket".to_string(),
                max_connections: 10,
                min_connections: 2,
                connect_timeout_secs: 5,
            },
            session: SessionConfig {
                accept_timeout_secs: 20,
                join_timeout_secs: 15,
                min_duration_minutes: 1,
                max_duration_minutes: 60,
                sweep_interval_secs: 5,
                sweep_grace_secs: 5,
            },
            signaling: SignalingConfig {
                app_id: "callmarket-dev".to_string(),
                app_certificate: "change-me".to_string(),
                token_ttl_secs: 3600,
            },
            dispatcher: DispatcherConfig {
                channel_capacity: 1024,
            },
            storage: StorageConfig {
                backend: if cfg!(feature = "postgres") {
                    StorageBackend::Postgres
                } else {
                    StorageBackend::Memory
                },
            },
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// `path` names a required TOML file; without it `callmarket.toml` in the
    /// working directory is used if present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        config::Config::builder()
            .add_source(config::Config::try_from(&Config::default())?)
            .add_source(file)
            .add_source(
                Environment::with_prefix("CALLMARKET")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
