//! Configuration schema.
//!
//! One YAML document drives the whole process. Durations are humantime
//! strings (`"1s"`, `"500ms"`); all sections except the store and the
//! normalizer mapping have usable defaults.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::observability::logging::LogFormat;

/// Top-level configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Message-bus ingress; omit to run HTTP-only.
    #[serde(default)]
    pub bus: Option<BusConfig>,

    /// Graph-database collaborator; omit if no condition uses `db-count`.
    #[serde(default)]
    pub graphdb: Option<GraphDbConfig>,

    /// HTTP API listener.
    #[serde(default)]
    pub http: HttpConfig,

    /// Planner limits.
    #[serde(default)]
    pub planner: PlannerConfig,

    /// Dispatcher limits.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    /// Catalog document locations.
    pub store: StoreConfig,

    /// Alert normalizer settings.
    pub normalizer: NormalizerConfig,

    /// Shutdown behavior.
    #[serde(default)]
    pub shutdown: ShutdownConfig,

    /// Logging defaults (overridable from the CLI and environment).
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Message-bus subscription settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    /// Bus host.
    pub host: String,

    /// Bus port.
    #[serde(default = "default_bus_port")]
    pub port: u16,

    /// Whether to require TLS on the connection.
    #[serde(default)]
    pub tls: bool,

    /// Subject the alert stream is published on.
    pub subject: String,
}

/// Graph-database client settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraphDbConfig {
    /// Query endpoint URL.
    pub url: String,

    /// Optional basic-auth user.
    #[serde(default)]
    pub username: Option<String>,

    /// Optional basic-auth password.
    #[serde(default)]
    pub password: Option<String>,

    /// Per-query timeout.
    #[serde(default = "default_graphdb_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
}

/// HTTP API listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    /// Address to bind, e.g. `"0.0.0.0:8080"`.
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Planner limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlannerConfig {
    /// Wall-clock search deadline.
    #[serde(default = "default_time_limit", deserialize_with = "duration")]
    pub time_limit: Duration,

    /// Assignment slots per alert.
    #[serde(default = "default_slots")]
    pub slots: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            slots: default_slots(),
        }
    }
}

/// Dispatcher limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Outbound webhook timeout.
    #[serde(default = "default_dispatch_timeout", deserialize_with = "duration")]
    pub timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout: default_dispatch_timeout(),
        }
    }
}

/// Catalog document locations.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Attack-graph template document.
    pub graphs: PathBuf,

    /// Workflow signature document.
    pub workflows: PathBuf,

    /// Condition document.
    pub conditions: PathBuf,
}

/// Alert normalizer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NormalizerConfig {
    /// Field-mapping schema document (JSON).
    pub mapping: PathBuf,
}

/// Shutdown behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShutdownConfig {
    /// How long in-flight dispatches may finish after the queue drains.
    #[serde(default = "default_grace", deserialize_with = "duration")]
    pub grace: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace: default_grace(),
        }
    }
}

/// Logging defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Default filter directive, e.g. `"info"` or `"mitigator=debug"`.
    #[serde(default)]
    pub level: Option<String>,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn duration<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let text = String::deserialize(deserializer)?;
    humantime::parse_duration(&text).map_err(serde::de::Error::custom)
}

const fn default_bus_port() -> u16 {
    4222
}

const fn default_graphdb_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

const fn default_time_limit() -> Duration {
    Duration::from_secs(1)
}

const fn default_slots() -> usize {
    10
}

const fn default_dispatch_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_grace() -> Duration {
    Duration::from_secs(5)
}
