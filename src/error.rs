//! Error types for the mitigation engine.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Alert normalization failures.
///
/// Malformed alerts are dropped at the ingress; they never reach the
/// attack-graph engine or the planner.
#[derive(Debug, Error)]
pub enum AlertError {
    /// The inbound document cannot be flattened into an alert.
    #[error("malformed alert: {reason}")]
    Malformed {
        /// What made the document unusable.
        reason: String,
    },

    /// A technique identifier does not match the `T####[.###]` shape.
    #[error("invalid MITRE technique id: {0:?}")]
    InvalidTechnique(String),
}

/// Condition loading and evaluation failures.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The check expression was rejected at load time.
    ///
    /// The offending condition is not stored.
    #[error("condition syntax error at byte {pos}: {message}")]
    Syntax {
        /// Byte offset into the check source.
        pos: usize,
        /// What the parser expected.
        message: String,
    },

    /// Runtime evaluation failed (type mismatch, unknown parameter,
    /// graph-database escape failure). Treated as boolean false at the
    /// call site so a blip never advances an attack graph.
    #[error("condition evaluation failed: {0}")]
    Eval(String),

    /// A node or workflow references a condition id that is not loaded.
    #[error("unknown condition id {0}")]
    Unknown(u32),
}

/// Graph-database collaborator failures, surfaced to the condition
/// evaluator as [`ConditionError::Eval`].
#[derive(Debug, Error)]
pub enum GraphDbError {
    /// The database is not configured or unreachable.
    #[error("graph database unavailable: {0}")]
    Connect(String),

    /// The database answered with a non-success status.
    #[error("graph database returned HTTP {0}")]
    Status(u16),

    /// The query response could not be decoded.
    #[error("graph database response invalid: {0}")]
    Decode(String),

    /// The query did not complete within the configured timeout.
    #[error("graph database query timed out after {0:?}")]
    Timeout(Duration),
}

/// Catalog entity problems.
///
/// Fatal when detected in persisted state at startup; recoverable
/// (the offending entity is rejected) on CRUD requests.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// An entity violates a structural invariant.
    #[error("catalog invariant violated for {kind} {id}: {reason}")]
    Invariant {
        /// Entity kind (`"graph"`, `"workflow"`, `"condition"`).
        kind: &'static str,
        /// Entity id.
        id: u32,
        /// The violated invariant.
        reason: String,
    },

    /// Lookup for an entity that is not in the catalog.
    #[error("no {kind} with id {id}")]
    NotFound {
        /// Entity kind.
        kind: &'static str,
        /// Requested id.
        id: u32,
    },
}

/// Webhook dispatch failures. Never retried; reported per workflow in
/// the mitigation outcome.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The webhook answered outside the 2xx range.
    #[error("webhook returned HTTP {0}")]
    Status(u16),

    /// The POST did not complete within the dispatcher timeout.
    #[error("webhook timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure.
    #[error("webhook connection failed: {0}")]
    Connect(String),
}

/// Persistent catalog store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A catalog document could not be read or written.
    #[error("store I/O on {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A catalog document is not valid JSON of the expected shape.
    #[error("invalid catalog document {path}: {message}")]
    Invalid {
        /// Document path.
        path: PathBuf,
        /// Parse or shape error.
        message: String,
    },
}

/// Configuration loading failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist or cannot be read.
    #[error("configuration file not found: {path}")]
    MissingFile {
        /// Requested path.
        path: PathBuf,
    },

    /// The configuration file is not valid YAML.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser message.
        message: String,
    },

    /// A configuration value is out of range or the wrong shape.
    #[error("invalid value for {field}: {value} (expected {expected})")]
    InvalidValue {
        /// Dotted field path.
        field: String,
        /// Offending value.
        value: String,
        /// What would have been accepted.
        expected: String,
    },

    /// A `${VAR:?}` reference names an unset environment variable.
    #[error("environment variable {var} is not set: {message}")]
    EnvVarNotSet {
        /// Variable name.
        var: String,
        /// The `:?` message from the reference.
        message: String,
    },
}

/// Message-bus ingress failures.
#[derive(Debug, Error)]
pub enum BusError {
    /// Initial connection to the bus failed.
    #[error("bus connection failed: {0}")]
    Connect(String),

    /// Subscribing to the alert subject failed.
    #[error("bus subscription failed: {0}")]
    Subscribe(String),

    /// The subscription ended beyond the client's reconnect policy.
    #[error("bus connection lost")]
    Lost,
}

/// Top-level error type aggregating every subsystem.
#[derive(Debug, Error)]
pub enum Error {
    /// Alert normalization error.
    #[error(transparent)]
    Alert(#[from] AlertError),

    /// Condition error.
    #[error(transparent)]
    Condition(#[from] ConditionError),

    /// Catalog error.
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    /// Dispatch error.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Bus error.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for mitigator operations.
pub type Result<T> = std::result::Result<T, Error>;
