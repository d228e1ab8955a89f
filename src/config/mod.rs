//! Configuration loading.
//!
//! The pipeline is: read the file, substitute `${VAR}` environment
//! references in the raw text, parse the YAML, validate, freeze behind an
//! `Arc`. Substitution runs before parsing so that substituted values keep
//! their YAML type inference.

pub mod schema;

use std::path::Path;
use std::sync::Arc;

use crate::error::ConfigError;

pub use schema::Config;

/// Loads, substitutes, parses and validates a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] when the file is missing, a required
/// environment variable is unset, the YAML does not parse, or a value is
/// out of range. All of these are fatal at startup.
pub fn load(path: &Path) -> Result<Arc<Config>, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|_| ConfigError::MissingFile {
        path: path.to_path_buf(),
    })?;
    let raw = raw.strip_prefix('\u{feff}').unwrap_or(&raw);

    let substituted = substitute_env(raw)?;

    let config: Config = serde_yaml::from_str(&substituted).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    validate(&config)?;
    Ok(Arc::new(config))
}

/// Sanity-checks parsed values.
fn validate(config: &Config) -> Result<(), ConfigError> {
    let invalid = |field: &str, value: String, expected: &str| ConfigError::InvalidValue {
        field: field.to_string(),
        value,
        expected: expected.to_string(),
    };

    if config.planner.slots == 0 || config.planner.slots > 100 {
        return Err(invalid(
            "planner.slots",
            config.planner.slots.to_string(),
            "between 1 and 100",
        ));
    }
    if config.planner.time_limit.is_zero() {
        return Err(invalid(
            "planner.time_limit",
            "0s".to_string(),
            "a positive duration",
        ));
    }
    if config.dispatcher.timeout.is_zero() {
        return Err(invalid(
            "dispatcher.timeout",
            "0s".to_string(),
            "a positive duration",
        ));
    }
    if config.http.listen.parse::<std::net::SocketAddr>().is_err() {
        return Err(invalid(
            "http.listen",
            config.http.listen.clone(),
            "a socket address like 0.0.0.0:8080",
        ));
    }
    if let Some(bus) = &config.bus {
        if bus.subject.is_empty() {
            return Err(invalid("bus.subject", String::new(), "a non-empty subject"));
        }
    }
    Ok(())
}

/// Substitutes environment references in raw YAML text.
///
/// Supports `${VAR}` (empty string if unset), `${VAR:-default}`,
/// `${VAR:?message}` (fail if unset) and `$$` for a literal `$`.
fn substitute_env(raw: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                let mut spec = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    spec.push(c);
                }
                if !closed {
                    return Err(ConfigError::InvalidValue {
                        field: "config".to_string(),
                        value: format!("${{{spec}"),
                        expected: "a closed ${VAR} reference".to_string(),
                    });
                }
                result.push_str(&expand_var(&spec)?);
            }
            _ => result.push(c),
        }
    }

    Ok(result)
}

/// Expands one `VAR`, `VAR:-default` or `VAR:?message` specification.
fn expand_var(spec: &str) -> Result<String, ConfigError> {
    if let Some((var, default)) = spec.split_once(":-") {
        return Ok(std::env::var(var).unwrap_or_else(|_| default.to_string()));
    }
    if let Some((var, message)) = spec.split_once(":?") {
        return std::env::var(var).map_err(|_| ConfigError::EnvVarNotSet {
            var: var.to_string(),
            message: message.to_string(),
        });
    }
    Ok(std::env::var(spec).unwrap_or_default())
}
