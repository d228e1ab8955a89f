//! Alert records and the inbound alert normalizer.

pub mod normalize;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AlertError;
use crate::value::Value;

pub use normalize::{MappingSchema, normalize};

/// A MITRE ATT&CK technique identifier of the form `T####` or `T####.###`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MitreId(String);

impl MitreId {
    /// Parses and validates a technique identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::InvalidTechnique`] unless the input is `T`
    /// followed by four digits, optionally a dot and three sub-technique
    /// digits.
    pub fn parse(s: &str) -> Result<Self, AlertError> {
        let bytes = s.as_bytes();
        let valid = match bytes.len() {
            5 => bytes[0] == b'T' && bytes[1..5].iter().all(u8::is_ascii_digit),
            9 => {
                bytes[0] == b'T'
                    && bytes[1..5].iter().all(u8::is_ascii_digit)
                    && bytes[5] == b'.'
                    && bytes[6..9].iter().all(u8::is_ascii_digit)
            }
            _ => false,
        };
        if valid {
            Ok(Self(s.to_string()))
        } else {
            Err(AlertError::InvalidTechnique(s.to_string()))
        }
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MitreId {
    type Error = AlertError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<MitreId> for String {
    fn from(id: MitreId) -> Self {
        id.0
    }
}

impl fmt::Display for MitreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, normalized intrusion-detection alert.
///
/// Produced once by the normalizer and shared by reference afterwards;
/// the engine, planner and dispatcher never mutate it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Free-text description from the detector.
    #[serde(default)]
    pub description: String,

    /// Detection time.
    pub timestamp: DateTime<Utc>,

    /// MITRE techniques observed in this alert.
    pub techniques: BTreeSet<MitreId>,

    /// Flat field name to value mapping.
    #[serde(default)]
    pub data: BTreeMap<String, Value>,
}

impl Alert {
    /// Looks up a data field by symbolic name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Whether the alert carries the given technique.
    #[must_use]
    pub fn has_technique(&self, technique: &MitreId) -> bool {
        self.techniques.contains(technique)
    }
}
