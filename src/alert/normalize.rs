//! Inbound alert normalization.
//!
//! Detectors ship alerts as arbitrarily nested JSON. A declarative
//! field-mapping schema flattens them: the schema is walked in parallel
//! with the document, and each schema leaf names the flat target field the
//! document value is copied to. Keys absent from the document are silently
//! dropped; values that are neither scalars nor homogeneous vectors fail
//! normalization.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde_json::Value as Json;

use super::{Alert, MitreId};
use crate::error::AlertError;
use crate::value::Value;

/// Target field receiving the technique identifiers.
const TARGET_MITRE_IDS: &str = "mitre_ids";
/// Target field receiving the alert description.
const TARGET_DESCRIPTION: &str = "description";
/// Target field receiving the detection timestamp.
const TARGET_TIMESTAMP: &str = "timestamp";

/// A declarative field-mapping schema.
///
/// A nested JSON object whose leaves are strings naming target fields:
///
/// ```json
/// {
///   "rule": {"description": "description", "mitre": {"id": "mitre_ids"}},
///   "agent": {"ip": "agent_ip"},
///   "syscheck": {"path": "file_path", "perm_after": "file_permissions"}
/// }
/// ```
#[derive(Debug, Clone)]
pub struct MappingSchema(serde_json::Map<String, Json>);

impl MappingSchema {
    /// Validates and wraps a mapping document.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Malformed`] unless the document is an object
    /// tree whose leaves are all strings.
    pub fn new(schema: Json) -> Result<Self, AlertError> {
        fn check(node: &Json, path: &str) -> Result<(), AlertError> {
            match node {
                Json::String(_) => Ok(()),
                Json::Object(map) => {
                    for (k, v) in map {
                        check(v, &format!("{path}.{k}"))?;
                    }
                    Ok(())
                }
                other => Err(AlertError::Malformed {
                    reason: format!(
                        "mapping schema node {path} must be an object or target name, got {other}"
                    ),
                }),
            }
        }
        check(&schema, "$")?;
        match schema {
            Json::Object(map) => Ok(Self(map)),
            _ => Err(AlertError::Malformed {
                reason: "mapping schema root must be an object".to_string(),
            }),
        }
    }

    const fn root(&self) -> &serde_json::Map<String, Json> {
        &self.0
    }
}

impl std::str::FromStr for MappingSchema {
    type Err = AlertError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let json: Json = serde_json::from_str(text).map_err(|e| AlertError::Malformed {
            reason: format!("mapping schema is not valid JSON: {e}"),
        })?;
        Self::new(json)
    }
}

/// Flattens an inbound document into an [`Alert`] using the mapping schema.
///
/// # Errors
///
/// Returns [`AlertError::Malformed`] when a mapped value is not flat, the
/// timestamp does not parse, or a technique id is invalid.
pub fn normalize(doc: &Json, schema: &MappingSchema) -> Result<Alert, AlertError> {
    let doc_obj = doc.as_object().ok_or_else(|| AlertError::Malformed {
        reason: "alert document must be a JSON object".to_string(),
    })?;

    let mut flat: BTreeMap<String, Value> = BTreeMap::new();
    walk(doc_obj, schema.root(), &mut flat)?;

    let techniques = extract_techniques(flat.remove(TARGET_MITRE_IDS))?;
    let description = match flat.remove(TARGET_DESCRIPTION) {
        Some(Value::Str(s)) => s,
        Some(other) => other.to_string(),
        None => String::new(),
    };
    let timestamp = extract_timestamp(flat.remove(TARGET_TIMESTAMP))?;

    Ok(Alert {
        description,
        timestamp,
        techniques,
        data: flat,
    })
}

/// Walks document and schema in parallel, collecting leaf targets.
fn walk(
    doc: &serde_json::Map<String, Json>,
    schema: &serde_json::Map<String, Json>,
    out: &mut BTreeMap<String, Value>,
) -> Result<(), AlertError> {
    for (key, mapping) in schema {
        let Some(value) = doc.get(key) else {
            // Absent keys are dropped, not errors.
            continue;
        };
        match mapping {
            Json::String(target) => {
                out.insert(target.clone(), Value::from_json(value)?);
            }
            Json::Object(nested) => {
                if let Some(inner) = value.as_object() {
                    walk(inner, nested, out)?;
                }
            }
            // Unreachable by MappingSchema::new validation.
            _ => {}
        }
    }
    Ok(())
}

/// Coerces the mapped `mitre_ids` value into a technique set.
fn extract_techniques(raw: Option<Value>) -> Result<BTreeSet<MitreId>, AlertError> {
    let mut techniques = BTreeSet::new();
    match raw {
        None | Some(Value::Null) => {}
        Some(Value::Str(s)) => {
            techniques.insert(MitreId::parse(&s)?);
        }
        Some(Value::List(items)) => {
            for item in items {
                match item {
                    Value::Str(s) => {
                        techniques.insert(MitreId::parse(&s)?);
                    }
                    other => {
                        return Err(AlertError::Malformed {
                            reason: format!("technique id must be a string, got {}", other.kind()),
                        });
                    }
                }
            }
        }
        Some(other) => {
            return Err(AlertError::Malformed {
                reason: format!("mitre_ids must be a string or vector, got {}", other.kind()),
            });
        }
    }
    Ok(techniques)
}

/// Parses the mapped timestamp; RFC 3339 strings and epoch seconds are
/// accepted, a missing timestamp defaults to now.
fn extract_timestamp(raw: Option<Value>) -> Result<DateTime<Utc>, AlertError> {
    match raw {
        None | Some(Value::Null) => Ok(Utc::now()),
        Some(Value::Str(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| AlertError::Malformed {
                reason: format!("unparseable timestamp {s:?}: {e}"),
            }),
        Some(Value::Num(secs)) => {
            #[allow(clippy::cast_possible_truncation)]
            let (whole, frac) = (secs.trunc() as i64, secs.fract());
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            DateTime::from_timestamp(whole, (frac * 1e9) as u32).ok_or_else(|| {
                AlertError::Malformed {
                    reason: format!("timestamp {secs} out of range"),
                }
            })
        }
        Some(other) => Err(AlertError::Malformed {
            reason: format!("timestamp must be a string or number, got {}", other.kind()),
        }),
    }
}
