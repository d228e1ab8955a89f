//! Scalar and vector values shared by alerts, conditions and workflows.
//!
//! Alert fields, condition parameters and resolved workflow parameters all
//! carry the same flat shape: a scalar (string, number, boolean, null) or a
//! homogeneous vector of scalars. [`Value`] is that shape, with the
//! flatness rule enforced at construction from untrusted JSON.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AlertError;

/// A flat alert/parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// JSON null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Number (all JSON numbers widen to `f64`).
    Num(f64),
    /// String.
    Str(String),
    /// Homogeneous vector of scalars.
    List(Vec<Value>),
}

impl Value {
    /// Converts untrusted JSON into a flat value.
    ///
    /// # Errors
    ///
    /// Returns [`AlertError::Malformed`] for objects, nested vectors, or
    /// heterogeneous vectors.
    pub fn from_json(json: &serde_json::Value) -> Result<Self, AlertError> {
        match json {
            serde_json::Value::Null => Ok(Self::Null),
            serde_json::Value::Bool(b) => Ok(Self::Bool(*b)),
            serde_json::Value::Number(n) => Ok(Self::Num(n.as_f64().unwrap_or_default())),
            serde_json::Value::String(s) => Ok(Self::Str(s.clone())),
            serde_json::Value::Array(items) => {
                let scalars = items
                    .iter()
                    .map(Self::from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                if scalars.iter().any(|v| matches!(v, Self::List(_))) {
                    return Err(AlertError::Malformed {
                        reason: "nested vectors are not allowed in alert fields".to_string(),
                    });
                }
                if let Some(first) = scalars.first() {
                    let tag = std::mem::discriminant(first);
                    if scalars.iter().any(|v| std::mem::discriminant(v) != tag) {
                        return Err(AlertError::Malformed {
                            reason: "heterogeneous vector in alert field".to_string(),
                        });
                    }
                }
                Ok(Self::List(scalars))
            }
            serde_json::Value::Object(_) => Err(AlertError::Malformed {
                reason: "nested objects are not allowed in alert fields".to_string(),
            }),
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the string content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric content, if this is a number.
    #[must_use]
    pub const fn as_num(&self) -> Option<f64> {
        match self {
            Self::Num(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean content, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the vector content, if this is a vector.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Self]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Orders two values of the same scalar kind.
    ///
    /// Numbers order numerically, strings lexicographically. Mixed kinds,
    /// booleans, nulls and vectors do not order.
    #[must_use]
    pub fn compare(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.partial_cmp(b),
            (Self::Str(a), Self::Str(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }

    /// Human-readable kind name used in error messages.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Num(_) => "number",
            Self::Str(_) => "string",
            Self::List(_) => "vector",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "none"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Num(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => {
                write!(f, "(list")?;
                for item in items {
                    write!(f, " {item}")?;
                }
                write!(f, ")")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Num(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}
