//! Conditions: stored predicates gating graph edges and workflow
//! applicability.

pub mod eval;
pub mod expr;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::alert::Alert;
use crate::error::ConditionError;
use crate::value::Value;

pub use eval::Evaluator;
pub use expr::{CmpOp, Expr};

/// An argument declaration: which alert field(s) feed a parameter.
///
/// A single field name requires that exact field; a list means
/// any-one-of, resolved to the first field present and non-null.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    /// One required field.
    Field(String),
    /// First present-and-non-null field wins.
    AnyOf(Vec<String>),
}

/// The stored (wire and disk) form of a condition.
///
/// The check expression travels as its source string; it is compiled when
/// the condition is loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Stable identifier.
    pub id: u32,
    /// Operator-facing description.
    #[serde(default)]
    pub description: String,
    /// Literal parameter defaults.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Alert fields that must resolve before evaluation.
    #[serde(default)]
    pub args: BTreeMap<String, ArgSpec>,
    /// Check expression source.
    pub check: String,
}

/// A loaded condition with its compiled check expression.
#[derive(Debug, Clone)]
pub struct Condition {
    /// Stable identifier.
    pub id: u32,
    /// Operator-facing description.
    pub description: String,
    /// Literal parameter defaults.
    pub params: BTreeMap<String, Value>,
    /// Alert fields that must resolve before evaluation.
    pub args: BTreeMap<String, ArgSpec>,
    /// Original check source, kept for persistence.
    pub source: String,
    /// Compiled check expression.
    pub check: Expr,
}

impl TryFrom<ConditionSpec> for Condition {
    type Error = ConditionError;

    fn try_from(spec: ConditionSpec) -> Result<Self, Self::Error> {
        let check = expr::parse(&spec.check)?;
        Ok(Self {
            id: spec.id,
            description: spec.description,
            params: spec.params,
            args: spec.args,
            source: spec.check,
            check,
        })
    }
}

impl From<&Condition> for ConditionSpec {
    fn from(cond: &Condition) -> Self {
        Self {
            id: cond.id,
            description: cond.description.clone(),
            params: cond.params.clone(),
            args: cond.args.clone(),
            check: cond.source.clone(),
        }
    }
}

/// Resolves declared arguments against an alert and merges them over the
/// literal parameter defaults.
///
/// Returns `None` when any required argument cannot be resolved; the
/// caller must then treat the condition (or workflow candidate) as unmet
/// without evaluating anything.
#[must_use]
pub fn merge_args(
    params: &BTreeMap<String, Value>,
    args: &BTreeMap<String, ArgSpec>,
    alert: &Alert,
) -> Option<BTreeMap<String, Value>> {
    let mut merged = params.clone();
    for (name, spec) in args {
        let resolved = match spec {
            ArgSpec::Field(field) => alert.field(field),
            ArgSpec::AnyOf(fields) => fields
                .iter()
                .find_map(|f| alert.field(f).filter(|v| !v.is_null())),
        };
        match resolved {
            Some(value) if !value.is_null() => {
                merged.insert(name.clone(), value.clone());
            }
            _ => return None,
        }
    }
    Some(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn alert_with(data: &[(&str, Value)]) -> Alert {
        Alert {
            description: String::new(),
            timestamp: Utc::now(),
            techniques: BTreeSet::new(),
            data: data
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn compile_rejects_bad_syntax() {
        let spec = ConditionSpec {
            id: 1,
            description: String::new(),
            params: BTreeMap::new(),
            args: BTreeMap::new(),
            check: "(frobnicate 1)".to_string(),
        };
        assert!(Condition::try_from(spec).is_err());
    }

    #[test]
    fn spec_round_trips_through_condition() {
        let spec = ConditionSpec {
            id: 9,
            description: "python file".to_string(),
            params: BTreeMap::new(),
            args: [("path".to_string(), ArgSpec::Field("file_path".to_string()))]
                .into_iter()
                .collect(),
            check: r#"(ends-with (param "path") ".py")"#.to_string(),
        };
        let cond = Condition::try_from(spec.clone()).unwrap();
        assert_eq!(ConditionSpec::from(&cond), spec);
    }

    #[test]
    fn merge_resolves_single_field() {
        let args = [("path".to_string(), ArgSpec::Field("file_path".to_string()))]
            .into_iter()
            .collect();
        let alert = alert_with(&[("file_path", Value::Str("/tmp/x.py".into()))]);
        let merged = merge_args(&BTreeMap::new(), &args, &alert).unwrap();
        assert_eq!(merged["path"], Value::Str("/tmp/x.py".into()));
    }

    #[test]
    fn merge_any_of_takes_first_present_non_null() {
        let args = [(
            "ip".to_string(),
            ArgSpec::AnyOf(vec![
                "src_ip".to_string(),
                "agent_ip".to_string(),
            ]),
        )]
        .into_iter()
        .collect();
        let alert = alert_with(&[
            ("src_ip", Value::Null),
            ("agent_ip", Value::Str("10.0.0.7".into())),
        ]);
        let merged = merge_args(&BTreeMap::new(), &args, &alert).unwrap();
        assert_eq!(merged["ip"], Value::Str("10.0.0.7".into()));
    }

    #[test]
    fn merge_fails_when_required_field_missing() {
        let args = [("path".to_string(), ArgSpec::Field("file_path".to_string()))]
            .into_iter()
            .collect();
        let alert = alert_with(&[]);
        assert!(merge_args(&BTreeMap::new(), &args, &alert).is_none());
    }

    #[test]
    fn resolved_args_override_param_defaults() {
        let params = [("path".to_string(), Value::Str("/default".into()))]
            .into_iter()
            .collect();
        let args = [("path".to_string(), ArgSpec::Field("file_path".to_string()))]
            .into_iter()
            .collect();
        let alert = alert_with(&[("file_path", Value::Str("/real".into()))]);
        let merged = merge_args(&params, &args, &alert).unwrap();
        assert_eq!(merged["path"], Value::Str("/real".into()));
    }

    #[test]
    fn arg_spec_serde_forms() {
        let one: ArgSpec = serde_json::from_str("\"file_path\"").unwrap();
        assert_eq!(one, ArgSpec::Field("file_path".to_string()));
        let many: ArgSpec = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(
            many,
            ArgSpec::AnyOf(vec!["a".to_string(), "b".to_string()])
        );
    }
}
