//! Mitigation workflow signatures and their per-alert instances.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::alert::{Alert, MitreId};
use crate::catalog::Snapshot;
use crate::condition::{ArgSpec, Condition, merge_args};
use crate::error::CatalogError;
use crate::value::Value;

/// Scale factor converting fractional costs to the planner's integers.
const COST_SCALE: f64 = 1000.0;

/// The static description of a mitigation action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSignature {
    /// Stable identifier.
    pub id: u32,
    /// Operator-facing description.
    #[serde(default)]
    pub description: String,
    /// Webhook endpoint the workflow is invoked through.
    pub url: String,
    /// Technique this workflow mitigates.
    pub target: MitreId,
    /// Non-negative invocation cost.
    pub cost: f64,
    /// Literal parameter defaults.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    /// Alert fields that must resolve for the workflow to be instantiable.
    #[serde(default)]
    pub args: BTreeMap<String, ArgSpec>,
    /// Conditions gating applicability.
    #[serde(default)]
    pub conditions: Vec<u32>,
}

impl WorkflowSignature {
    /// Checks the structural invariants of the signature.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Invariant`] for a non-finite or negative
    /// cost, an unparseable non-HTTP URL, or a reference to a condition
    /// that is not loaded.
    pub fn validate(&self, conditions: &Snapshot<Condition>) -> Result<(), CatalogError> {
        let fail = |reason: String| CatalogError::Invariant {
            kind: "workflow",
            id: self.id,
            reason,
        };

        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(fail(format!("cost {} must be finite and non-negative", self.cost)));
        }
        match reqwest::Url::parse(&self.url) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {}
            Ok(url) => return Err(fail(format!("unsupported URL scheme {:?}", url.scheme()))),
            Err(e) => return Err(fail(format!("invalid URL {:?}: {e}", self.url))),
        }
        for condition in &self.conditions {
            if !conditions.contains_key(condition) {
                return Err(fail(format!("references unknown condition {condition}")));
            }
        }
        Ok(())
    }

    /// Whether the signature targets a technique the alert carries.
    #[must_use]
    pub fn applicable_to(&self, alert: &Alert) -> bool {
        alert.has_technique(&self.target)
    }
}

/// A signature bound to parameters resolved from a specific alert.
#[derive(Debug, Clone)]
pub struct WorkflowInstance {
    /// The underlying signature.
    pub signature: Arc<WorkflowSignature>,
    /// Parameter defaults merged with resolved alert fields.
    pub resolved_params: BTreeMap<String, Value>,
    /// Cost multiplier; 1.0 today, kept for future planner extensions.
    pub cost_factor: f64,
}

impl WorkflowInstance {
    /// Binds a signature to an alert by the shared merge-args rule.
    ///
    /// Returns `None` when a required argument cannot be resolved: the
    /// signature is then not a candidate for this alert at all.
    #[must_use]
    pub fn materialize(signature: Arc<WorkflowSignature>, alert: &Alert) -> Option<Self> {
        let resolved_params = merge_args(&signature.params, &signature.args, alert)?;
        Some(Self {
            signature,
            resolved_params,
            cost_factor: 1.0,
        })
    }

    /// Integer cost the planner optimizes over.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn effective_cost(&self) -> i64 {
        (self.signature.cost * self.cost_factor * COST_SCALE).round() as i64
    }

    /// Canonical rendering of the resolved parameters, used for
    /// deterministic tie-breaking and duplicate suppression.
    ///
    /// `resolved_params` is an ordered map, so the rendering is stable.
    #[must_use]
    pub fn params_key(&self) -> String {
        serde_json::to_string(&self.resolved_params).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::{BTreeMap, BTreeSet};

    fn signature(cost: f64) -> WorkflowSignature {
        WorkflowSignature {
            id: 1,
            description: String::new(),
            url: "http://hooks.internal/close_conn".to_string(),
            target: MitreId::parse("T1041").unwrap(),
            cost,
            params: BTreeMap::new(),
            args: [(
                "ip".to_string(),
                ArgSpec::Field("agent_ip".to_string()),
            )]
            .into_iter()
            .collect(),
            conditions: vec![],
        }
    }

    fn alert(techniques: &[&str], data: &[(&str, Value)]) -> Alert {
        Alert {
            description: String::new(),
            timestamp: Utc::now(),
            techniques: techniques
                .iter()
                .map(|t| MitreId::parse(t).unwrap())
                .collect::<BTreeSet<_>>(),
            data: data
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
        }
    }

    fn no_conditions() -> Snapshot<Condition> {
        Arc::new(BTreeMap::new())
    }

    #[test]
    fn applicability_is_target_membership() {
        let sig = signature(1.0);
        assert!(sig.applicable_to(&alert(&["T1041", "T1219"], &[])));
        assert!(!sig.applicable_to(&alert(&["T1486"], &[])));
    }

    #[test]
    fn materialize_resolves_args() {
        let sig = Arc::new(signature(1.0));
        let a = alert(&["T1041"], &[("agent_ip", Value::Str("10.0.0.7".into()))]);
        let instance = WorkflowInstance::materialize(sig, &a).unwrap();
        assert_eq!(
            instance.resolved_params["ip"],
            Value::Str("10.0.0.7".into())
        );
    }

    #[test]
    fn materialize_fails_without_required_field() {
        let sig = Arc::new(signature(1.0));
        let a = alert(&["T1041"], &[]);
        assert!(WorkflowInstance::materialize(sig, &a).is_none());
    }

    #[test]
    fn effective_cost_scales_and_rounds() {
        let sig = Arc::new(signature(1.5));
        let a = alert(&["T1041"], &[("agent_ip", Value::Str("10.0.0.7".into()))]);
        let mut instance = WorkflowInstance::materialize(sig, &a).unwrap();
        assert_eq!(instance.effective_cost(), 1500);
        instance.cost_factor = 0.3333;
        assert_eq!(instance.effective_cost(), 500);
    }

    #[test]
    fn validate_rejects_bad_cost_and_url() {
        let mut sig = signature(-1.0);
        assert!(sig.validate(&no_conditions()).is_err());
        sig.cost = f64::NAN;
        assert!(sig.validate(&no_conditions()).is_err());
        sig.cost = 1.0;
        sig.url = "ftp://example.com".to_string();
        assert!(sig.validate(&no_conditions()).is_err());
        sig.url = "not a url".to_string();
        assert!(sig.validate(&no_conditions()).is_err());
        sig.url = "https://hooks.internal/x".to_string();
        assert!(sig.validate(&no_conditions()).is_ok());
    }

    #[test]
    fn validate_rejects_unknown_condition() {
        let mut sig = signature(1.0);
        sig.conditions = vec![404];
        assert!(sig.validate(&no_conditions()).is_err());
    }
}
