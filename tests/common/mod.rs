//! Shared fixtures: the three-step ransomware attack pattern and its
//! conditions and mitigation workflows, mirrored from `etc/catalog/`.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;

use mitigator::alert::{Alert, MitreId};
use mitigator::catalog::Catalogs;
use mitigator::condition::{ArgSpec, Condition, ConditionSpec, Evaluator};
use mitigator::graph::{AttackGraph, AttackNode};
use mitigator::graphdb::Unavailable;
use mitigator::value::Value;
use mitigator::workflow::WorkflowSignature;

/// An endpoint that refuses connections immediately.
pub const DEAD_HOOK_BASE: &str = "http://127.0.0.1:59999";

pub fn evaluator() -> Evaluator {
    Evaluator::new(Arc::new(Unavailable))
}

pub fn condition(id: u32, args: &[(&str, ArgSpec)], check: &str) -> Condition {
    Condition::try_from(ConditionSpec {
        id,
        description: format!("condition {id}"),
        params: BTreeMap::new(),
        args: args
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
        check: check.to_string(),
    })
    .expect("fixture condition must parse")
}

pub fn file_is_python() -> Condition {
    condition(
        1,
        &[("path", ArgSpec::Field("file_path".to_string()))],
        r#"(ends-with (param "path") ".py")"#,
    )
}

pub fn file_executable() -> Condition {
    condition(
        2,
        &[("perms", ArgSpec::Field("file_permissions".to_string()))],
        r#"(contains (param "perms") "x")"#,
    )
}

pub fn file_is_ransomware() -> Condition {
    condition(
        3,
        &[("path", ArgSpec::Field("file_path".to_string()))],
        r#"(contains (param "path") "zerologon")"#,
    )
}

pub fn node(id: u32, technique: &str, next: &[u32], conditions: &[u32]) -> AttackNode {
    AttackNode {
        id,
        technique: MitreId::parse(technique).unwrap(),
        next: next.to_vec(),
        conditions: conditions.to_vec(),
        description: String::new(),
    }
}

/// The ncat → chmod → ransomware template: 101 → 102 → 103.
pub fn ransomware_graph() -> AttackGraph {
    AttackGraph {
        id: 1,
        description: "remote shell, staged payload, ransomware execution".to_string(),
        nodes: [
            node(101, "T1041", &[102], &[]),
            node(102, "T1222.002", &[103], &[1, 2]),
            node(103, "T1204.002", &[], &[1, 3]),
        ]
        .into_iter()
        .map(|n| (n.id, n))
        .collect(),
        initial: 101,
    }
}

pub fn workflow(
    id: u32,
    name: &str,
    target: &str,
    cost: f64,
    base: &str,
    args: &[(&str, ArgSpec)],
    conditions: &[u32],
) -> WorkflowSignature {
    WorkflowSignature {
        id,
        description: name.to_string(),
        url: format!("{base}/{name}"),
        target: MitreId::parse(target).unwrap(),
        cost,
        params: BTreeMap::new(),
        args: args
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
        conditions: conditions.to_vec(),
    }
}

/// Conditions 1-3, the ransomware template, and the three mitigation
/// workflows, pointing their webhooks at `base`.
pub fn fixture_catalogs(base: &str) -> Catalogs {
    let catalogs = Catalogs::default();
    for cond in [file_is_python(), file_executable(), file_is_ransomware()] {
        catalogs.conditions.insert(cond.id, cond);
    }
    catalogs.graphs.insert(1, ransomware_graph());

    let any_ip = ArgSpec::AnyOf(vec!["src_ip".to_string(), "agent_ip".to_string()]);
    catalogs.workflows.insert(
        1,
        workflow(1, "close_conn", "T1041", 1.0, base, &[("ip", any_ip)], &[]),
    );
    catalogs.workflows.insert(
        2,
        workflow(
            2,
            "delete_file",
            "T1222.002",
            2.0,
            base,
            &[("path", ArgSpec::Field("file_path".to_string()))],
            &[1],
        ),
    );
    let mut handle_ransomware = workflow(
        3,
        "handle_ransomware",
        "T1204.002",
        5.0,
        base,
        &[("path", ArgSpec::Field("file_path".to_string()))],
        &[1, 3],
    );
    handle_ransomware
        .params
        .insert("quarantine".to_string(), Value::Bool(true));
    catalogs.workflows.insert(3, handle_ransomware);
    catalogs
}

pub fn alert(techniques: &[&str], data: &[(&str, Value)]) -> Arc<Alert> {
    Arc::new(Alert {
        description: techniques.join("+"),
        timestamp: Utc::now(),
        techniques: techniques
            .iter()
            .map(|t| MitreId::parse(t).unwrap())
            .collect::<BTreeSet<_>>(),
        data: data
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect(),
    })
}

/// Step 1 of the scenario: an exfiltration channel opens.
pub fn ncat_alert() -> Arc<Alert> {
    alert(
        &["T1041", "T1219"],
        &[("agent_ip", Value::Str("10.0.0.7".into()))],
    )
}

/// Step 2: the dropped file is made executable.
pub fn chmod_alert(path: &str) -> Arc<Alert> {
    alert(
        &["T1222.002"],
        &[
            ("file_path", Value::Str(path.into())),
            ("file_permissions", Value::Str("rwxr-xr-x".into())),
        ],
    )
}

/// Step 3: the staged tooling is executed.
pub fn ransomware_alert(path: &str) -> Arc<Alert> {
    alert(&["T1204.002"], &[("file_path", Value::Str(path.into()))])
}
