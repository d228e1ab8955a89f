//! Persistence round trips: a condition persisted then reloaded must
//! evaluate identically on the same alert, and the full catalog survives
//! a restart byte-for-byte in meaning.

mod common;

use std::sync::Arc;

use common::{
    chmod_alert, evaluator, file_executable, file_is_python, fixture_catalogs, ncat_alert,
    ransomware_alert, DEAD_HOOK_BASE,
};
use mitigator::catalog::Catalogs;
use mitigator::graph::AttackEngine;
use mitigator::store::{Store, StorePaths};

const PAYLOAD: &str = "/tmp/zerologon_tester.py";

fn store_in(dir: &std::path::Path) -> Store {
    Store::new(StorePaths {
        graphs: dir.join("graphs.json"),
        workflows: dir.join("workflows.json"),
        conditions: dir.join("conditions.json"),
    })
}

fn persist_all(store: &Store, catalogs: &Catalogs) {
    store.persist_conditions(&catalogs.conditions).unwrap();
    store.persist_graphs(&catalogs.graphs).unwrap();
    store.persist_workflows(&catalogs.workflows).unwrap();
}

#[tokio::test]
async fn reloaded_conditions_evaluate_identically() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let catalogs = fixture_catalogs(DEAD_HOOK_BASE);
    persist_all(&store, &catalogs);

    let reloaded = store.load().unwrap();
    let eval = evaluator();

    let alerts = [
        chmod_alert(PAYLOAD),
        chmod_alert("/tmp/note.txt"),
        ransomware_alert(PAYLOAD),
        ncat_alert(),
    ];
    for condition in [file_is_python(), file_executable()] {
        let restored = reloaded.conditions.get(condition.id).unwrap();
        for alert in &alerts {
            assert_eq!(
                eval.is_met(&condition, alert).await,
                eval.is_met(&restored, alert).await,
                "condition {} diverged after reload",
                condition.id
            );
        }
    }
}

#[tokio::test]
async fn restart_preserves_engine_behavior() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    persist_all(&store, &fixture_catalogs(DEAD_HOOK_BASE));

    // Two fresh processes loading the same persisted state must walk the
    // same alert sequence to the same end state.
    let eval = evaluator();
    let mut fronts = Vec::new();
    for _ in 0..2 {
        let catalogs = Arc::new(store.load().unwrap());
        let view = catalogs.snapshot();
        let mut engine = AttackEngine::new();
        engine
            .step(&ncat_alert(), &view.graphs, &view.conditions, &eval)
            .await;
        engine
            .step(&chmod_alert(PAYLOAD), &view.graphs, &view.conditions, &eval)
            .await;
        fronts.push(
            engine
                .instances_of(1)
                .iter()
                .map(|i| i.front.clone())
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(fronts[0], fronts[1]);
    assert_eq!(fronts[0], vec![vec![103]]);
}

#[test]
fn catalog_documents_survive_rewrites() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let catalogs = fixture_catalogs(DEAD_HOOK_BASE);
    persist_all(&store, &catalogs);

    // Mutate and rewrite, then reload and compare.
    catalogs.workflows.remove(2);
    store.persist_workflows(&catalogs.workflows).unwrap();

    let reloaded = store.load().unwrap();
    assert_eq!(reloaded.workflows.len(), 2);
    assert_eq!(reloaded.conditions.len(), 3);
    assert_eq!(reloaded.graphs.len(), 1);
}

#[test]
fn dangling_condition_reference_fails_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let store = store_in(dir.path());
    let catalogs = fixture_catalogs(DEAD_HOOK_BASE);
    // Node 103 and workflow 3 still reference condition 3.
    catalogs.conditions.remove(3);
    persist_all(&store, &catalogs);

    assert!(store.load().is_err());
}
