//! HTTP API behavior: version info, alert intake, and catalog CRUD with
//! validation and persistence.

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::json;
use tokio::sync::mpsc;
use tower::util::ServiceExt;

use common::{fixture_catalogs, DEAD_HOOK_BASE};
use mitigator::alert::{Alert, MappingSchema};
use mitigator::catalog::Catalogs;
use mitigator::server::{ApiState, router};
use mitigator::store::{Store, StorePaths};

struct Harness {
    router: Router,
    queue: mpsc::Receiver<Arc<Alert>>,
    catalogs: Arc<Catalogs>,
    _dir: tempfile::TempDir,
}

fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(Store::new(StorePaths {
        graphs: dir.path().join("graphs.json"),
        workflows: dir.path().join("workflows.json"),
        conditions: dir.path().join("conditions.json"),
    }));
    let catalogs = Arc::new(fixture_catalogs(DEAD_HOOK_BASE));
    let mapping = Arc::new(
        MappingSchema::new(json!({
            "rule": {"description": "description", "mitre": {"id": "mitre_ids"}},
            "syscheck": {"path": "file_path"}
        }))
        .unwrap(),
    );
    let (tx, rx) = mpsc::channel(8);
    let state = ApiState {
        queue: tx,
        catalogs: Arc::clone(&catalogs),
        store,
        mapping,
    };
    Harness {
        router: router(state),
        queue: rx,
        catalogs,
        _dir: dir,
    }
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post_json(path: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(body).unwrap()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn version_reports_components() {
    let h = harness();
    let response = h.router.oneshot(get("/version")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let version = body["version"].as_str().unwrap();
    assert_eq!(
        version.split('.').next().unwrap(),
        body["major"].as_u64().unwrap().to_string()
    );
    assert!(body["minor"].is_u64());
}

#[tokio::test]
async fn alert_with_wrong_content_type_is_not_acceptable() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/alert")
        .header(header::CONTENT_TYPE, "text/plain")
        .body(Body::from("netcat"))
        .unwrap();
    let response = h.router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_ACCEPTABLE);
}

#[tokio::test]
async fn accepted_alert_lands_in_the_queue() {
    let mut h = harness();
    let document = json!({
        "rule": {"description": "Netcat listening", "mitre": {"id": ["T1041"]}},
        "syscheck": {"path": "/tmp/zerologon_tester.py"}
    });
    let response = h.router.oneshot(post_json("/alert", &document)).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let queued = h.queue.try_recv().expect("alert must be enqueued");
    assert_eq!(queued.description, "Netcat listening");
    assert_eq!(queued.techniques.len(), 1);
}

#[tokio::test]
async fn malformed_alert_is_rejected() {
    let h = harness();
    let document = json!({"syscheck": {"path": {"nested": "object"}}});
    let response = h.router.oneshot(post_json("/alert", &document)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn condition_round_trips_through_the_api() {
    let h = harness();
    let spec = json!({
        "id": 50,
        "description": "destination port is interactive",
        "params": {},
        "args": {"port": "connection_dst_port"},
        "check": "(in (param \"port\") (list 22 3389))"
    });

    let response = h
        .router
        .clone()
        .oneshot(post_json("/condition", &spec))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h.router.oneshot(get("/condition?id=50")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, spec);
}

#[tokio::test]
async fn condition_with_bad_syntax_is_rejected_and_not_stored() {
    let h = harness();
    let spec = json!({
        "id": 51,
        "description": "broken",
        "check": "(frobnicate 1 2)"
    });

    let response = h
        .router
        .clone()
        .oneshot(post_json("/condition", &spec))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = h.router.oneshot(get("/condition?id=51")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(h.catalogs.conditions.get(51).is_none());
}

#[tokio::test]
async fn condition_list_returns_all() {
    let h = harness();
    let response = h.router.oneshot(get("/condition")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn node_lookup_searches_templates() {
    let h = harness();
    let response = h.router.oneshot(get("/node?id=102")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["technique"], "T1222.002");
}

#[tokio::test]
async fn node_update_replaces_in_owning_template() {
    let h = harness();
    let node = json!({
        "id": 102,
        "technique": "T1222.002",
        "next": [103],
        "conditions": [1],
        "description": "loosened gate"
    });
    let response = h.router.clone().oneshot(post_json("/node", &node)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let graph = h.catalogs.graphs.get(1).unwrap();
    assert_eq!(graph.node(102).unwrap().conditions, vec![1]);
}

#[tokio::test]
async fn node_update_with_broken_edge_is_rejected() {
    let h = harness();
    let node = json!({
        "id": 102,
        "technique": "T1222.002",
        "next": [999],
        "conditions": []
    });
    let response = h.router.oneshot(post_json("/node", &node)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn unknown_node_without_graph_param_is_not_found() {
    let h = harness();
    let node = json!({"id": 900, "technique": "T1041", "next": []});
    let response = h.router.oneshot(post_json("/node", &node)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn new_node_attaches_via_graph_param() {
    let h = harness();
    let node = json!({"id": 104, "technique": "T1486", "next": []});
    let response = h
        .router
        .clone()
        .oneshot(post_json("/node?graph=1", &node))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(h.catalogs.graphs.get(1).unwrap().node(104).is_some());
}

#[tokio::test]
async fn workflow_with_negative_cost_is_rejected() {
    let h = harness();
    let workflow = json!({
        "id": 60,
        "url": "http://hooks.internal/x",
        "target": "T1041",
        "cost": -2.0
    });
    let response = h.router.oneshot(post_json("/workflow", &workflow)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn workflow_round_trips_through_the_api() {
    let h = harness();
    let workflow = json!({
        "id": 61,
        "description": "block the source address",
        "url": "http://hooks.internal/block_ip",
        "target": "T1110",
        "cost": 0.25,
        "params": {},
        "args": {"ip": ["src_ip", "agent_ip"]},
        "conditions": []
    });
    let response = h
        .router
        .clone()
        .oneshot(post_json("/workflow", &workflow))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h.router.oneshot(get("/workflow?id=61")).await.unwrap();
    assert_eq!(body_json(response).await, workflow);
}

#[tokio::test]
async fn graph_round_trips_through_the_api() {
    let h = harness();
    let graph = json!({
        "id": 2,
        "description": "brute force then lateral movement",
        "initial": 201,
        "nodes": {
            "201": {"id": 201, "technique": "T1110", "next": [202], "conditions": [], "description": ""},
            "202": {"id": 202, "technique": "T1021", "next": [], "conditions": [], "description": ""}
        }
    });
    let response = h.router.clone().oneshot(post_json("/graph", &graph)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = h.router.oneshot(get("/graph?id=2")).await.unwrap();
    assert_eq!(body_json(response).await, graph);
}

#[tokio::test]
async fn graph_with_cycle_is_rejected() {
    let h = harness();
    let graph = json!({
        "id": 3,
        "initial": 1,
        "nodes": {
            "1": {"id": 1, "technique": "T1110", "next": [2]},
            "2": {"id": 2, "technique": "T1021", "next": [1]}
        }
    });
    let response = h.router.oneshot(post_json("/graph", &graph)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
