//! HTTP API.
//!
//! Exposes version information, an alert intake endpoint feeding the
//! processing queue, and CRUD over the three catalogs. Catalog writes are
//! validated against the live condition registry, applied to the
//! copy-on-write catalogs, and persisted through the store before the
//! request completes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::alert::{Alert, MappingSchema, normalize};
use crate::catalog::Catalogs;
use crate::condition::{Condition, ConditionSpec};
use crate::error::Error;
use crate::graph::{AttackGraph, AttackNode};
use crate::observability::metrics;
use crate::store::Store;
use crate::workflow::WorkflowSignature;

/// Shared state behind the API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Alert queue feeding the worker.
    pub queue: mpsc::Sender<Arc<Alert>>,
    /// Live catalogs.
    pub catalogs: Arc<Catalogs>,
    /// Persistent catalog store.
    pub store: Arc<Store>,
    /// Field-mapping schema for inbound alerts.
    pub mapping: Arc<MappingSchema>,
}

/// Builds the API router.
#[must_use]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/alert", axum::routing::post(post_alert))
        .route("/condition", get(get_condition).post(post_condition))
        .route("/node", get(get_node).post(post_node))
        .route("/graph", get(get_graph).post(post_graph))
        .route("/workflow", get(get_workflow).post(post_workflow))
        .with_state(state)
}

/// Serves the API until the cancellation token fires.
///
/// # Errors
///
/// Returns an I/O error if the listener cannot bind.
pub async fn serve(
    listen: SocketAddr,
    state: ApiState,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let listener = TcpListener::bind(listen).await?;
    let bound = listener.local_addr()?;
    info!(addr = %bound, "HTTP API listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

// ============================================================================
// Version
// ============================================================================

#[derive(Debug, Serialize)]
struct VersionInfo {
    version: &'static str,
    major: u32,
    minor: u32,
}

async fn version() -> axum::Json<VersionInfo> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    let mut parts = VERSION.split('.');
    let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    axum::Json(VersionInfo {
        version: VERSION,
        major,
        minor,
    })
}

// ============================================================================
// Alert intake
// ============================================================================

async fn post_alert(State(state): State<ApiState>, headers: HeaderMap, body: Bytes) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"));
    if !is_json {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    let document: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(document) => document,
        Err(e) => {
            metrics::record_alert_dropped("invalid_json");
            return problem(StatusCode::BAD_REQUEST, &format!("invalid JSON: {e}"));
        }
    };

    let alert = match normalize(&document, &state.mapping) {
        Ok(alert) => Arc::new(alert),
        Err(e) => {
            warn!(error = %e, "alert rejected at intake");
            metrics::record_alert_dropped("malformed");
            return problem(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    match state.queue.try_send(alert) {
        Ok(()) => {
            metrics::record_alert();
            StatusCode::ACCEPTED.into_response()
        }
        Err(_) => {
            metrics::record_alert_dropped("queue_full");
            problem(StatusCode::SERVICE_UNAVAILABLE, "alert queue unavailable")
        }
    }
}

// ============================================================================
// Catalog CRUD
// ============================================================================

#[derive(Debug, Deserialize)]
struct IdQuery {
    id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct NodeQuery {
    id: Option<u32>,
    graph: Option<u32>,
}

async fn get_condition(State(state): State<ApiState>, Query(query): Query<IdQuery>) -> Response {
    let snapshot = state.catalogs.conditions.snapshot();
    match query.id {
        Some(id) => snapshot.get(&id).map_or_else(
            || problem(StatusCode::NOT_FOUND, &format!("no condition with id {id}")),
            |c| axum::Json(ConditionSpec::from(c.as_ref())).into_response(),
        ),
        None => {
            let all: Vec<ConditionSpec> = snapshot
                .values()
                .map(|c| ConditionSpec::from(c.as_ref()))
                .collect();
            axum::Json(all).into_response()
        }
    }
}

async fn post_condition(
    State(state): State<ApiState>,
    axum::Json(spec): axum::Json<ConditionSpec>,
) -> Response {
    let condition = match Condition::try_from(spec) {
        Ok(condition) => condition,
        Err(e) => return problem(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string()),
    };
    let id = condition.id;
    state.catalogs.conditions.insert(id, condition);
    match state.store.persist_conditions(&state.catalogs.conditions) {
        Ok(()) => {
            info!(condition = id, "condition stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn get_graph(State(state): State<ApiState>, Query(query): Query<IdQuery>) -> Response {
    let snapshot = state.catalogs.graphs.snapshot();
    match query.id {
        Some(id) => snapshot.get(&id).map_or_else(
            || problem(StatusCode::NOT_FOUND, &format!("no graph with id {id}")),
            |g| axum::Json(g.as_ref().clone()).into_response(),
        ),
        None => {
            let all: Vec<AttackGraph> = snapshot.values().map(|g| g.as_ref().clone()).collect();
            axum::Json(all).into_response()
        }
    }
}

async fn post_graph(
    State(state): State<ApiState>,
    axum::Json(graph): axum::Json<AttackGraph>,
) -> Response {
    let conditions = state.catalogs.conditions.snapshot();
    if let Err(e) = graph.validate(&conditions) {
        return problem(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }
    let id = graph.id;
    state.catalogs.graphs.insert(id, graph);
    match state.store.persist_graphs(&state.catalogs.graphs) {
        Ok(()) => {
            info!(graph = id, "graph template stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn get_node(State(state): State<ApiState>, Query(query): Query<NodeQuery>) -> Response {
    let snapshot = state.catalogs.graphs.snapshot();
    match query.id {
        Some(id) => snapshot
            .values()
            .find_map(|g| g.node(id))
            .map_or_else(
                || problem(StatusCode::NOT_FOUND, &format!("no node with id {id}")),
                |n| axum::Json(n.clone()).into_response(),
            ),
        None => {
            let all: Vec<AttackNode> = snapshot
                .values()
                .flat_map(|g| g.nodes.values().cloned())
                .collect();
            axum::Json(all).into_response()
        }
    }
}

/// Stores or updates a node inside the template that owns it.
///
/// Node ids are unique across templates. An existing node is replaced in
/// place; a new node needs the owning template named in `?graph=`.
async fn post_node(
    State(state): State<ApiState>,
    Query(query): Query<NodeQuery>,
    axum::Json(node): axum::Json<AttackNode>,
) -> Response {
    let snapshot = state.catalogs.graphs.snapshot();
    let owner = snapshot
        .values()
        .find(|g| g.nodes.contains_key(&node.id))
        .map(|g| g.id)
        .or(query.graph);

    let Some(graph_id) = owner else {
        return problem(
            StatusCode::NOT_FOUND,
            &format!("node {} belongs to no template; pass ?graph=", node.id),
        );
    };
    let Some(graph) = snapshot.get(&graph_id) else {
        return problem(StatusCode::NOT_FOUND, &format!("no graph with id {graph_id}"));
    };

    let mut updated = graph.as_ref().clone();
    let node_id = node.id;
    updated.nodes.insert(node_id, node);

    let conditions = state.catalogs.conditions.snapshot();
    if let Err(e) = updated.validate(&conditions) {
        return problem(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }

    state.catalogs.graphs.insert(graph_id, updated);
    match state.store.persist_graphs(&state.catalogs.graphs) {
        Ok(()) => {
            info!(node = node_id, graph = graph_id, "attack node stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

async fn get_workflow(State(state): State<ApiState>, Query(query): Query<IdQuery>) -> Response {
    let snapshot = state.catalogs.workflows.snapshot();
    match query.id {
        Some(id) => snapshot.get(&id).map_or_else(
            || problem(StatusCode::NOT_FOUND, &format!("no workflow with id {id}")),
            |w| axum::Json(w.as_ref().clone()).into_response(),
        ),
        None => {
            let all: Vec<WorkflowSignature> =
                snapshot.values().map(|w| w.as_ref().clone()).collect();
            axum::Json(all).into_response()
        }
    }
}

async fn post_workflow(
    State(state): State<ApiState>,
    axum::Json(workflow): axum::Json<WorkflowSignature>,
) -> Response {
    let conditions = state.catalogs.conditions.snapshot();
    if let Err(e) = workflow.validate(&conditions) {
        return problem(StatusCode::UNPROCESSABLE_ENTITY, &e.to_string());
    }
    let id = workflow.id;
    state.catalogs.workflows.insert(id, workflow);
    match state.store.persist_workflows(&state.catalogs.workflows) {
        Ok(()) => {
            info!(workflow = id, "workflow signature stored");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => problem(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
    }
}

/// Renders an error response body.
fn problem(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "error": message }))).into_response()
}
