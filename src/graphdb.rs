//! Graph-database collaborator used by the `db-count` condition escape.
//!
//! The engine only ever asks one question of the graph database: how many
//! rows does a parameterized query match. Everything else about the
//! database stays outside this crate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::schema::GraphDbConfig;
use crate::error::GraphDbError;
use crate::value::Value;

/// Query interface to the graph database.
#[async_trait]
pub trait GraphDb: Send + Sync {
    /// Runs a parameterized query and returns its row count.
    async fn count(&self, query: &str, params: &[Value]) -> Result<u64, GraphDbError>;
}

/// HTTP-backed graph-database client.
///
/// Posts `{query, params}` to the configured query endpoint and reads
/// `{count}` back.
pub struct HttpGraphDb {
    client: reqwest::Client,
    url: String,
    username: Option<String>,
    password: Option<String>,
    timeout: Duration,
}

#[derive(Deserialize)]
struct CountResponse {
    count: u64,
}

impl HttpGraphDb {
    /// Builds a client from configuration.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should never happen).
    #[must_use]
    pub fn new(config: &GraphDbConfig) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            url: config.url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.timeout,
        }
    }
}

#[async_trait]
impl GraphDb for HttpGraphDb {
    async fn count(&self, query: &str, params: &[Value]) -> Result<u64, GraphDbError> {
        debug!(url = %self.url, "graph-database count query");

        let body = serde_json::json!({ "query": query, "params": params });
        let mut req = self.client.post(&self.url).json(&body);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let response = tokio::time::timeout(self.timeout, req.send())
            .await
            .map_err(|_| GraphDbError::Timeout(self.timeout))?
            .map_err(|e| GraphDbError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GraphDbError::Status(status.as_u16()));
        }

        let decoded: CountResponse = response
            .json()
            .await
            .map_err(|e| GraphDbError::Decode(e.to_string()))?;
        Ok(decoded.count)
    }
}

/// Placeholder client used when no graph database is configured.
///
/// Every query fails, which the evaluator turns into an unmet condition.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unavailable;

#[async_trait]
impl GraphDb for Unavailable {
    async fn count(&self, _query: &str, _params: &[Value]) -> Result<u64, GraphDbError> {
        Err(GraphDbError::Connect(
            "no graph database configured".to_string(),
        ))
    }
}

/// Fixed-count client for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticCount(pub u64);

#[async_trait]
impl GraphDb for StaticCount {
    async fn count(&self, _query: &str, _params: &[Value]) -> Result<u64, GraphDbError> {
        Ok(self.0)
    }
}

/// Builds the configured client, falling back to [`Unavailable`].
#[must_use]
pub fn from_config(config: Option<&GraphDbConfig>) -> Arc<dyn GraphDb> {
    config.map_or_else(
        || Arc::new(Unavailable) as Arc<dyn GraphDb>,
        |cfg| Arc::new(HttpGraphDb::new(cfg)) as Arc<dyn GraphDb>,
    )
}
