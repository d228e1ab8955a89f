//! Webhook dispatch.
//!
//! Each chosen workflow instance is enacted by POSTing its resolved
//! parameters as JSON to the signature's URL. Dispatch is fire-and-forget:
//! webhooks are not idempotent in general, so failures are reported, never
//! retried. Dispatches within one plan run concurrently, and the same
//! workflow instance is never posted twice in one plan.

use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, error, info};

use crate::error::DispatchError;
use crate::planner::MitigationPlan;
use crate::workflow::WorkflowInstance;

/// Default outbound HTTP timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one webhook invocation.
#[derive(Debug)]
pub struct DispatchReport {
    /// Workflow signature id.
    pub workflow: u32,
    /// Webhook URL that was posted to.
    pub url: String,
    /// Success, or why the dispatch failed.
    pub outcome: Result<(), DispatchError>,
}

/// Posts planned workflow instances to their webhooks.
pub struct Dispatcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl Dispatcher {
    /// Creates a dispatcher with the given outbound timeout.
    ///
    /// The shared client follows no redirects.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built (should never happen).
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build HTTP client");
        Self { client, timeout }
    }

    /// Dispatches every workflow instance in the plan.
    ///
    /// Reports come back in plan order regardless of completion order.
    pub async fn dispatch(&self, plan: &MitigationPlan) -> Vec<DispatchReport> {
        let mut seen = std::collections::BTreeSet::new();
        let mut unique = Vec::new();
        for assignment in &plan.assignments {
            for instance in &assignment.workflows {
                if seen.insert((instance.signature.id, instance.params_key())) {
                    unique.push(instance);
                } else {
                    debug!(
                        workflow = instance.signature.id,
                        "duplicate workflow instance suppressed within plan"
                    );
                }
            }
        }

        join_all(unique.into_iter().map(|instance| self.post(instance))).await
    }

    /// Issues one POST and converts the result into a report.
    async fn post(&self, instance: &WorkflowInstance) -> DispatchReport {
        let signature = &instance.signature;
        let outcome = self.post_params(instance).await;
        match &outcome {
            Ok(()) => {
                info!(workflow = signature.id, url = %signature.url, "workflow dispatched");
            }
            Err(e) => {
                error!(workflow = signature.id, url = %signature.url, error = %e, "dispatch failed");
            }
        }
        DispatchReport {
            workflow: signature.id,
            url: signature.url.clone(),
            outcome,
        }
    }

    async fn post_params(&self, instance: &WorkflowInstance) -> Result<(), DispatchError> {
        let request = self
            .client
            .post(&instance.signature.url)
            .json(&instance.resolved_params);

        let response = tokio::time::timeout(self.timeout, request.send())
            .await
            .map_err(|_| DispatchError::Timeout(self.timeout))?
            .map_err(|e| DispatchError::Connect(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DispatchError::Status(status.as_u16()))
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
