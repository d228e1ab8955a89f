//! Message-bus alert ingress.
//!
//! Subscribes to the configured NATS subject and feeds normalized alerts
//! into the processing queue. Invalid payloads are logged and dropped; a
//! subscription that ends beyond the client's reconnect policy is fatal
//! and triggers orderly shutdown.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alert::{Alert, MappingSchema, normalize};
use crate::config::schema::BusConfig;
use crate::error::BusError;
use crate::observability::metrics;

/// Runs the bus subscription until cancellation or connection loss.
///
/// # Errors
///
/// Returns [`BusError`] when the initial connection or subscription fails,
/// or when the subscription ends unexpectedly.
pub async fn run(
    config: BusConfig,
    mapping: Arc<MappingSchema>,
    queue: mpsc::Sender<Arc<Alert>>,
    cancel: CancellationToken,
) -> Result<(), BusError> {
    let url = format!("nats://{}:{}", config.host, config.port);
    let client = async_nats::ConnectOptions::new()
        .require_tls(config.tls)
        .connect(&url)
        .await
        .map_err(|e| BusError::Connect(e.to_string()))?;

    let mut subscriber = client
        .subscribe(config.subject.clone())
        .await
        .map_err(|e| BusError::Subscribe(e.to_string()))?;

    info!(url = %url, subject = %config.subject, "bus subscription established");

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("bus ingress cancelled");
                return Ok(());
            }
            message = subscriber.next() => {
                let Some(message) = message else {
                    // The client reconnects internally; a closed
                    // subscription means reconnection gave up.
                    return Err(BusError::Lost);
                };
                handle_payload(&message.payload, &mapping, &queue).await;
            }
        }
    }
}

/// Normalizes one bus payload and enqueues it.
async fn handle_payload(
    payload: &[u8],
    mapping: &MappingSchema,
    queue: &mpsc::Sender<Arc<Alert>>,
) {
    let document: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(document) => document,
        Err(e) => {
            warn!(error = %e, "dropping non-JSON bus payload");
            metrics::record_alert_dropped("invalid_json");
            return;
        }
    };

    match normalize(&document, mapping) {
        Ok(alert) => {
            metrics::record_alert();
            if queue.send(Arc::new(alert)).await.is_err() {
                // The worker is gone; shutdown is already in progress.
                debug!("alert queue closed; dropping bus payload");
            }
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed bus alert");
            metrics::record_alert_dropped("malformed");
        }
    }
}
