//! Metrics for the alert pipeline.
//!
//! Typed convenience functions over the `metrics` facade. Installing a
//! recorder is left to the embedder; without one every call is a no-op.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Registers metric descriptions with the global recorder.
pub fn describe() {
    describe_counter!("mitigator_alerts_total", "Alerts accepted for processing");
    describe_counter!(
        "mitigator_alerts_dropped_total",
        "Inbound payloads dropped before processing"
    );
    describe_counter!(
        "mitigator_node_triggers_total",
        "Attack-graph nodes triggered by alerts"
    );
    describe_counter!("mitigator_dispatches_total", "Webhook dispatches by status");
    describe_counter!(
        "mitigator_unmitigated_total",
        "Alerts no applicable workflow could cover"
    );
    describe_gauge!("mitigator_live_instances", "Currently live attack instances");
}

/// Records an alert accepted for processing.
pub fn record_alert() {
    counter!("mitigator_alerts_total").increment(1);
}

/// Records an inbound payload dropped before processing.
pub fn record_alert_dropped(reason: &'static str) {
    counter!("mitigator_alerts_dropped_total", "reason" => reason).increment(1);
}

/// Records one triggered attack-graph node.
pub fn record_node_trigger(graph: u32) {
    counter!("mitigator_node_triggers_total", "graph" => graph.to_string()).increment(1);
}

/// Records a webhook dispatch outcome.
pub fn record_dispatch(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("mitigator_dispatches_total", "status" => status).increment(1);
}

/// Records an alert left unmitigated.
pub fn record_unmitigated() {
    counter!("mitigator_unmitigated_total").increment(1);
}

/// Updates the live attack-instance gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_live_instances(count: usize) {
    gauge!("mitigator_live_instances").set(count as f64);
}
