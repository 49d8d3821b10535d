//! Prometheus metrics handler

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder and describe the session metrics
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

fn describe_metrics() {
    describe_counter!("call_requests_total", "Call requests created");
    describe_counter!(
        "call_transitions_total",
        "Call request status transitions, by target status"
    );
    describe_counter!(
        "billing_postings_total",
        "Calls billed on entering in_progress"
    );
    describe_counter!(
        "billing_failures_total",
        "Join attempts rejected by the ledger, by reason"
    );
    describe_counter!(
        "timer_expiries_total",
        "Transitions forced by an expired countdown, by kind"
    );
    describe_counter!(
        "notifications_dropped_total",
        "Notifications that never reached a party, by reason"
    );
    describe_gauge!(
        "open_call_requests",
        "Requests not yet in a terminal status at the last sweep"
    );
}

/// HTTP metrics handler
pub async fn metrics_handler(State(prometheus_handle): State<PrometheusHandle>) -> Response {
    (StatusCode::OK, prometheus_handle.render()).into_response()
}
