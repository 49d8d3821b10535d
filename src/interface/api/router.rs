//! API Router configuration

use super::call_request_handler::{
    advisor_response, client_response, create_call_request, end_call, get_call_request,
    health_check, AppState,
};
use super::ledger_handler::{list_transactions, post_credit};
use super::metrics_handler::metrics_handler;
use super::ws_handler::ws_feed_handler;
use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the API router
pub fn build_router(state: AppState, prometheus_handle: PrometheusHandle) -> Router {
    // Health check route (no caller required)
    let health_routes = Router::new().route("/health", get(health_check));

    // Call request lifecycle routes
    let call_routes = Router::new()
        .route("/call-requests", post(create_call_request))
        .route("/call-requests/:id", get(get_call_request))
        .route("/call-requests/:id/advisor-response", post(advisor_response))
        .route("/call-requests/:id/client-response", post(client_response))
        .route("/call-requests/:id/end", post(end_call));

    // Wallet ledger routes
    let ledger_routes = Router::new()
        .route("/accounts/:id/transactions", get(list_transactions))
        .route("/accounts/:id/credits", post(post_credit));

    let ws_routes = Router::new().route("/ws/feed", get(ws_feed_handler));

    // Metrics route (separate state)
    let metrics_routes = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(prometheus_handle);

    Router::new()
        .merge(health_routes)
        .merge(call_routes)
        .merge(ledger_routes)
        .merge(ws_routes)
        .with_state(state)
        .merge(metrics_routes)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
