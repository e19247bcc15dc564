// crates/server/src/routes/mod.rs
//! API route handlers for the docscan progress server.

pub mod health;
pub mod metrics;
pub mod progress;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router.
///
/// Routes:
/// - GET  /api/health - Health check with registry counts
/// - GET  /api/reports/progress/{report_id} - SSE stream of report progress
/// - GET  /api/reports/progress/{report_id}/status - JSON snapshot of report progress
/// - POST /api/reports/progress/{report_id} - Producer progress update
/// - POST /api/reports/progress/{report_id}/complete - Producer completion
/// - POST /api/reports/progress/{report_id}/fail - Producer failure
/// - GET  /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", progress::router())
        .merge(metrics::router())
        .with_state(state)
}
