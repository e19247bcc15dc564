// crates/server/src/routes/progress.rs
//! Report progress endpoints.
//!
//! Viewer side:
//! - `GET /api/reports/progress/{report_id}`          - SSE stream of progress events
//! - `GET /api/reports/progress/{report_id}/status`   - JSON snapshot (polling fallback)
//!
//! Producer side (analysis pipeline running out of process):
//! - `POST /api/reports/progress/{report_id}`          - merge a partial update
//! - `POST /api/reports/progress/{report_id}/complete` - mark completed
//! - `POST /api/reports/progress/{report_id}/fail`     - mark failed

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use docscan_progress::{JobState, ProgressUpdate};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

const MAX_REPORT_ID_LEN: usize = 128;

/// Body of `POST .../fail`.
#[derive(Debug, Default, Deserialize)]
pub struct FailRequest {
    #[serde(default)]
    pub message: Option<String>,
}

/// Build the progress sub-router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/reports/progress/{report_id}",
            get(progress_stream).post(update_progress),
        )
        .route("/reports/progress/{report_id}/status", get(progress_status))
        .route("/reports/progress/{report_id}/complete", post(complete_progress))
        .route("/reports/progress/{report_id}/fail", post(fail_progress))
}

/// Report ids are opaque but end up in log fields and registry keys,
/// so they are limited to a URL-safe alphabet.
fn validate_report_id(report_id: &str) -> ApiResult<()> {
    let valid = !report_id.is_empty()
        && report_id.len() <= MAX_REPORT_ID_LEN
        && report_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(ApiError::InvalidReportId(report_id.to_string()))
    }
}

fn progress_event(state: &JobState) -> Event {
    match Event::default().json_data(state.event()) {
        Ok(event) => event,
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode progress event");
            Event::default().comment("encode-error")
        }
    }
}

/// GET /api/reports/progress/{report_id} - SSE stream of one report's progress.
///
/// The first event is always the current state (`initializing` if the
/// pipeline has not reported yet). The stream ends once the job has been
/// reaped after its terminal event. Dropping the connection unsubscribes.
pub async fn progress_stream(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    validate_report_id(&report_id)?;

    let mut subscription = state.progress.attach(&report_id);
    tracing::info!(report_id = %report_id, sink_id = %subscription.sink_id(), "Progress stream opened");

    let stream = async_stream::stream! {
        while let Some(job) = subscription.recv().await {
            yield Ok(progress_event(&job));
        }
        tracing::debug!(report_id = %subscription.job_id(), "Progress stream closed by server");
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive)
            .text("heartbeat"),
    ))
}

/// GET /api/reports/progress/{report_id}/status - current state, or the `unknown` sentinel.
pub async fn progress_status(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
) -> ApiResult<Json<JobState>> {
    validate_report_id(&report_id)?;
    Ok(Json(state.progress.snapshot(&report_id)))
}

/// POST /api/reports/progress/{report_id} - merge a partial update from the pipeline.
pub async fn update_progress(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    Json(update): Json<ProgressUpdate>,
) -> ApiResult<Json<JobState>> {
    validate_report_id(&report_id)?;
    if update.progress.is_some_and(|p| !p.is_finite()) {
        return Err(ApiError::BadRequest("progress must be a finite number".into()));
    }
    Ok(Json(state.progress.update(&report_id, update)))
}

/// POST /api/reports/progress/{report_id}/complete - extra fields ride along with the terminal event.
pub async fn complete_progress(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    body: Option<Json<ProgressUpdate>>,
) -> ApiResult<Json<JobState>> {
    validate_report_id(&report_id)?;
    let extra = body.map(|Json(extra)| extra).unwrap_or_default();
    Ok(Json(state.progress.complete(&report_id, extra)))
}

/// POST /api/reports/progress/{report_id}/fail
pub async fn fail_progress(
    State(state): State<Arc<AppState>>,
    Path(report_id): Path<String>,
    body: Option<Json<FailRequest>>,
) -> ApiResult<Json<JobState>> {
    validate_report_id(&report_id)?;
    let request = body.map(|Json(request)| request).unwrap_or_default();
    Ok(Json(
        state
            .progress
            .fail(&report_id, request.message.as_deref()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use docscan_progress::ProgressRegistry;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> (Router, Arc<AppState>) {
        let state = AppState::new(ProgressRegistry::default(), Duration::from_secs(15));
        let app = Router::new()
            .nest("/api", router())
            .with_state(state.clone());
        (app, state)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_router_creation() {
        let _router = router();
    }

    #[test]
    fn test_validate_report_id() {
        assert!(validate_report_id("r1").is_ok());
        assert!(validate_report_id("6f1c9a2e-33b1-4f6d_x").is_ok());
        assert!(validate_report_id("").is_err());
        assert!(validate_report_id("a b").is_err());
        assert!(validate_report_id("../x").is_err());
        assert!(validate_report_id(&"x".repeat(129)).is_err());
    }

    #[tokio::test]
    async fn test_status_of_unknown_report() {
        let (app, _) = app();
        let request = Request::builder()
            .uri("/api/reports/progress/r404/status")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "unknown");
        assert_eq!(json["progress"], 0.0);
        assert_eq!(json["message"], "No progress data available");
    }

    #[tokio::test]
    async fn test_update_then_status() {
        let (app, state) = app();
        let (status, json) = send(
            app.clone(),
            post_json(
                "/api/reports/progress/r1",
                serde_json::json!({"stage": "ai_detection", "progress": 30, "message": "Scanning..."}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "ai_detection");

        let snapshot = state.progress.snapshot("r1");
        assert_eq!(snapshot.progress, 30.0);
        assert_eq!(snapshot.message, "Scanning...");
    }

    #[tokio::test]
    async fn test_complete_with_extra_fields() {
        let (app, state) = app();
        let (status, json) = send(
            app,
            post_json(
                "/api/reports/progress/r1/complete",
                serde_json::json!({"summaryId": "abc"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "completed");
        assert_eq!(json["progress"], 100.0);
        assert_eq!(json["summaryId"], "abc");
        assert!(state.progress.is_reap_pending("r1"));
    }

    #[tokio::test]
    async fn test_complete_after_fail_reports_success() {
        let (app, _) = app();
        send(
            app.clone(),
            post_json("/api/reports/progress/r5/fail", serde_json::json!({"message": "boom"})),
        )
        .await;
        let (status, json) = send(
            app,
            post_json("/api/reports/progress/r5/complete", serde_json::json!({"error": true})),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "completed");
        assert_eq!(json["error"], false);
    }

    #[tokio::test]
    async fn test_complete_without_body() {
        let (app, _) = app();
        let request = Request::builder()
            .method("POST")
            .uri("/api/reports/progress/r1/complete")
            .body(Body::empty())
            .unwrap();
        let (status, json) = send(app, request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Analysis completed successfully");
    }

    #[tokio::test]
    async fn test_fail_sets_error_flag() {
        let (app, _) = app();
        let (status, json) = send(
            app,
            post_json(
                "/api/reports/progress/r3/fail",
                serde_json::json!({"message": "Pipeline crashed"}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["stage"], "failed");
        assert_eq!(json["error"], true);
        assert_eq!(json["message"], "Pipeline crashed");
    }

    #[tokio::test]
    async fn test_invalid_report_id_is_rejected() {
        let (app, state) = app();
        let (status, json) = send(
            app,
            post_json("/api/reports/progress/bad%20id", serde_json::json!({"progress": 1})),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], "Invalid report id");
        assert_eq!(state.progress.stats().tracked_jobs, 0);
    }
}
