// crates/server/tests/progress_stream.rs
//! End-to-end SSE tests: a viewer streams a report while the pipeline posts
//! updates through the same router.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use docscan_progress::{ProgressRegistry, RegistryConfig};
use docscan_server::{create_app, AppState};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

const FRAME_TIMEOUT: Duration = Duration::from_secs(2);

fn test_app(reap_grace: Duration) -> (Router, Arc<AppState>) {
    let registry = ProgressRegistry::new(RegistryConfig::default().with_reap_grace(reap_grace));
    let state = AppState::new(registry, Duration::from_secs(15));
    (create_app(state.clone()), state)
}

/// An open SSE response body, read event by event.
struct EventStream {
    body: Body,
    buffer: String,
}

impl EventStream {
    async fn open(app: &Router, report_id: &str) -> Self {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/api/reports/progress/{report_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        Self {
            body: response.into_body(),
            buffer: String::new(),
        }
    }

    /// Next `data:` payload, or `None` once the server ends the stream.
    async fn next_event(&mut self) -> Option<Value> {
        loop {
            if let Some(end) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..end + 2).collect();
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    // keep-alive comment
                    continue;
                }
                return Some(serde_json::from_str(&data.join("\n")).unwrap());
            }

            let frame = tokio::time::timeout(FRAME_TIMEOUT, self.body.frame())
                .await
                .expect("timed out waiting for an SSE frame")?
                .unwrap();
            if let Ok(bytes) = frame.into_data() {
                self.buffer.push_str(std::str::from_utf8(&bytes).unwrap());
            }
        }
    }
}

async fn post(app: &Router, uri: &str, body: Value) -> StatusCode {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
        .status()
}

#[tokio::test]
async fn first_event_is_initializing() {
    let (app, state) = test_app(Duration::from_secs(5));
    let mut stream = EventStream::open(&app, "r1").await;

    let event = stream.next_event().await.unwrap();
    assert_eq!(event["stage"], "initializing");
    assert_eq!(event["progress"], 0.0);
    assert_eq!(event["message"], "Starting analysis...");
    assert_eq!(event["terminal"], false);
    assert_eq!(state.progress.subscriber_count("r1"), 1);
}

#[tokio::test]
async fn updates_then_completion_then_stream_ends() {
    let (app, state) = test_app(Duration::from_millis(50));
    let mut stream = EventStream::open(&app, "r1").await;
    assert_eq!(stream.next_event().await.unwrap()["stage"], "initializing");

    let status = post(
        &app,
        "/api/reports/progress/r1",
        json!({"stage": "ai_detection", "progress": 30, "message": "Scanning..."}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = stream.next_event().await.unwrap();
    assert_eq!(event["stage"], "ai_detection");
    assert_eq!(event["progress"], 30.0);
    assert_eq!(event["message"], "Scanning...");
    assert!(event["timestamp"].is_string());

    let status = post(
        &app,
        "/api/reports/progress/r1/complete",
        json!({"summaryId": "abc"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let event = stream.next_event().await.unwrap();
    assert_eq!(event["stage"], "completed");
    assert_eq!(event["progress"], 100.0);
    assert_eq!(event["message"], "Analysis completed successfully");
    assert_eq!(event["summaryId"], "abc");
    assert_eq!(event["terminal"], true);

    // The reap closes the stream after the grace period.
    assert_eq!(stream.next_event().await, None);
    assert!(!state.progress.is_tracked("r1"));
}

#[tokio::test]
async fn late_joiner_sees_failure() {
    let (app, _state) = test_app(Duration::from_secs(5));
    let mut first = EventStream::open(&app, "r3").await;
    first.next_event().await.unwrap();

    let status = post(
        &app,
        "/api/reports/progress/r3/fail",
        json!({"message": "Pipeline crashed"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first.next_event().await.unwrap()["stage"], "failed");

    let mut late = EventStream::open(&app, "r3").await;
    let event = late.next_event().await.unwrap();
    assert_eq!(event["stage"], "failed");
    assert_eq!(event["error"], true);
    assert_eq!(event["message"], "Pipeline crashed");
    assert_eq!(event["terminal"], true);
}

#[tokio::test]
async fn viewers_share_updates() {
    let (app, state) = test_app(Duration::from_secs(5));
    let mut a = EventStream::open(&app, "r2").await;
    let mut b = EventStream::open(&app, "r2").await;
    a.next_event().await.unwrap();
    b.next_event().await.unwrap();
    assert_eq!(state.progress.subscriber_count("r2"), 2);

    post(&app, "/api/reports/progress/r2", json!({"progress": 55})).await;

    assert_eq!(a.next_event().await.unwrap()["progress"], 55.0);
    assert_eq!(b.next_event().await.unwrap()["progress"], 55.0);
}

#[tokio::test]
async fn disconnect_unsubscribes() {
    let (app, state) = test_app(Duration::from_secs(5));
    let mut keep = EventStream::open(&app, "r4").await;
    let mut leave = EventStream::open(&app, "r4").await;
    keep.next_event().await.unwrap();
    leave.next_event().await.unwrap();

    drop(leave);
    assert_eq!(state.progress.subscriber_count("r4"), 1);

    drop(keep);
    assert!(!state.progress.is_tracked("r4"));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/reports/progress/r4/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["stage"], "unknown");
}

#[tokio::test]
async fn shutdown_ends_open_streams() {
    let (app, state) = test_app(Duration::from_secs(5));
    let mut stream = EventStream::open(&app, "r5").await;
    stream.next_event().await.unwrap();

    state.progress.shutdown();

    assert_eq!(stream.next_event().await, None);
    assert_eq!(state.progress.stats().tracked_jobs, 0);
}
