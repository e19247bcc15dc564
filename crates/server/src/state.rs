// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::{Duration, Instant};

use docscan_progress::ProgressRegistry;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Progress registry shared with the analysis pipeline.
    pub progress: ProgressRegistry,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(progress: ProgressRegistry, keep_alive: Duration) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            progress,
            keep_alive,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_new() {
        let state = AppState::new(ProgressRegistry::default(), Duration::from_secs(15));
        assert!(state.uptime_secs() < 1);
        assert_eq!(state.progress.stats().tracked_jobs, 0);
    }
}
