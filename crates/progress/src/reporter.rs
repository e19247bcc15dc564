// crates/progress/src/reporter.rs
//! Producer-side handle bound to a single job.

use crate::registry::ProgressRegistry;
use crate::types::{JobState, ProgressUpdate, Stage};

/// What the analysis pipeline holds while it runs one job.
///
/// Every call goes straight to the registry; none of them can fail because
/// of a viewer.
#[derive(Clone)]
pub struct JobReporter {
    registry: ProgressRegistry,
    job_id: String,
}

impl JobReporter {
    pub(crate) fn new(registry: ProgressRegistry, job_id: String) -> Self {
        Self { registry, job_id }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Enter `stage` at `progress` percent.
    pub fn stage(
        &self,
        stage: impl Into<Stage>,
        progress: f64,
        message: impl Into<String>,
    ) -> JobState {
        self.update(
            ProgressUpdate::new()
                .stage(stage)
                .progress(progress)
                .message(message),
        )
    }

    pub fn update(&self, update: ProgressUpdate) -> JobState {
        self.registry.update(&self.job_id, update)
    }

    pub fn complete(&self, extra: ProgressUpdate) -> JobState {
        self.registry.complete(&self.job_id, extra)
    }

    pub fn fail(&self, message: impl AsRef<str>) -> JobState {
        self.registry.fail(&self.job_id, Some(message.as_ref()))
    }
}
