// crates/progress/src/types.rs
//! Types for the progress broadcast system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Opaque identifier shared between the producer and its viewers.
pub type JobId = String;

/// Keys that extra fields may not shadow: the named fields, plus the ones the registry computes.
const RESERVED_KEYS: [&str; 6] = ["stage", "progress", "message", "error", "timestamp", "terminal"];

/// Stage of an analysis job.
///
/// Intermediate stages are free-form producer tokens (`ai_detection`,
/// `plagiarism_detection`, `saving`, ...). Only `completed` and `failed`
/// are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    Initializing,
    Completed,
    Failed,
    /// Sentinel for jobs the registry is not tracking.
    Unknown,
    Named(String),
}

impl Stage {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Initializing => "initializing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
            Self::Named(name) => name,
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl From<String> for Stage {
    fn from(value: String) -> Self {
        match value.as_str() {
            "initializing" => Self::Initializing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "unknown" => Self::Unknown,
            _ => Self::Named(value),
        }
    }
}

impl From<&str> for Stage {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<Stage> for String {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Named(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Latest known progress snapshot for one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub stage: Stage,
    pub progress: f64,
    pub message: String,
    /// Set by the registry on every mutation, never by the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: bool,
    /// Producer-supplied fields such as `summaryId`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl JobState {
    /// State synthesized for a job that a viewer joins before any producer update.
    pub fn initializing() -> Self {
        Self {
            stage: Stage::Initializing,
            progress: 0.0,
            message: "Starting analysis...".to_string(),
            timestamp: Some(Utc::now()),
            error: false,
            extra: Map::new(),
        }
    }

    /// Sentinel returned for untracked jobs.
    pub fn unknown() -> Self {
        Self {
            stage: Stage::Unknown,
            progress: 0.0,
            message: "No progress data available".to_string(),
            timestamp: None,
            error: false,
            extra: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn is_unknown(&self) -> bool {
        self.stage == Stage::Unknown
    }

    /// Overwrite the fields present in `update`; extra fields merge key-wise.
    pub fn merge(&mut self, update: ProgressUpdate) {
        if let Some(stage) = update.stage {
            self.stage = stage;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(message) = update.message {
            self.message = message;
        }
        if let Some(error) = update.error {
            self.error = error;
        }
        for (key, value) in update.extra {
            if RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            self.extra.insert(key, value);
        }
    }

    /// Wire form delivered to viewers.
    pub fn event(&self) -> ProgressEvent<'_> {
        ProgressEvent {
            state: self,
            terminal: self.is_terminal(),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::initializing()
    }
}

/// Partial state supplied by a producer.
///
/// Only the fields that are `Some` (plus any extra keys) are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: impl Into<Stage>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn error(mut self, error: bool) -> Self {
        self.error = Some(error);
        self
    }

    /// Attach a producer-defined field, e.g. `field("summaryId", json!("abc"))`.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// One self-describing progress event as pushed to a viewer.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent<'a> {
    #[serde(flatten)]
    state: &'a JobState,
    terminal: bool,
}
