// crates/progress/src/lib.rs
//! Real-time progress broadcast for long-running analysis jobs.
//!
//! Provides:
//! - `ProgressRegistry` - per-job state plus the set of viewers to fan updates out to
//! - `Reaper` - delayed cleanup of terminal jobs and their lingering connections
//! - `SubscriberSink` - the push channel abstraction a transport implements
//!   (`ChannelSink` + `Subscription` for channel-based transports)
//! - `JobReporter` - producer handle bound to one job

pub mod config;
pub mod reaper;
pub mod registry;
pub mod reporter;
pub mod sink;
pub mod types;

pub use config::RegistryConfig;
pub use reaper::Reaper;
pub use registry::{ProgressRegistry, RegistryStats};
pub use reporter::JobReporter;
pub use sink::{ChannelSink, SinkError, SinkId, SubscriberSink, Subscription};
pub use types::{JobId, JobState, ProgressEvent, ProgressUpdate, Stage};
