// crates/progress/src/registry.rs
//! Registry of tracked jobs and their viewers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use metrics::counter;
use serde::Serialize;

use crate::config::RegistryConfig;
use crate::reaper::Reaper;
use crate::reporter::JobReporter;
use crate::sink::{fan_out, ChannelSink, SinkError, SinkId, SubscriberSink, Subscription};
use crate::types::{JobState, ProgressUpdate, Stage};

/// Fallback message when `fail` is called without one.
const DEFAULT_FAILURE_MESSAGE: &str = "Analysis failed";
const DEFAULT_COMPLETION_MESSAGE: &str = "Analysis completed successfully";

struct JobEntry {
    state: JobState,
    sinks: HashMap<SinkId, Arc<dyn SubscriberSink>>,
    /// Incarnation of this job id; a reap only removes the epoch it was scheduled for.
    epoch: u64,
    /// Producer updates applied to this incarnation.
    revision: u64,
}

struct Inner {
    jobs: DashMap<String, JobEntry>,
    reaper: Reaper,
    config: RegistryConfig,
    next_epoch: AtomicU64,
}

/// Point-in-time counts for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub tracked_jobs: usize,
    pub subscribers: usize,
    pub pending_reaps: usize,
}

/// Fans producer progress out to every viewer of a job.
///
/// Cheap to clone; all clones share the same jobs. Operations on one job id
/// are serialized, operations on different ids only contend when they hash
/// to the same shard. Producer-facing calls (`update`, `complete`, `fail`)
/// never fail because of a viewer: a sink that errors is dropped and the
/// rest of the fan-out continues.
#[derive(Clone)]
pub struct ProgressRegistry {
    inner: Arc<Inner>,
}

impl ProgressRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: DashMap::new(),
                reaper: Reaper::new(),
                config,
                next_epoch: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn fresh_entry(&self, state: JobState) -> JobEntry {
        JobEntry {
            state,
            sinks: HashMap::new(),
            epoch: self.inner.next_epoch.fetch_add(1, Ordering::Relaxed),
            revision: 0,
        }
    }

    /// Register `sink` under `job_id` and immediately replay the current state to it.
    pub fn subscribe(&self, job_id: &str, sink: Arc<dyn SubscriberSink>) {
        let sink_id = sink.id();
        let (rejected, created_epoch) = {
            let mut created_epoch = None;
            let mut entry = self.inner.jobs.entry(job_id.to_string()).or_insert_with(|| {
                let entry = self.fresh_entry(JobState::initializing());
                created_epoch = Some(entry.epoch);
                entry
            });

            match sink.deliver(&entry.state) {
                Ok(()) => {
                    entry.sinks.insert(sink_id, sink);
                    (None, created_epoch)
                }
                Err(e) => (Some((sink, e)), created_epoch),
            }
        };

        match rejected {
            None => {
                counter!("progress_subscriptions_total").increment(1);
                tracing::debug!(job_id, sink_id = %sink_id, "Viewer subscribed");
            }
            Some((sink, error)) => {
                record_sink_failure(job_id, sink_id, error);
                // Only undo the entry this call synthesized, and only if no
                // producer has written to it since the guard was released.
                if let Some(epoch) = created_epoch {
                    self.drop_if_abandoned(job_id, epoch, 0);
                }
                drop(sink);
            }
        }
    }

    /// Create a channel-backed sink for `job_id` and subscribe it.
    ///
    /// The returned [`Subscription`] unsubscribes when dropped.
    pub fn attach(&self, job_id: &str) -> Subscription {
        let (sink, rx) = ChannelSink::new(self.inner.config.sink_capacity);
        let sink_id = sink.id();
        self.subscribe(job_id, Arc::new(sink));
        Subscription::new(job_id.to_string(), sink_id, rx, self.clone())
    }

    /// Remove `sink_id` from `job_id`. The last viewer leaving drops the job.
    ///
    /// Returns whether the sink was registered; unknown jobs and sinks are a no-op.
    pub fn unsubscribe(&self, job_id: &str, sink_id: SinkId) -> bool {
        let released = {
            let Entry::Occupied(mut entry) = self.inner.jobs.entry(job_id.to_string()) else {
                return false;
            };
            let Some(sink) = entry.get_mut().sinks.remove(&sink_id) else {
                return false;
            };
            if entry.get().sinks.is_empty() {
                let abandoned = entry.remove();
                self.inner.reaper.cancel(job_id, abandoned.epoch);
                tracing::debug!(job_id, "Last viewer left, dropping job state");
            }
            sink
        };
        tracing::debug!(job_id, sink_id = %sink_id, "Viewer unsubscribed");
        drop(released);
        true
    }

    /// Merge `update` into the job's state and fan it out to current viewers.
    pub fn update(&self, job_id: &str, update: ProgressUpdate) -> JobState {
        self.apply(job_id, update).0
    }

    /// Move the job to `completed` (progress 100) and schedule its reap.
    ///
    /// `extra` may carry a message and producer fields such as `summaryId`;
    /// its stage, progress and error flag are ignored.
    pub fn complete(&self, job_id: &str, extra: ProgressUpdate) -> JobState {
        let message = extra
            .message
            .unwrap_or_else(|| DEFAULT_COMPLETION_MESSAGE.to_string());
        let update = ProgressUpdate {
            stage: Some(Stage::Completed),
            progress: Some(100.0),
            message: Some(message),
            error: Some(false),
            extra: extra.extra,
        };
        let (state, epoch) = self.apply(job_id, update);
        self.schedule_reap(job_id, epoch);
        tracing::info!(job_id, "Job completed");
        state
    }

    /// Move the job to `failed` with `error = true` and schedule its reap.
    pub fn fail(&self, job_id: &str, message: Option<&str>) -> JobState {
        let message = message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(DEFAULT_FAILURE_MESSAGE);
        let update = ProgressUpdate::new()
            .stage(Stage::Failed)
            .progress(0.0)
            .message(message)
            .error(true);
        let (state, epoch) = self.apply(job_id, update);
        self.schedule_reap(job_id, epoch);
        tracing::warn!(job_id, message, "Job failed");
        state
    }

    /// Current state of `job_id`, or [`JobState::unknown`] if it is not tracked.
    pub fn snapshot(&self, job_id: &str) -> JobState {
        self.inner
            .jobs
            .get(job_id)
            .map(|entry| entry.state.clone())
            .unwrap_or_else(JobState::unknown)
    }

    pub fn is_tracked(&self, job_id: &str) -> bool {
        self.inner.jobs.contains_key(job_id)
    }

    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.inner
            .jobs
            .get(job_id)
            .map_or(0, |entry| entry.sinks.len())
    }

    pub fn is_reap_pending(&self, job_id: &str) -> bool {
        self.inner.reaper.is_scheduled(job_id)
    }

    /// Producer handle bound to one job.
    pub fn reporter(&self, job_id: impl Into<String>) -> JobReporter {
        JobReporter::new(self.clone(), job_id.into())
    }

    pub fn stats(&self) -> RegistryStats {
        let (tracked_jobs, subscribers) = self
            .inner
            .jobs
            .iter()
            .fold((0, 0), |(jobs, subs), entry| (jobs + 1, subs + entry.sinks.len()));
        RegistryStats {
            tracked_jobs,
            subscribers,
            pending_reaps: self.inner.reaper.pending(),
        }
    }

    /// Tear down: cancel every pending reap, force-close every sink, drop all state.
    pub fn shutdown(&self) {
        self.inner.reaper.shutdown();
        let job_ids: Vec<String> = self
            .inner
            .jobs
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        let mut closed = 0usize;
        for job_id in job_ids {
            if let Some((_, entry)) = self.inner.jobs.remove(&job_id) {
                closed += entry.sinks.len();
                close_all(entry.sinks);
            }
        }
        tracing::info!(closed_sinks = closed, "Progress registry shut down");
    }

    /// Read-modify-write the job's state and fan the result out, all under the job's lock.
    fn apply(&self, job_id: &str, update: ProgressUpdate) -> (JobState, u64) {
        let mut released = Vec::new();
        let (state, epoch, revision, emptied) = {
            let mut entry = self
                .inner
                .jobs
                .entry(job_id.to_string())
                .or_insert_with(|| self.fresh_entry(JobState::initializing()));

            let previous = entry.state.progress;
            entry.state.merge(update);
            entry.state.timestamp = Some(Utc::now());
            entry.revision += 1;
            if entry.state.progress < previous {
                tracing::debug!(
                    job_id,
                    previous,
                    progress = entry.state.progress,
                    "Progress went backwards"
                );
            }

            let state = entry.state.clone();
            let failed = fan_out(&state, &entry.sinks);
            let had_viewers = !entry.sinks.is_empty();
            for (sink_id, error) in failed {
                if let Some(sink) = entry.sinks.remove(&sink_id) {
                    record_sink_failure(job_id, sink_id, error);
                    released.push(sink);
                }
            }
            let emptied = had_viewers && entry.sinks.is_empty();
            (state, entry.epoch, entry.revision, emptied)
        };

        counter!("progress_updates_total").increment(1);
        if emptied {
            self.drop_if_abandoned(job_id, epoch, revision);
        }
        drop(released);
        (state, epoch)
    }

    /// Remove the job if it is still the same incarnation at the same
    /// revision and has no viewers.
    fn drop_if_abandoned(&self, job_id: &str, epoch: u64, revision: u64) {
        let removed = self.inner.jobs.remove_if(job_id, |_, entry| {
            entry.epoch == epoch && entry.revision == revision && entry.sinks.is_empty()
        });
        if removed.is_some() {
            self.inner.reaper.cancel(job_id, epoch);
            tracing::debug!(job_id, "No viewers left, dropping job state");
        }
    }

    fn schedule_reap(&self, job_id: &str, epoch: u64) {
        if !self.is_current(job_id, epoch) {
            return;
        }
        let registry = self.clone();
        let target = job_id.to_string();
        let scheduled = self
            .inner
            .reaper
            .schedule(job_id, epoch, self.inner.config.reap_grace, move || {
                registry.reap(&target, epoch);
            });
        // The job may have been dropped between the check above and the
        // insert; its own cancel could then have run before the reap existed.
        if scheduled && !self.is_current(job_id, epoch) {
            self.inner.reaper.cancel(job_id, epoch);
        }
    }

    fn is_current(&self, job_id: &str, epoch: u64) -> bool {
        self.inner
            .jobs
            .get(job_id)
            .is_some_and(|entry| entry.epoch == epoch)
    }

    /// Force-close the job's remaining sinks and forget it.
    fn reap(&self, job_id: &str, epoch: u64) {
        let Some((_, entry)) = self
            .inner
            .jobs
            .remove_if(job_id, |_, entry| entry.epoch == epoch)
        else {
            tracing::debug!(job_id, "Job already cleaned up before reap");
            return;
        };
        let sinks = entry.sinks.len();
        close_all(entry.sinks);
        counter!("progress_jobs_reaped_total").increment(1);
        tracing::info!(job_id, closed_sinks = sinks, "Reaped terminal job");
    }
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

fn close_all(sinks: HashMap<SinkId, Arc<dyn SubscriberSink>>) {
    for sink in sinks.into_values() {
        sink.close();
    }
}

fn record_sink_failure(job_id: &str, sink_id: SinkId, error: SinkError) {
    counter!("progress_sink_failures_total", "reason" => error.reason()).increment(1);
    tracing::warn!(job_id, sink_id = %sink_id, reason = error.reason(), "Dropping viewer after failed write");
}
