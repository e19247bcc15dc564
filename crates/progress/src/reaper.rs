// crates/progress/src/reaper.rs
//! Delayed cleanup of terminal jobs.
//!
//! One cancellable task per job id. Each schedule gets a ticket; a task that
//! wakes up only fires if its ticket is still the current one for that job,
//! so cancelled or superseded timers are inert even if they race the wakeup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

struct ScheduledReap {
    ticket: u64,
    epoch: u64,
    cancel: CancellationToken,
}

pub struct Reaper {
    scheduled: Arc<DashMap<String, ScheduledReap>>,
    next_ticket: AtomicU64,
    root: CancellationToken,
}

impl Reaper {
    pub fn new() -> Self {
        Self {
            scheduled: Arc::new(DashMap::new()),
            next_ticket: AtomicU64::new(1),
            root: CancellationToken::new(),
        }
    }

    /// Run `on_fire` for `job_id` once `delay` has elapsed.
    ///
    /// `epoch` identifies the incarnation of the job being reaped. If a reap
    /// for the same epoch is already pending it keeps its original deadline
    /// and this call returns `false`; a pending reap for an older epoch is
    /// cancelled and replaced. Scheduling for an older epoch than the
    /// pending one is a no-op.
    pub fn schedule<F>(&self, job_id: &str, epoch: u64, delay: Duration, on_fire: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::error!(job_id, "Cannot schedule reap outside a tokio runtime");
            return false;
        };
        if self.root.is_cancelled() {
            tracing::debug!(job_id, "Reaper shut down, not scheduling");
            return false;
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let cancel = self.root.child_token();
        let reap = ScheduledReap {
            ticket,
            epoch,
            cancel: cancel.clone(),
        };

        match self.scheduled.entry(job_id.to_string()) {
            Entry::Occupied(existing) if existing.get().epoch == epoch => {
                tracing::debug!(job_id, epoch, "Reap already pending, keeping original deadline");
                return false;
            }
            Entry::Occupied(existing) if existing.get().epoch > epoch => {
                tracing::debug!(job_id, epoch, pending = existing.get().epoch, "Stale reap ignored");
                return false;
            }
            Entry::Occupied(mut existing) => {
                existing.get().cancel.cancel();
                existing.insert(reap);
            }
            Entry::Vacant(slot) => {
                slot.insert(reap);
            }
        }

        let scheduled = Arc::clone(&self.scheduled);
        let job_id = job_id.to_string();
        runtime.spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::trace!(job_id = %job_id, ticket, "Reap cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let current = scheduled
                        .remove_if(&job_id, |_, reap| reap.ticket == ticket)
                        .is_some();
                    if current {
                        on_fire();
                    }
                }
            }
        });
        true
    }

    /// Cancel the pending reap for `job_id` if it belongs to `epoch`.
    ///
    /// A reap scheduled for a newer incarnation of the same id is left alone.
    /// Returns whether a reap was cancelled.
    pub fn cancel(&self, job_id: &str, epoch: u64) -> bool {
        match self
            .scheduled
            .remove_if(job_id, |_, reap| reap.epoch == epoch)
        {
            Some((_, reap)) => {
                reap.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, job_id: &str) -> bool {
        self.scheduled.contains_key(job_id)
    }

    pub fn pending(&self) -> usize {
        self.scheduled.len()
    }

    /// Cancel every pending reap and refuse new ones.
    pub fn shutdown(&self) {
        self.root.cancel();
        self.scheduled.clear();
    }
}

impl Default for Reaper {
    fn default() -> Self {
        Self::new()
    }
}
