// crates/progress/src/sink.rs
//! Push channels to individual viewers.
//!
//! The transport layer owns the connection; the registry only holds an
//! `Arc<dyn SubscriberSink>` for as long as the viewer is subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::registry::ProgressRegistry;
use crate::types::{JobId, JobState};

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one registered sink. Membership in a job's subscriber set is keyed by this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(u64);

impl SinkId {
    pub fn next() -> Self {
        Self(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for SinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("viewer disconnected")]
    Disconnected,

    #[error("viewer is not keeping up")]
    Backpressure,

    #[error("sink already closed")]
    Closed,
}

impl SinkError {
    /// Short label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Backpressure => "backpressure",
            Self::Closed => "closed",
        }
    }
}

/// One live push channel to one viewer.
///
/// `deliver` is called while the registry holds the job's lock, so it must
/// never block: a viewer that cannot accept the event right now reports
/// [`SinkError::Backpressure`] and is unsubscribed.
pub trait SubscriberSink: Send + Sync {
    fn id(&self) -> SinkId;

    fn deliver(&self, state: &JobState) -> Result<(), SinkError>;

    /// Sever the channel from the server side.
    fn close(&self);
}

/// Deliver `state` to every sink, returning the ones that failed.
///
/// Never stops early: one failing sink does not affect delivery to the rest.
pub(crate) fn fan_out(
    state: &JobState,
    sinks: &HashMap<SinkId, Arc<dyn SubscriberSink>>,
) -> Vec<(SinkId, SinkError)> {
    sinks
        .iter()
        .filter_map(|(id, sink)| sink.deliver(state).err().map(|e| (*id, e)))
        .collect()
}

/// Sink backed by a bounded `mpsc` channel.
///
/// Closing drops the sender, so the receiving side still drains whatever
/// was buffered (typically the terminal event) before it sees end-of-stream.
pub struct ChannelSink {
    id: SinkId,
    tx: Mutex<Option<mpsc::Sender<JobState>>>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<JobState>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let sink = Self {
            id: SinkId::next(),
            tx: Mutex::new(Some(tx)),
        };
        (sink, rx)
    }
}

impl SubscriberSink for ChannelSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn deliver(&self, state: &JobState) -> Result<(), SinkError> {
        let guard = self.tx.lock().map_err(|_| SinkError::Closed)?;
        let tx = guard.as_ref().ok_or(SinkError::Closed)?;
        tx.try_send(state.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SinkError::Disconnected,
        })
    }

    fn close(&self) {
        match self.tx.lock() {
            Ok(mut guard) => {
                guard.take();
            }
            Err(e) => tracing::error!("Mutex poisoned closing sink: {e}"),
        }
    }
}

/// A viewer's live subscription, as handed to the transport layer.
///
/// Dropping it unsubscribes, so a transport only has to drop the
/// subscription when its connection goes away.
pub struct Subscription {
    job_id: JobId,
    sink_id: SinkId,
    rx: mpsc::Receiver<JobState>,
    registry: ProgressRegistry,
}

impl Subscription {
    pub(crate) fn new(
        job_id: JobId,
        sink_id: SinkId,
        rx: mpsc::Receiver<JobState>,
        registry: ProgressRegistry,
    ) -> Self {
        Self {
            job_id,
            sink_id,
            rx,
            registry,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn sink_id(&self) -> SinkId {
        self.sink_id
    }

    /// Next state for this job. `None` once the registry has closed the sink
    /// and every buffered event has been read.
    pub async fn recv(&mut self) -> Option<JobState> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.unsubscribe(&self.job_id, self.sink_id);
    }
}
