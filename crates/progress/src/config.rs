// crates/progress/src/config.rs
//! Registry tuning knobs.

use std::time::Duration;

use serde::Deserialize;

/// Default delay between a terminal transition and the reap of that job.
pub const DEFAULT_REAP_GRACE: Duration = Duration::from_secs(5);

/// Default number of undelivered events a viewer may lag before it is dropped.
pub const DEFAULT_SINK_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long terminal state (and its open connections) outlive `complete`/`fail`.
    #[serde(with = "secs")]
    pub reap_grace: Duration,
    /// Buffer size of each channel-backed sink. A full buffer counts as a stuck viewer.
    pub sink_capacity: usize,
}

impl RegistryConfig {
    pub fn with_reap_grace(mut self, grace: Duration) -> Self {
        self.reap_grace = grace;
        self
    }

    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity.max(1);
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            reap_grace: DEFAULT_REAP_GRACE,
            sink_capacity: DEFAULT_SINK_CAPACITY,
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
