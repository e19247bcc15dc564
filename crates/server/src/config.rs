// crates/server/src/config.rs
//! Command-line / environment configuration for the server binary.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use clap::Parser;
use docscan_progress::RegistryConfig;

/// Default port, matching what the frontend expects in development.
pub const DEFAULT_PORT: u16 = 5001;

#[derive(Debug, Clone, Parser)]
#[command(name = "docscan", version, about = "Real-time analysis progress server")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "DOCSCAN_HOST", default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, env = "DOCSCAN_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Seconds a completed or failed job stays visible before its streams are closed.
    #[arg(long, env = "DOCSCAN_REAP_GRACE_SECS", default_value_t = 5.0)]
    pub reap_grace_secs: f64,

    /// Events a viewer may fall behind before it is disconnected.
    #[arg(long, env = "DOCSCAN_SINK_CAPACITY", default_value_t = 32)]
    pub sink_capacity: usize,

    /// Interval between SSE keep-alive comments.
    #[arg(long, env = "DOCSCAN_KEEP_ALIVE_SECS", default_value_t = 15)]
    pub keep_alive_secs: u64,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long, env = "DOCSCAN_LOG_JSON", default_value_t = false)]
    pub log_json: bool,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }

    pub fn registry(&self) -> anyhow::Result<RegistryConfig> {
        let grace = Duration::try_from_secs_f64(self.reap_grace_secs)
            .map_err(|e| anyhow::anyhow!("invalid reap grace {}: {e}", self.reap_grace_secs))?;
        Ok(RegistryConfig::default()
            .with_reap_grace(grace)
            .with_sink_capacity(self.sink_capacity))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            reap_grace_secs: 5.0,
            sink_capacity: 32,
            keep_alive_secs: 15,
            log_json: false,
        }
    }
}
