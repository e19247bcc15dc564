// crates/server/src/main.rs
//! Docscan progress server binary.
//!
//! Binds the HTTP server, then runs until ctrl-c or SIGTERM. On shutdown the
//! progress registry closes every open stream first so that graceful
//! shutdown is not held up by long-lived SSE connections.

use anyhow::Result;
use clap::Parser;
use docscan_progress::ProgressRegistry;
use docscan_server::{create_app, init_metrics, AppState, Config};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn,docscan_server=info,docscan_progress=info";

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Resolves once the process is asked to stop.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();
    init_tracing(config.log_json);

    init_metrics();

    let registry = ProgressRegistry::new(config.registry()?);
    let state = AppState::new(registry.clone(), config.keep_alive());
    let app = create_app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        reap_grace_secs = config.reap_grace_secs,
        sink_capacity = config.sink_capacity,
        "Progress server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown requested, closing progress streams");
            registry.shutdown();
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}
