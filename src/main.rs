//! Aggregated API server binary
//!
//! Parses options, validates them, and runs the server until SIGINT or
//! SIGTERM cancels the root token.

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flotilla::options::Options;
use flotilla::server::init_crypto_provider;

#[tokio::main]
async fn main() -> Result<()> {
    init_crypto_provider();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let options = Options::parse();
    let shutdown = CancellationToken::new();
    tokio::spawn(signal_handler(shutdown.clone()));

    info!("starting aggregated API server");
    if let Err(err) = options.run(shutdown).await {
        error!(error = %err, "server exited with error");
        return Err(err.into());
    }
    info!("server stopped");
    Ok(())
}

/// Cancel the root token on SIGINT or SIGTERM
async fn signal_handler(shutdown: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sig) => sig,
                Err(err) => {
                    error!(error = %err, "failed to install SIGTERM handler");
                    shutdown.cancel();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        info!("received SIGINT, shutting down");
    }
    shutdown.cancel();
}
