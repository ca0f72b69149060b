//! callbridged - bridge daemon entry point

use anyhow::{Context, Result};
use callbridge_common::logging::{init_logging, LogConfig};
use callbridge_daemon::alert::Alerter;
use callbridge_daemon::config::Config;
use callbridge_daemon::media::{LameTranscoder, S3Storage};
use callbridge_daemon::store::SqliteStore;
use callbridge_daemon::switch::AmiClient;
use callbridge_daemon::transport::SignedTransport;
use callbridge_daemon::{Collaborators, Daemon};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let mut log_config = LogConfig::from_env()?;
    if log_config.file_prefix == "callbridge" {
        log_config.file_prefix = "callbridged".to_string();
    }
    init_logging(&log_config)?;

    info!("Starting callbridged");

    let config = Config::load()?;
    info!(
        "Configuration loaded - {} tenant(s), store at {}",
        config.tenants.len(),
        config.store.path
    );

    let store = Arc::new(
        SqliteStore::open(&config.store.path)
            .await
            .context("Failed to open record store")?,
    );
    let transport = SignedTransport::new(config.transport.request_timeout())
        .context("Failed to build signed transport")?;
    let alerts =
        Alerter::new(config.alert_webhook.clone()).context("Failed to build alerter")?;
    let switch = Arc::new(AmiClient::new(config.ami.clone()));
    let storage = Arc::new(S3Storage::new(&config.media.storage));

    let daemon = Daemon::start(
        &config,
        Collaborators {
            store,
            switch,
            transcoder: Arc::new(LameTranscoder),
            storage,
            transport,
            alerts,
        },
    );

    shutdown_signal().await;

    daemon.shutdown().await;
    info!("callbridged stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!("Failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
