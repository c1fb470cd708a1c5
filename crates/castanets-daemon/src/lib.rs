//! Castanets service daemon.
//!
//! Wires the protocol core to a TCP or TLS listener, a child-process launcher
//! and a pre-shared secret taken from configuration.

pub mod config;
pub mod launcher;
pub mod logging;
pub mod server;
pub mod tls;

use anyhow::Context;
use config::DaemonConfig;
use launcher::ProcessLauncher;
use server::{ServerOptions, ServiceServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Bind the server described by `config`.
pub async fn bind(config: &DaemonConfig) -> anyhow::Result<ServiceServer> {
    config.validate().context("invalid configuration")?;

    let secret = Arc::new(config.shared_secret()?);
    if secret.is_empty() {
        tracing::warn!("No token configured; every connection will stay unauthorized");
    }
    let tls = match config.tls_paths() {
        Some((cert, key)) => Some(tls::acceptor_from_pem(cert, key)?),
        None => {
            tracing::warn!("TLS is not configured; serving plain TCP");
            None
        }
    };
    let launcher = Arc::new(ProcessLauncher::new(
        config.service_path()?,
        tokio::runtime::Handle::current(),
    ));
    let options = ServerOptions {
        max_frame_len: config.max_frame_len,
        handshake_timeout: config.handshake_timeout(),
        tls,
    };

    ServiceServer::bind(config.listen, options, secret.clone(), secret, launcher)
        .await
        .with_context(|| format!("failed to listen on {}", config.listen))
}

/// Run the daemon until `shutdown` fires.
pub async fn run(config: DaemonConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let server = bind(&config).await?;
    server.run(shutdown).await
}
