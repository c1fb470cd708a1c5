//! Castanets service daemon.
//!
//! Run:
//!   castanets-daemon --listen 0.0.0.0:7100 --service-path /opt/castanets/chrome --token s3cret
//!   castanets-daemon --config /etc/castanets/daemon.toml
//!   castanets-daemon --config daemon.toml --tls-cert server.crt --tls-key server.key

use anyhow::Context;
use castanets_daemon::config::{DaemonConfig, Overrides};
use castanets_daemon::logging;
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "castanets-daemon", version, about = "Castanets service server")]
struct Cli {
    /// TOML configuration file
    #[arg(long, env = "CASTANETS_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DaemonConfig::default(),
    };
    config.apply(cli.overrides);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested");
                signal.cancel();
            }
            Err(e) => tracing::warn!("Cannot listen for Ctrl-C: {}", e),
        }
    });

    castanets_daemon::run(config, shutdown).await
}
