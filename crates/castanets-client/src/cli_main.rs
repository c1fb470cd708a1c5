//! Command-line client for the Castanets service server.
//!
//! Run:
//!   castanets --server 10.0.0.1:7100 --token s3cret -- _ --type=renderer --enable-castanets
//!   castanets --server host:7100 --token s3cret --ca-cert ca.pem -- _ --type=renderer

use anyhow::Context;
use castanets_client::{ServiceClient, tls_config};
use castanets_core::SharedSecret;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::rustls::pki_types::CertificateDer;
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_DIRECTIVE: &str = "castanets=info";

#[derive(Debug, Parser)]
#[command(name = "castanets", version, about = "Request a renderer launch from a service server")]
struct Cli {
    /// Service server address (host:port)
    #[arg(long, env = "CASTANETS_SERVER")]
    server: String,

    /// Pre-shared authentication secret
    #[arg(long, env = "CASTANETS_TOKEN", hide_env_values = true)]
    token: String,

    /// Connect over TLS, trusting the certificates in this PEM file
    #[arg(long, env = "CASTANETS_CA_CERT")]
    ca_cert: Option<PathBuf>,

    /// Name to check the server certificate against (defaults to the host in --server)
    #[arg(long)]
    server_name: Option<String>,

    /// Seconds to wait for the handshake to complete
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Launch arguments; the first one is the program-name slot
    #[arg(last = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(std::env::var(EnvFilter::DEFAULT_ENV).ok()))
        .init();

    let cli = Cli::parse();

    match &cli.ca_cert {
        Some(ca_cert) => {
            let config = tls_config(load_roots(ca_cert)?)?;
            let server_name = cli
                .server_name
                .clone()
                .unwrap_or_else(|| host_of(&cli.server).to_string());
            let client = ServiceClient::connect_tls(&cli.server, &server_name, config)
                .await
                .with_context(|| format!("connecting to {} over TLS", cli.server))?;
            request(client, &cli).await
        }
        None => {
            let client = ServiceClient::connect(&cli.server)
                .await
                .with_context(|| format!("connecting to {}", cli.server))?;
            request(client, &cli).await
        }
    }
}

async fn request<S>(mut client: ServiceClient<S>, cli: &Cli) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let secret = SharedSecret::new(&cli.token);
    tokio::time::timeout(Duration::from_secs(cli.timeout), client.login(&secret))
        .await
        .context("handshake timed out")??;
    tracing::info!("Authorized by {}", cli.server);

    client.request_launch(&cli.args).await?;
    tracing::info!("Sent launch request with {} argument(s)", cli.args.len());
    Ok(())
}

fn load_roots(path: &Path) -> anyhow::Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
    let roots = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("read certificates from {}", path.display()))?;
    anyhow::ensure!(!roots.is_empty(), "no certificate found in {}", path.display());
    Ok(roots)
}

/// `RUST_LOG` directives when set and valid, otherwise [`DEFAULT_LOG_DIRECTIVE`].
fn log_filter(directives: Option<String>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_DIRECTIVE))
}

/// Host part of `host:port`, without IPv6 brackets.
fn host_of(server: &str) -> &str {
    let host = server.rsplit_once(':').map_or(server, |(host, _)| host);
    host.trim_start_matches('[').trim_end_matches(']')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_directives_are_kept() {
        let filter = log_filter(Some("castanets=trace".into())).to_string();
        assert!(filter.contains("castanets=trace"), "{filter}");
        assert!(!filter.contains("castanets=info"), "{filter}");
    }

    #[test]
    fn default_directive_without_env() {
        assert_eq!(log_filter(None).to_string(), DEFAULT_LOG_DIRECTIVE);
        assert_eq!(
            log_filter(Some("castanets=nonsense".into())).to_string(),
            DEFAULT_LOG_DIRECTIVE
        );
    }

    #[test]
    fn host_of_strips_port_and_brackets() {
        assert_eq!(host_of("castanets.local:7100"), "castanets.local");
        assert_eq!(host_of("[::1]:7100"), "::1");
        assert_eq!(host_of("localhost"), "localhost");
    }
}
