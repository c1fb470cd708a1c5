//! Daemon configuration.
//!
//! Read from a TOML file, then overridden by command-line flags or
//! `CASTANETS_*` environment variables.

use castanets_core::{DEFAULT_MAX_FRAME_LEN, SharedSecret};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 7100;

#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Address the service server listens on.
    pub listen: SocketAddr,
    /// Program started for every accepted launch request.
    pub service_path: Option<PathBuf>,
    /// Pre-shared secret. Takes precedence over `token_file`.
    pub token: Option<String>,
    /// File holding the pre-shared secret (trailing newline ignored).
    pub token_file: Option<PathBuf>,
    /// PEM certificate chain; serving TLS needs this and `tls_key`.
    pub tls_cert: Option<PathBuf>,
    /// PEM private key matching `tls_cert`.
    pub tls_key: Option<PathBuf>,
    /// Largest accepted frame, terminator excluded.
    pub max_frame_len: usize,
    /// Close connections that have not authorized within this many seconds.
    pub handshake_timeout_secs: Option<u64>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            service_path: None,
            token: None,
            token_file: None,
            tls_cert: None,
            tls_key: None,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            handshake_timeout_secs: None,
        }
    }
}

impl fmt::Debug for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DaemonConfig")
            .field("listen", &self.listen)
            .field("service_path", &self.service_path)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("token_file", &self.token_file)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("max_frame_len", &self.max_frame_len)
            .field("handshake_timeout_secs", &self.handshake_timeout_secs)
            .finish()
    }
}

/// Command-line and environment overrides.
#[derive(Debug, Clone, Default, clap::Args)]
pub struct Overrides {
    /// Address to listen on (e.g. 0.0.0.0:7100)
    #[arg(long, env = "CASTANETS_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Program to launch for service requests
    #[arg(long, env = "CASTANETS_SERVICE_PATH")]
    pub service_path: Option<PathBuf>,

    /// Pre-shared authentication secret
    #[arg(long, env = "CASTANETS_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// File containing the pre-shared authentication secret
    #[arg(long, env = "CASTANETS_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// PEM certificate chain for TLS
    #[arg(long, env = "CASTANETS_TLS_CERT")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for TLS
    #[arg(long, env = "CASTANETS_TLS_KEY")]
    pub tls_key: Option<PathBuf>,

    /// Close unauthorized connections after this many seconds
    #[arg(long, env = "CASTANETS_HANDSHAKE_TIMEOUT")]
    pub handshake_timeout_secs: Option<u64>,
}

impl DaemonConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply overrides on top of the file values.
    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(listen) = overrides.listen {
            self.listen = listen;
        }
        if let Some(path) = overrides.service_path {
            self.service_path = Some(path);
        }
        if let Some(token) = overrides.token {
            self.token = Some(token);
        }
        if let Some(path) = overrides.token_file {
            self.token_file = Some(path);
        }
        if let Some(path) = overrides.tls_cert {
            self.tls_cert = Some(path);
        }
        if let Some(path) = overrides.tls_key {
            self.tls_key = Some(path);
        }
        if let Some(secs) = overrides.handshake_timeout_secs {
            self.handshake_timeout_secs = Some(secs);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_path.is_none() {
            return Err(ConfigError::MissingServicePath);
        }
        if self.max_frame_len == 0 {
            return Err(ConfigError::Invalid("max_frame_len must be positive".into()));
        }
        if self.handshake_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "handshake_timeout_secs must be positive".into(),
            ));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::Invalid(
                "tls_cert and tls_key must be set together".into(),
            ));
        }
        Ok(())
    }

    /// Certificate and key paths, when TLS is configured.
    pub fn tls_paths(&self) -> Option<(&Path, &Path)> {
        Some((self.tls_cert.as_deref()?, self.tls_key.as_deref()?))
    }

    pub fn service_path(&self) -> Result<&Path, ConfigError> {
        self.service_path
            .as_deref()
            .ok_or(ConfigError::MissingServicePath)
    }

    /// Resolve the pre-shared secret. No secret at all means every peer is
    /// locked out.
    pub fn shared_secret(&self) -> Result<SharedSecret, ConfigError> {
        if let Some(token) = &self.token {
            return Ok(SharedSecret::new(token));
        }
        match &self.token_file {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.clone(),
                    source,
                })?;
                Ok(SharedSecret::new(text.trim_end_matches(['\r', '\n'])))
            }
            None => Ok(SharedSecret::new("")),
        }
    }

    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_secs.map(Duration::from_secs)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("service_path is not set")]
    MissingServicePath,
    #[error("{0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use castanets_core::{TokenIssuer, TokenVerifier};
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = DaemonConfig::from_toml_str("").unwrap();
        assert_eq!(config.listen.port(), DEFAULT_PORT);
        assert!(config.listen.ip().is_unspecified());
        assert_eq!(config.max_frame_len, DEFAULT_MAX_FRAME_LEN);
        assert!(config.handshake_timeout().is_none());
        assert!(matches!(config.validate(), Err(ConfigError::MissingServicePath)));
    }

    #[test]
    fn parses_file_values() {
        let config = DaemonConfig::from_toml_str(
            r#"
            listen = "127.0.0.1:9000"
            service_path = "/opt/castanets/chrome"
            token = "abc"
            handshake_timeout_secs = 30
            "#,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 9000);
        assert_eq!(
            config.service_path().unwrap(),
            Path::new("/opt/castanets/chrome")
        );
        assert_eq!(config.handshake_timeout(), Some(Duration::from_secs(30)));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            DaemonConfig::from_toml_str("use_ssl = true"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn overrides_win() {
        let mut config = DaemonConfig::from_toml_str("token = \"file\"").unwrap();
        config.apply(Overrides {
            listen: Some("127.0.0.1:1".parse().unwrap()),
            token: Some("cli".into()),
            ..Default::default()
        });
        assert_eq!(config.listen.port(), 1);
        let secret = config.shared_secret().unwrap();
        let nonce = secret.issue_token();
        let cli = SharedSecret::new("cli");
        assert!(secret.verify_token(&nonce, &cli.respond(&nonce)));
    }

    #[test]
    fn token_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "from-file").unwrap();
        let config = DaemonConfig {
            token_file: Some(file.path().to_path_buf()),
            ..Default::default()
        };
        let secret = config.shared_secret().unwrap();
        let nonce = secret.issue_token();
        let expected = SharedSecret::new("from-file");
        assert!(secret.verify_token(&nonce, &expected.respond(&nonce)));
    }

    #[test]
    fn missing_token_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = DaemonConfig {
            token_file: Some(dir.path().join("absent")),
            ..Default::default()
        };
        assert!(matches!(config.shared_secret(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn no_token_locks_out() {
        let secret = DaemonConfig::default().shared_secret().unwrap();
        assert!(secret.is_empty());
    }

    #[test]
    fn debug_redacts_token() {
        let config = DaemonConfig {
            token: Some("hunter2".into()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = DaemonConfig {
            service_path: Some("/bin/true".into()),
            handshake_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn tls_paths_come_in_pairs() {
        let mut config = DaemonConfig::from_toml_str(
            r#"
            service_path = "/bin/true"
            tls_cert = "/etc/castanets/server.crt"
            "#,
        )
        .unwrap();
        assert!(config.tls_paths().is_none());
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.apply(Overrides {
            tls_key: Some("/etc/castanets/server.key".into()),
            ..Default::default()
        });
        config.validate().unwrap();
        assert_eq!(
            config.tls_paths(),
            Some((
                Path::new("/etc/castanets/server.crt"),
                Path::new("/etc/castanets/server.key")
            ))
        );
    }
}
