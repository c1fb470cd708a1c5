//! Client side of the Castanets service protocol.
//!
//! ```rust,ignore
//! let secret = SharedSecret::new("s3cret");
//! let mut client = ServiceClient::connect("10.0.0.1:7100").await?;
//! client.login(&secret).await?;
//! client.request_launch(["_", "--type=renderer", "--enable-castanets"]).await?;
//! ```

use castanets_core::{DecodeError, FrameError, Message, NulFrameCodec, SharedSecret};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, pki_types::CertificateDer, pki_types::ServerName};
use tokio_util::codec::Framed;

/// Errors talking to a service server.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("bad message from server: {0}")]
    Decode(#[from] DecodeError),
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("invalid TLS server name: {0}")]
    ServerName(String),
    /// The server closed the connection while we waited for `verify-done`.
    #[error("token rejected by server")]
    Rejected,
    #[error("unexpected message from server: {0}")]
    Unexpected(String),
    #[error("connection closed by server")]
    Closed,
}

/// TLS client configuration trusting only `roots`.
pub fn tls_config(
    roots: impl IntoIterator<Item = CertificateDer<'static>>,
) -> Result<Arc<rustls::ClientConfig>, ClientError> {
    let mut store = rustls::RootCertStore::empty();
    for cert in roots {
        store.add(cert)?;
    }
    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_root_certificates(store)
    .with_no_client_auth();
    Ok(Arc::new(config))
}

/// One connection to a service server.
pub struct ServiceClient<S = TcpStream> {
    framed: Framed<S, NulFrameCodec>,
}

impl ServiceClient<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_stream(stream))
    }
}

impl ServiceClient<TlsStream<TcpStream>> {
    /// Connect over TLS, checking the server certificate against `server_name`.
    pub async fn connect_tls(
        addr: impl ToSocketAddrs,
        server_name: &str,
        config: Arc<rustls::ClientConfig>,
    ) -> Result<Self, ClientError> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::ServerName(server_name.to_string()))?;
        let stream = TcpStream::connect(addr).await?;
        let stream = TlsConnector::from(config).connect(name, stream).await?;
        Ok(Self::from_stream(stream))
    }
}

impl<S> ServiceClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn from_stream(stream: S) -> Self {
        Self {
            framed: Framed::new(stream, NulFrameCodec::new()),
        }
    }

    /// Wait for the server's token challenge.
    pub async fn challenge(&mut self) -> Result<String, ClientError> {
        match self.recv().await? {
            Some(Message::VerifyToken(token)) => Ok(token),
            Some(other) => Err(ClientError::Unexpected(other.to_string())),
            None => Err(ClientError::Closed),
        }
    }

    /// Answer the server's challenge with `secret` and wait for the
    /// acknowledgement.
    pub async fn login(&mut self, secret: &SharedSecret) -> Result<(), ClientError> {
        let challenge = self.challenge().await?;
        self.authenticate(&secret.respond(&challenge)).await
    }

    /// Send `token` as the handshake response and wait until the server
    /// acknowledges it.
    ///
    /// A challenge arriving in the meantime is skipped.
    pub async fn authenticate(&mut self, token: &str) -> Result<(), ClientError> {
        self.send(Message::VerifyToken(token.to_string())).await?;
        loop {
            match self.recv().await {
                Ok(Some(Message::VerifyDone)) => return Ok(()),
                Ok(Some(Message::VerifyToken(_))) => continue,
                Ok(Some(other)) => return Err(ClientError::Unexpected(other.to_string())),
                Ok(None) => return Err(ClientError::Rejected),
                Err(ClientError::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => {
                    return Err(ClientError::Rejected);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Ask the server to launch a worker. The server never answers.
    pub async fn request_launch<I, T>(&mut self, args: I) -> Result<(), ClientError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        self.send(Message::service_request(args)).await
    }

    pub async fn send(&mut self, message: Message) -> Result<(), ClientError> {
        self.framed.send(message).await?;
        Ok(())
    }

    /// Next message from the server, or `None` once it has closed.
    pub async fn recv(&mut self) -> Result<Option<Message>, ClientError> {
        match self.framed.next().await {
            Some(Ok(frame)) => Ok(Some(Message::decode(&frame)?)),
            Some(Err(FrameError::Io(e))) => Err(ClientError::Io(e)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}
