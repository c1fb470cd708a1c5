//! TCP service server, optionally behind TLS.
//!
//! Each accepted socket gets its own task, which also runs the TLS handshake
//! when an acceptor is configured. Inbound bytes are split into
//! NUL-terminated frames before reaching the broker, so one `on_data` call
//! always sees one complete message. Replies travel through a per-connection
//! queue, which keeps [`Transport::send`] non-blocking.

use bytes::Bytes;
use castanets_core::{
    ConnectionId, Launcher, NulFrameCodec, ServiceBroker, TokenIssuer, TokenVerifier, Transport,
};
use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_rustls::server::TlsStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

/// Per-connection limits and transport security.
#[derive(Clone)]
pub struct ServerOptions {
    pub max_frame_len: usize,
    /// Close connections still unauthorized after this long. Also bounds the
    /// TLS handshake.
    pub handshake_timeout: Option<Duration>,
    /// Serve TLS instead of plain TCP.
    pub tls: Option<TlsAcceptor>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            max_frame_len: castanets_core::DEFAULT_MAX_FRAME_LEN,
            handshake_timeout: None,
            tls: None,
        }
    }
}

impl fmt::Debug for ServerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("max_frame_len", &self.max_frame_len)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

enum Outbound {
    Frame(Bytes),
    Close,
}

/// Routes broker output to the task owning each socket.
#[derive(Default)]
pub struct ConnectionTable {
    queues: Mutex<HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>>,
}

impl ConnectionTable {
    fn insert(&self, conn: ConnectionId, queue: mpsc::UnboundedSender<Outbound>) {
        self.queues.lock().insert(conn, queue);
    }

    fn remove(&self, conn: ConnectionId) {
        self.queues.lock().remove(&conn);
    }

    fn push(&self, conn: ConnectionId, item: Outbound) {
        let queues = self.queues.lock();
        match queues.get(&conn) {
            Some(queue) => {
                // The receiver only goes away together with the table entry.
                let _ = queue.send(item);
            }
            None => tracing::debug!("Dropping output for departed {}", conn),
        }
    }
}

impl Transport for ConnectionTable {
    fn send(&self, conn: ConnectionId, frame: Bytes) {
        self.push(conn, Outbound::Frame(frame));
    }

    fn close(&self, conn: ConnectionId) {
        self.push(conn, Outbound::Close);
    }
}

/// A bound, not yet running, service server.
pub struct ServiceServer {
    listener: TcpListener,
    broker: Arc<ServiceBroker>,
    table: Arc<ConnectionTable>,
    options: ServerOptions,
}

impl ServiceServer {
    pub async fn bind(
        addr: SocketAddr,
        options: ServerOptions,
        issuer: Arc<dyn TokenIssuer>,
        verifier: Arc<dyn TokenVerifier>,
        launcher: Arc<dyn Launcher>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let table = Arc::new(ConnectionTable::default());
        let broker = Arc::new(ServiceBroker::new(
            issuer,
            verifier,
            launcher,
            table.clone(),
        ));
        Ok(Self {
            listener,
            broker,
            table,
            options,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn broker(&self) -> Arc<ServiceBroker> {
        self.broker.clone()
    }

    /// Accept connections until `shutdown` fires, then close them all.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let addr = self.local_addr()?;
        if self.options.tls.is_some() {
            tracing::info!("Start service server on {} (TLS)", addr);
        } else {
            tracing::info!("Start service server on {}", addr);
        }

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Accept failed: {}", e);
                            continue;
                        }
                    };
                    tasks.spawn(handle_connection(
                        stream,
                        peer,
                        self.broker.clone(),
                        self.table.clone(),
                        self.options.clone(),
                        shutdown.child_token(),
                    ));
                }
            }
        }

        tracing::info!("Stop service server");
        while tasks.join_next().await.is_some() {}
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    broker: Arc<ServiceBroker>,
    table: Arc<ConnectionTable>,
    options: ServerOptions,
    shutdown: CancellationToken,
) {
    let Some(acceptor) = options.tls.clone() else {
        return run_connection(stream, peer, &broker, &table, &options, &shutdown).await;
    };

    let stream = tokio::select! {
        _ = shutdown.cancelled() => return,
        accepted = accept_tls(&acceptor, stream, &options) => match accepted {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!("TLS handshake with {} failed: {:#}", peer, e);
                return;
            }
        },
    };
    run_connection(stream, peer, &broker, &table, &options, &shutdown).await;
}

async fn accept_tls(
    acceptor: &TlsAcceptor,
    stream: TcpStream,
    options: &ServerOptions,
) -> anyhow::Result<TlsStream<TcpStream>> {
    let stream = match options.handshake_timeout {
        Some(limit) => tokio::time::timeout(limit, acceptor.accept(stream))
            .await
            .context("timed out")??,
        None => acceptor.accept(stream).await?,
    };
    Ok(stream)
}

async fn run_connection<S>(
    stream: S,
    peer: SocketAddr,
    broker: &ServiceBroker,
    table: &ConnectionTable,
    options: &ServerOptions,
    shutdown: &CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (queue, outbound) = mpsc::unbounded_channel();
    let conn = broker.register(peer.ip().to_canonical().to_string(), peer.port());
    table.insert(conn, queue);
    tracing::debug!("Accepted {} from {}", conn, peer);

    if let Err(e) = broker.on_accepted(conn) {
        tracing::debug!("{}", e);
    }

    let result = serve(conn, stream, broker, outbound, options, shutdown).await;

    table.remove(conn);
    broker.on_closed(conn);
    match result {
        Ok(()) => tracing::debug!("Closed {} ({})", conn, peer),
        Err(e) => tracing::warn!("Connection error from {}: {}", peer, e),
    }
}

async fn serve<S>(
    conn: ConnectionId,
    stream: S,
    broker: &ServiceBroker,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    options: &ServerOptions,
    shutdown: &CancellationToken,
) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(
        stream,
        NulFrameCodec::with_max_frame_len(options.max_frame_len),
    );

    let mut timer_armed = options.handshake_timeout.is_some();
    let handshake_timer = async {
        match options.handshake_timeout {
            Some(timeout) => tokio::time::sleep(timeout).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(handshake_timer);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),

            _ = &mut handshake_timer, if timer_armed => {
                timer_armed = false;
                if !broker.is_authorized(conn) {
                    tracing::info!("Handshake timed out on {}", conn);
                    return Ok(());
                }
            }

            item = outbound.recv() => match item {
                Some(Outbound::Frame(frame)) => framed.send(frame).await?,
                Some(Outbound::Close) | None => return Ok(()),
            },

            inbound = framed.next() => match inbound {
                Some(Ok(frame)) => {
                    // The broker logs its own failures; none of them end the loop
                    // except through an explicit close.
                    if let Err(e) = broker.on_data(conn, &frame) {
                        tracing::trace!("{}", e);
                    }
                }
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(()),
            },
        }
    }
}
