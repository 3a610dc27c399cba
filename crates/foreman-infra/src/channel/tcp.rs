//! TCP implementations of the transport ports.
//!
//! The controller binds one listener per channel; each accepted
//! connection is handshaked and served by a pump task that moves frames
//! between the socket and in-process queues. Routing by worker identity
//! is connection-per-peer: the identity announced in the handshake keys
//! the outbound queue. Workers hold one [`TcpLink`] per channel.
//!
//! All `try_recv` implementations poll the in-process queue, preserving
//! the non-blocking read + short sleep suspension model.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use foreman_core::transport::{
    PullChannel, PushChannel, RouterChannel, TransportError, WorkerChannel,
};

use super::keys::ChannelKeys;
use super::secure::{client_handshake, server_handshake};

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

// ---------------------------------------------------------------------------
// Controller side: router
// ---------------------------------------------------------------------------

/// Router-bound channel: routes outbound payloads by worker identity,
/// fans inbound payloads (tagged with the sender identity) into one
/// queue.
pub struct TcpRouter {
    peers: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>,
    local_addr: std::net::SocketAddr,
}

impl TcpRouter {
    /// Bind the listener and start accepting authenticated connections.
    pub async fn bind(
        addr: &str,
        keys: Arc<ChannelKeys>,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(io_error)?;
        let local_addr = listener.local_addr().map_err(io_error)?;
        tracing::info!(addr, "router channel bound");
        let peers: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>> = Arc::new(DashMap::new());
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        {
            let peers = Arc::clone(&peers);
            tokio::spawn(async move {
                loop {
                    let accepted = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => accepted,
                    };
                    match accepted {
                        Ok((stream, remote)) => {
                            tracing::debug!(%remote, "router connection accepted");
                            tokio::spawn(serve_router_connection(
                                stream,
                                Arc::clone(&keys),
                                Arc::clone(&peers),
                                inbound_tx.clone(),
                                shutdown.clone(),
                            ));
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                        }
                    }
                }
            });
        }

        Ok(Self {
            peers,
            inbound_rx: Mutex::new(inbound_rx),
            local_addr,
        })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

async fn serve_router_connection(
    stream: TcpStream,
    keys: Arc<ChannelKeys>,
    peers: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
    inbound_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    shutdown: CancellationToken,
) {
    let secure = match server_handshake(stream, &keys).await {
        Ok(secure) => secure,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting unauthenticated connection");
            return;
        }
    };
    let identity = secure.peer_identity().to_string();
    tracing::info!(worker = identity.as_str(), "worker connected");

    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    peers.insert(identity.clone(), outbound_tx);
    let (mut writer, mut reader) = secure.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            outgoing = outbound_rx.recv() => match outgoing {
                Some(payload) => {
                    if let Err(e) = writer.send(&payload).await {
                        tracing::warn!(worker = identity.as_str(), error = %e, "write failed");
                        break;
                    }
                }
                None => break,
            },
            incoming = reader.recv() => match incoming {
                Ok(Some(payload)) => {
                    if inbound_tx.send((identity.clone(), payload)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!(worker = identity.as_str(), "worker disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(worker = identity.as_str(), error = %e, "read failed");
                    break;
                }
            },
        }
    }
    peers.remove(&identity);
}

impl RouterChannel for TcpRouter {
    async fn send_to(&self, identity: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let peer = self
            .peers
            .get(identity)
            .ok_or_else(|| TransportError::Unroutable(identity.to_string()))?;
        peer.send(payload).map_err(|_| TransportError::Closed)
    }

    async fn try_recv(&self) -> Result<Option<(String, Vec<u8>)>, TransportError> {
        match self.inbound_rx.lock().await.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Controller side: pull
// ---------------------------------------------------------------------------

/// Pull-bound channel: fans every connected worker's pushes into one
/// queue.
pub struct TcpPull {
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    local_addr: std::net::SocketAddr,
}

impl TcpPull {
    pub async fn bind(
        addr: &str,
        keys: Arc<ChannelKeys>,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await.map_err(io_error)?;
        let local_addr = listener.local_addr().map_err(io_error)?;
        tracing::info!(addr, "pull channel bound");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((stream, remote)) => {
                        tracing::debug!(%remote, "pull connection accepted");
                        tokio::spawn(serve_pull_connection(
                            stream,
                            Arc::clone(&keys),
                            inbound_tx.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        Ok(Self {
            inbound_rx: Mutex::new(inbound_rx),
            local_addr,
        })
    }

    /// The address the listener actually bound to.
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }
}

async fn serve_pull_connection(
    stream: TcpStream,
    keys: Arc<ChannelKeys>,
    inbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    shutdown: CancellationToken,
) {
    let secure = match server_handshake(stream, &keys).await {
        Ok(secure) => secure,
        Err(e) => {
            tracing::warn!(error = %e, "rejecting unauthenticated connection");
            return;
        }
    };
    let identity = secure.peer_identity().to_string();
    let (_writer, mut reader) = secure.split();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            incoming = reader.recv() => match incoming {
                Ok(Some(payload)) => {
                    if inbound_tx.send(payload).is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(worker = identity.as_str(), error = %e, "read failed");
                    break;
                }
            },
        }
    }
}

impl PullChannel for TcpPull {
    async fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound_rx.lock().await.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

/// One authenticated worker-side connection, served by a pump task.
///
/// Implements both the request/reply shape (requests and control
/// channels) and the push shape (results channel).
pub struct TcpLink {
    outbound_tx: mpsc::UnboundedSender<Vec<u8>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl TcpLink {
    /// Connect, handshake as `identity`, and start the pump task.
    pub async fn connect(
        addr: &str,
        keys: &ChannelKeys,
        identity: &str,
        shutdown: CancellationToken,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr).await.map_err(io_error)?;
        let secure = client_handshake(stream, keys, identity).await?;
        tracing::debug!(addr, identity, "channel connected");
        let (mut writer, mut reader) = secure.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    outgoing = outbound_rx.recv() => match outgoing {
                        Some(payload) => {
                            if writer.send(&payload).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    },
                    incoming = reader.recv() => match incoming {
                        Ok(Some(payload)) => {
                            if inbound_tx.send(payload).is_err() {
                                break;
                            }
                        }
                        _ => break,
                    },
                }
            }
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
        })
    }

    fn push(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.outbound_tx
            .send(payload)
            .map_err(|_| TransportError::Closed)
    }
}

impl WorkerChannel for TcpLink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.push(payload)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.inbound_rx.lock().await.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

impl PushChannel for TcpLink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.push(payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
