//! In-process transport used by tests.
//!
//! Mirrors the wire topology without sockets: a [`MemoryRouter`] stands in
//! for a router-bound channel with one queue per connected peer, and
//! [`memory_pipe`] stands in for the push/pull results channel. Cloning
//! shares the underlying queues.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};

use super::{PullChannel, PushChannel, RouterChannel, TransportError, WorkerChannel};

// ---------------------------------------------------------------------------
// Router channel
// ---------------------------------------------------------------------------

/// In-memory router: routes payloads to connected peers by identity and
/// collects everything the peers send.
#[derive(Clone)]
pub struct MemoryRouter {
    inbound_tx: mpsc::UnboundedSender<(String, Vec<u8>)>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<(String, Vec<u8>)>>>,
    peers: Arc<DashMap<String, mpsc::UnboundedSender<Vec<u8>>>>,
}

impl MemoryRouter {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            peers: Arc::new(DashMap::new()),
        }
    }

    /// Connect a peer under the given identity, returning its endpoint.
    pub fn connect(&self, identity: &str) -> MemoryPeer {
        let (tx, rx) = mpsc::unbounded_channel();
        self.peers.insert(identity.to_string(), tx);
        MemoryPeer {
            identity: identity.to_string(),
            to_router: self.inbound_tx.clone(),
            from_router: Mutex::new(rx),
        }
    }
}

impl Default for MemoryRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RouterChannel for MemoryRouter {
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

/// Worker-side endpoint of a [`MemoryRouter`].
pub struct MemoryPeer {
    identity: String,
    to_router: mpsc::UnboundedSender<(String, Vec<u8>)>,
    from_router: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl WorkerChannel for MemoryPeer {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.to_router
            .send((self.identity.clone(), payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Vec<u8>, TransportError> {
        self.from_router
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }

    async fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.from_router.lock().await.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

// ---------------------------------------------------------------------------
// Push/pull pipe
// ---------------------------------------------------------------------------

/// Build an in-memory push/pull pair for the results channel.
pub fn memory_pipe() -> (MemoryPush, MemoryPull) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MemoryPush { tx },
        MemoryPull {
            rx: Mutex::new(rx),
        },
    )
}

/// Worker-side push half. Clone one per worker; all feed the same pull.
#[derive(Clone)]
pub struct MemoryPush {
    tx: mpsc::UnboundedSender<Vec<u8>>,
}

impl PushChannel for MemoryPush {
    async fn send(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.tx.send(payload).map_err(|_| TransportError::Closed)
    }
}

/// Controller-side pull half.
pub struct MemoryPull {
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl PullChannel for MemoryPull {
    async fn try_recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.rx.lock().await.try_recv() {
            Ok(payload) => Ok(Some(payload)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn router_routes_by_identity() {
        let router = MemoryRouter::new();
        let alpha = router.connect("Worker-0");
        let beta = router.connect("Worker-1");

        router.send_to("Worker-1", b"for beta".to_vec()).await.unwrap();
        assert_eq!(beta.recv().await.unwrap(), b"for beta");
        assert_eq!(alpha.try_recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn router_collects_peer_sends_with_identity() {
        let router = MemoryRouter::new();
        let peer = router.connect("Worker-3");
        peer.send(b"Ready".to_vec()).await.unwrap();

        let (identity, payload) = router.try_recv().await.unwrap().unwrap();
        assert_eq!(identity, "Worker-3");
        assert_eq!(payload, b"Ready");
        assert!(router.try_recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn send_to_unknown_identity_is_unroutable() {
        let router = MemoryRouter::new();
        let result = router.send_to("Worker-9", vec![]).await;
        assert!(matches!(result, Err(TransportError::Unroutable(id)) if id == "Worker-9"));
    }

    #[tokio::test]
    async fn pipe_fans_in_multiple_pushers() {
        let (push, pull) = memory_pipe();
        let push2 = push.clone();
        push.send(b"one".to_vec()).await.unwrap();
        push2.send(b"two".to_vec()).await.unwrap();

        assert_eq!(pull.try_recv().await.unwrap(), Some(b"one".to_vec()));
        assert_eq!(pull.try_recv().await.unwrap(), Some(b"two".to_vec()));
        assert_eq!(pull.try_recv().await.unwrap(), None);
    }
}
