//! Channel ports connecting the controller and its workers.
//!
//! Three loopback channels carry all traffic: requests (dispatch +
//! readiness), results (event fan-in), and control (pause/resume/trigger).
//! The controller side sees router/pull shapes, the worker side sees
//! request/push shapes. `foreman-infra` implements these over
//! authenticated TCP; [`memory`] provides in-process implementations for
//! tests.
//!
//! All `try_recv` methods are non-blocking polls: callers sleep briefly on
//! `None`, which keeps every suspension point explicit.

pub mod memory;

use std::future::Future;

use thiserror::Error;

/// Errors surfaced by channel implementations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("no connected peer '{0}'")]
    Unroutable(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Controller-side channel that routes payloads by worker identity.
pub trait RouterChannel: Send + Sync + 'static {
    /// Send a payload to the named peer.
    fn send_to(
        &self,
        identity: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Poll for the next `(identity, payload)` pair without blocking.
    fn try_recv(
        &self,
    ) -> impl Future<Output = Result<Option<(String, Vec<u8>)>, TransportError>> + Send;
}

/// Controller-side fan-in channel draining worker event streams.
pub trait PullChannel: Send + Sync + 'static {
    /// Poll for the next payload without blocking.
    fn try_recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;
}

/// Worker-side request channel (blocking receive, identity-scoped send).
pub trait WorkerChannel: Send + Sync + 'static {
    fn send(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next payload, waiting for it.
    fn recv(&self) -> impl Future<Output = Result<Vec<u8>, TransportError>> + Send;

    /// Poll for the next payload without blocking.
    fn try_recv(&self) -> impl Future<Output = Result<Option<Vec<u8>>, TransportError>> + Send;
}

/// Worker-side push channel for the event stream.
pub trait PushChannel: Send + Sync + 'static {
    fn send(&self, payload: Vec<u8>) -> impl Future<Output = Result<(), TransportError>> + Send;
}
