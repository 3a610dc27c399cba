//! Secure loopback channels.
//!
//! Every connection is mutually authenticated with a challenge-response
//! handshake over the two channel secrets and encrypted with a derived
//! per-session AES-256-GCM key ([`secure`]). [`tcp`] builds the four
//! transport-port implementations on top; [`keys`] manages the secrets.

pub mod keys;
pub mod secure;
pub mod tcp;

pub use keys::ChannelKeys;
pub use tcp::{TcpLink, TcpPull, TcpRouter};
