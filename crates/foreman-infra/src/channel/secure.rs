//! Mutually authenticated, encrypted framing.
//!
//! Per-connection handshake over length-delimited frames:
//!
//! 1. client -> `nonce_a(32) ‖ hmac(client_secret, nonce_a ‖ identity) ‖ identity`
//! 2. server -> `nonce_b(32) ‖ hmac(server_secret, nonce_b ‖ nonce_a)`
//!
//! Each side verifies the other's tag before proceeding; a failed
//! verification closes the connection. Both derive the session key
//! `sha256(client_secret ‖ server_secret ‖ nonce_a ‖ nonce_b)` and every
//! subsequent frame is AES-256-GCM sealed as `nonce(12) ‖ ciphertext`
//! with a fresh random nonce.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use foreman_core::transport::TransportError;

use super::keys::ChannelKeys;

type HmacSha256 = Hmac<Sha256>;

/// AES-256-GCM nonce size prepended to each sealed frame.
const NONCE_SIZE: usize = 12;

/// Handshake nonce and tag sizes.
const CHALLENGE_SIZE: usize = 32;
const TAG_SIZE: usize = 32;

/// Identity reported for the controller end of a connection.
pub const SERVER_IDENTITY: &str = "server";

// ---------------------------------------------------------------------------
// Sealing
// ---------------------------------------------------------------------------

fn seal(cipher: &Aes256Gcm, payload: &[u8]) -> Result<Bytes, TransportError> {
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, payload)
        .map_err(|_| TransportError::Io("frame encryption failed".to_string()))?;
    let mut frame = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    frame.extend_from_slice(&nonce);
    frame.extend_from_slice(&ciphertext);
    Ok(Bytes::from(frame))
}

fn open(cipher: &Aes256Gcm, frame: &[u8]) -> Result<Vec<u8>, TransportError> {
    if frame.len() < NONCE_SIZE {
        return Err(TransportError::Io("sealed frame too short".to_string()));
    }
    let (nonce, ciphertext) = frame.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| TransportError::Io("frame decryption failed".to_string()))
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

fn compute_tag(key: &[u8; 32], parts: &[&[u8]]) -> Result<[u8; 32], TransportError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| TransportError::Handshake("invalid key length".to_string()))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().into())
}

fn verify_tag(key: &[u8; 32], parts: &[&[u8]], tag: &[u8]) -> bool {
    let Ok(mut mac) = <HmacSha256 as Mac>::new_from_slice(key) else {
        return false;
    };
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(tag).is_ok()
}

fn session_cipher(keys: &ChannelKeys, nonce_a: &[u8], nonce_b: &[u8]) -> Aes256Gcm {
    let mut hasher = Sha256::new();
    hasher.update(keys.client_secret);
    hasher.update(keys.server_secret);
    hasher.update(nonce_a);
    hasher.update(nonce_b);
    let key: [u8; 32] = hasher.finalize().into();
    Aes256Gcm::new(&key.into())
}

fn io_error(e: std::io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

/// Client (worker) side of the handshake. Announces `identity` and
/// authenticates the server before any payload flows.
pub async fn client_handshake<S>(
    stream: S,
    keys: &ChannelKeys,
    identity: &str,
) -> Result<SecureStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let nonce_a: [u8; CHALLENGE_SIZE] = Aes256Gcm::generate_key(OsRng).into();
    let tag = compute_tag(&keys.client_secret, &[&nonce_a, identity.as_bytes()])?;
    let mut hello = Vec::with_capacity(CHALLENGE_SIZE + TAG_SIZE + identity.len());
    hello.extend_from_slice(&nonce_a);
    hello.extend_from_slice(&tag);
    hello.extend_from_slice(identity.as_bytes());
    framed.send(Bytes::from(hello)).await.map_err(io_error)?;

    let reply = framed
        .next()
        .await
        .ok_or_else(|| TransportError::Handshake("connection closed during handshake".to_string()))?
        .map_err(io_error)?;
    if reply.len() != CHALLENGE_SIZE + TAG_SIZE {
        return Err(TransportError::Handshake(
            "malformed server reply".to_string(),
        ));
    }
    let (nonce_b, server_tag) = reply.split_at(CHALLENGE_SIZE);
    if !verify_tag(&keys.server_secret, &[nonce_b, &nonce_a], server_tag) {
        return Err(TransportError::Handshake(
            "server authentication failed".to_string(),
        ));
    }

    Ok(SecureStream {
        framed,
        cipher: session_cipher(keys, &nonce_a, nonce_b),
        peer_identity: SERVER_IDENTITY.to_string(),
    })
}

/// Server (controller) side of the handshake. Authenticates the client
/// and learns its identity.
pub async fn server_handshake<S>(
    stream: S,
    keys: &ChannelKeys,
) -> Result<SecureStream<S>, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());

    let hello = framed
        .next()
        .await
        .ok_or_else(|| TransportError::Handshake("connection closed during handshake".to_string()))?
        .map_err(io_error)?;
    if hello.len() <= CHALLENGE_SIZE + TAG_SIZE {
        return Err(TransportError::Handshake(
            "malformed client hello".to_string(),
        ));
    }
    let (nonce_a, rest) = hello.split_at(CHALLENGE_SIZE);
    let (client_tag, identity_bytes) = rest.split_at(TAG_SIZE);
    let identity = std::str::from_utf8(identity_bytes)
        .map_err(|_| TransportError::Handshake("identity is not UTF-8".to_string()))?
        .to_string();
    if !verify_tag(&keys.client_secret, &[nonce_a, identity_bytes], client_tag) {
        return Err(TransportError::Handshake(format!(
            "client authentication failed for '{identity}'"
        )));
    }

    let nonce_b: [u8; CHALLENGE_SIZE] = Aes256Gcm::generate_key(OsRng).into();
    let tag = compute_tag(&keys.server_secret, &[&nonce_b, nonce_a])?;
    let mut reply = Vec::with_capacity(CHALLENGE_SIZE + TAG_SIZE);
    reply.extend_from_slice(&nonce_b);
    reply.extend_from_slice(&tag);
    framed.send(Bytes::from(reply)).await.map_err(io_error)?;

    Ok(SecureStream {
        framed,
        cipher: session_cipher(keys, nonce_a, &nonce_b),
        peer_identity: identity,
    })
}

// ---------------------------------------------------------------------------
// SecureStream
// ---------------------------------------------------------------------------

/// A framed connection with an established session key.
pub struct SecureStream<S> {
    framed: Framed<S, LengthDelimitedCodec>,
    cipher: Aes256Gcm,
    peer_identity: String,
}

impl<S> SecureStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// The authenticated identity of the peer.
    pub fn peer_identity(&self) -> &str {
        &self.peer_identity
    }

    /// Seal and send one payload.
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = seal(&self.cipher, payload)?;
        self.framed.send(frame).await.map_err(io_error)
    }

    /// Receive and open the next payload. `None` means the peer closed.
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.framed.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(io_error(e)),
            Some(Ok(frame)) => open(&self.cipher, &frame).map(Some),
        }
    }

    /// Split into independently owned write and read halves, so a pump
    /// task can serve both directions concurrently.
    pub fn split(self) -> (SecureWriter<S>, SecureReader<S>) {
        let (sink, stream) = self.framed.split();
        (
            SecureWriter {
                sink,
                cipher: self.cipher.clone(),
            },
            SecureReader {
                stream,
                cipher: self.cipher,
            },
        )
    }
}

/// Write half of a split [`SecureStream`].
pub struct SecureWriter<S> {
    sink: SplitSink<Framed<S, LengthDelimitedCodec>, Bytes>,
    cipher: Aes256Gcm,
}

impl<S> SecureWriter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let frame = seal(&self.cipher, payload)?;
        self.sink.send(frame).await.map_err(io_error)
    }
}

/// Read half of a split [`SecureStream`].
pub struct SecureReader<S> {
    stream: SplitStream<Framed<S, LengthDelimitedCodec>>,
    cipher: Aes256Gcm,
}

impl<S> SecureReader<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub async fn recv(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        match self.stream.next().await {
            None => Ok(None),
            Some(Err(e)) => Err(io_error(e)),
            Some(Ok(frame)) => open(&self.cipher, &frame).map(Some),
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
    async fn handshake_establishes_identity_and_roundtrips() {
        let keys = ChannelKeys::generate();
        let (client_io, server_io) = tokio::io::duplex(4096);

        let (client, server) = tokio::join!(
            client_handshake(client_io, &keys, "Worker-7"),
            server_handshake(server_io, &keys),
        );
        let mut client = client.unwrap();
        let mut server = server.unwrap();
        assert_eq!(server.peer_identity(), "Worker-7");
        assert_eq!(client.peer_identity(), SERVER_IDENTITY);

        client.send(b"Ready").await.unwrap();
        assert_eq!(server.recv().await.unwrap().unwrap(), b"Ready");

        server.send(b"{\"steps\":[]}").await.unwrap();
        assert_eq!(
            client.recv().await.unwrap().unwrap(),
            b"{\"steps\":[]}"
        );
    }

    #[tokio::test]
    async fn wrong_client_key_is_rejected() {
        let keys = ChannelKeys::generate();
        let mut impostor = keys.clone();
        impostor.client_secret = ChannelKeys::generate().client_secret;
        let (client_io, server_io) = tokio::io::duplex(4096);

        let (client, server) = tokio::join!(
            client_handshake(client_io, &impostor, "Worker-0"),
            server_handshake(server_io, &keys),
        );
        assert!(matches!(server, Err(TransportError::Handshake(_))));
        // The server hangs up without replying, so the client fails too.
        assert!(client.is_err());
    }

    #[tokio::test]
    async fn wrong_server_key_is_rejected_by_client() {
        let keys = ChannelKeys::generate();
        let mut impostor = keys.clone();
        impostor.server_secret = ChannelKeys::generate().server_secret;
        let (client_io, server_io) = tokio::io::duplex(4096);

        let (client, _server) = tokio::join!(
            client_handshake(client_io, &keys, "Worker-0"),
            server_handshake(server_io, &impostor),
        );
        assert!(matches!(client, Err(TransportError::Handshake(_))));
    }

    #[tokio::test]
    async fn split_halves_share_the_session() {
        let keys = ChannelKeys::generate();
        let (client_io, server_io) = tokio::io::duplex(4096);
        let (client, server) = tokio::join!(
            client_handshake(client_io, &keys, "Worker-0"),
            server_handshake(server_io, &keys),
        );
        let (mut writer, _reader) = client.unwrap().split();
        let (_writer, mut reader) = server.unwrap().split();

        writer.send(b"through the halves").await.unwrap();
        assert_eq!(
            reader.recv().await.unwrap().unwrap(),
            b"through the halves"
        );
    }

    #[test]
    fn sealed_frames_do_not_open_under_another_session() {
        let keys = ChannelKeys::generate();
        let cipher_a = session_cipher(&keys, &[1u8; 32], &[2u8; 32]);
        let cipher_b = session_cipher(&keys, &[1u8; 32], &[3u8; 32]);

        let frame = seal(&cipher_a, b"secret payload").unwrap();
        assert_eq!(open(&cipher_a, &frame).unwrap(), b"secret payload");
        assert!(open(&cipher_b, &frame).is_err());
    }

    #[test]
    fn tampered_frame_fails_to_open() {
        let keys = ChannelKeys::generate();
        let cipher = session_cipher(&keys, &[1u8; 32], &[2u8; 32]);
        let frame = seal(&cipher, b"payload").unwrap();
        let mut tampered = frame.to_vec();
        let last = tampered.len() - 1;
        tampered[last] ^= 0x01;
        assert!(open(&cipher, &tampered).is_err());
        assert!(open(&cipher, &tampered[..4]).is_err());
    }
}
