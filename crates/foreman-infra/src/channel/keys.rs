//! Channel key material.
//!
//! Both ends of every channel hold the same two 32-byte secrets: the
//! server secret authenticates the controller, the client secret
//! authenticates workers. They are loaded once at startup from a
//! configured directory (`server.key` / `client.key`, base64, one line
//! each) and never leave the process.

use std::fs;
use std::path::Path;

use aes_gcm::aead::{KeyInit, OsRng};
use aes_gcm::Aes256Gcm;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use thiserror::Error;

/// File name of the controller-side secret.
pub const SERVER_KEY_FILE: &str = "server.key";

/// File name of the worker-side secret.
pub const CLIENT_KEY_FILE: &str = "client.key";

/// Errors from key loading and generation.
///
/// Key bytes never appear in these errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("key file '{0}' is not valid base64")]
    Encoding(String),

    #[error("key file '{0}' does not hold a 32-byte key")]
    Length(String),
}

/// The pair of channel secrets shared by controller and workers.
#[derive(Clone)]
pub struct ChannelKeys {
    pub server_secret: [u8; 32],
    pub client_secret: [u8; 32],
}

impl ChannelKeys {
    /// Generate a fresh random pair.
    pub fn generate() -> Self {
        Self {
            server_secret: Aes256Gcm::generate_key(OsRng).into(),
            client_secret: Aes256Gcm::generate_key(OsRng).into(),
        }
    }

    /// Write both key files into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<(), KeyError> {
        fs::create_dir_all(dir)?;
        fs::write(
            dir.join(SERVER_KEY_FILE),
            format!("{}\n", BASE64.encode(self.server_secret)),
        )?;
        fs::write(
            dir.join(CLIENT_KEY_FILE),
            format!("{}\n", BASE64.encode(self.client_secret)),
        )?;
        Ok(())
    }

    /// Load both key files from `dir`.
    pub fn load(dir: &Path) -> Result<Self, KeyError> {
        Ok(Self {
            server_secret: load_key(&dir.join(SERVER_KEY_FILE))?,
            client_secret: load_key(&dir.join(CLIENT_KEY_FILE))?,
        })
    }
}

impl std::fmt::Debug for ChannelKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key bytes.
        f.debug_struct("ChannelKeys").finish_non_exhaustive()
    }
}

fn load_key(path: &Path) -> Result<[u8; 32], KeyError> {
    let display = path.display().to_string();
    let text = fs::read_to_string(path)?;
    let bytes = BASE64
        .decode(text.trim())
        .map_err(|_| KeyError::Encoding(display.clone()))?;
    bytes
        .try_into()
        .map_err(|_| KeyError::Length(display))
}
