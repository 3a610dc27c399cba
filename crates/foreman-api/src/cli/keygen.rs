//! The `foreman keygen` command.

use std::path::Path;

use anyhow::Context;

use foreman_infra::channel::ChannelKeys;
use foreman_infra::channel::keys::{CLIENT_KEY_FILE, SERVER_KEY_FILE};

/// Generate and write a fresh pair of channel secrets.
pub fn generate_keys(out: &Path, json: bool) -> anyhow::Result<()> {
    let keys = ChannelKeys::generate();
    keys.save(out)
        .with_context(|| format!("cannot write key files into {}", out.display()))?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "key_dir": out.display().to_string(),
                "files": [SERVER_KEY_FILE, CLIENT_KEY_FILE],
            })
        );
    } else {
        println!(
            "wrote {} and {} into {}",
            SERVER_KEY_FILE,
            CLIENT_KEY_FILE,
            out.display()
        );
    }
    Ok(())
}
