//! CLI command definitions and dispatch for the `foreman` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod controller;
pub mod keygen;
pub mod run;
pub mod worker;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use clap_complete::Shell;

use foreman_types::config::ForemanConfig;

/// Dispatch and execute automation workflows across a local worker pool.
#[derive(Parser)]
#[command(name = "foreman", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Bridge tracing spans to OpenTelemetry (stdout exporter, filter
    /// from RUST_LOG).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller: dispatcher, receiver, and the worker pool.
    Controller {
        /// Number of worker processes to spawn (overrides config).
        #[arg(long)]
        workers: Option<u32>,

        /// Path to foreman.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run one worker process.
    Worker {
        /// Worker id; the channel identity becomes `Worker-<id>`.
        #[arg(long)]
        id: u32,

        /// Path to foreman.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Execute one playbook to completion and stream its events.
    Run {
        /// Path to the workflow JSON file.
        playbook: PathBuf,

        /// Number of worker processes to spawn (overrides config).
        #[arg(long)]
        workers: Option<u32>,

        /// Path to foreman.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Generate channel key material (server.key / client.key).
    Keygen {
        /// Directory to write the key files into.
        #[arg(long, default_value = "keys")]
        out: PathBuf,
    },

    /// Generate shell completions.
    Completions { shell: Shell },
}

/// Load configuration: an explicit path, else `foreman.toml` in the
/// working directory, else defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<ForemanConfig> {
    let resolved = match path {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let default = PathBuf::from("foreman.toml");
            default.exists().then_some(default)
        }
    };
    match resolved {
        Some(path) => {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
            toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("cannot parse {}: {e}", path.display()))
        }
        None => Ok(ForemanConfig::default()),
    }
}
