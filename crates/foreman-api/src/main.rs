//! Foreman CLI entry point.
//!
//! Binary name: `foreman`
//!
//! Parses CLI arguments, initializes tracing, then dispatches to the
//! controller, worker, playbook-run, or keygen command handlers.

mod cli;

use clap::Parser;
use clap_complete::generate;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need tracing or config
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "foreman", &mut std::io::stdout());
        return Ok(());
    }

    // Set up tracing based on verbosity. With --otel, spans are mirrored
    // to OpenTelemetry under a per-process service name and the filter
    // comes from RUST_LOG; the guard flushes the exporter on drop.
    let _telemetry = if cli.otel {
        let service = match &cli.command {
            Commands::Controller { .. } => "foreman-controller".to_string(),
            Commands::Worker { id, .. } => format!("foreman-worker-{id}"),
            Commands::Run { .. } => "foreman-run".to_string(),
            Commands::Keygen { .. } | Commands::Completions { .. } => "foreman".to_string(),
        };
        let telemetry = foreman_observe::init(&service)
            .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;
        Some(telemetry)
    } else {
        let filter = match cli.verbose {
            0 if cli.quiet => "error",
            0 => "info",
            1 => "info,foreman=debug",
            _ => "trace",
        };
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(filter))
            .with_target(false)
            .init();
        None
    };

    match cli.command {
        Commands::Controller { workers, config } => {
            let loaded = cli::load_config(config.as_deref())?;
            cli::controller::run_controller(loaded, workers, config.as_deref(), cli.json).await
        }
        Commands::Worker { id, config } => {
            let loaded = cli::load_config(config.as_deref())?;
            cli::worker::run_worker(loaded, id).await
        }
        Commands::Run {
            playbook,
            workers,
            config,
        } => {
            let loaded = cli::load_config(config.as_deref())?;
            cli::run::run_playbook(loaded, &playbook, workers, config.as_deref(), cli.json).await
        }
        Commands::Keygen { out } => cli::keygen::generate_keys(&out, cli.json),
        // Handled before tracing setup.
        Commands::Completions { .. } => Ok(()),
    }
}
