//! The `foreman worker` command: one worker process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use foreman_core::worker::{Worker, worker_identity};
use foreman_infra::apps::BuiltinRegistry;
use foreman_infra::channel::{ChannelKeys, TcpLink};
use foreman_types::config::ForemanConfig;

/// Connect the three channels and run the worker loop until a signal or
/// channel closure stops it.
pub async fn run_worker(config: ForemanConfig, id: u32) -> anyhow::Result<()> {
    let keys = ChannelKeys::load(&config.key_dir).with_context(|| {
        format!(
            "cannot load channel keys from {} (run `foreman keygen` first)",
            config.key_dir.display()
        )
    })?;
    let identity = worker_identity(id);
    let shutdown = CancellationToken::new();

    let requests =
        TcpLink::connect(&config.requests_addr, &keys, &identity, shutdown.clone()).await?;
    let control =
        TcpLink::connect(&config.control_addr, &keys, &identity, shutdown.clone()).await?;
    let results =
        TcpLink::connect(&config.results_addr, &keys, &identity, shutdown.clone()).await?;

    let worker = Worker::new(
        identity,
        requests,
        control,
        results,
        Arc::new(BuiltinRegistry),
        Duration::from_millis(config.poll_interval_ms),
        shutdown.clone(),
    );

    // Hard exit: close the channels and give the control task ~2 s to
    // join (handled inside Worker::run once the token fires).
    tokio::spawn(wait_for_signal(shutdown));

    worker.run().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal(shutdown: CancellationToken) {
    use tokio::signal::unix::{SignalKind, signal};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            tracing::warn!(error = %e, "cannot install SIGTERM handler");
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
    tracing::info!("signal received, stopping worker");
    shutdown.cancel();
}

#[cfg(not(unix))]
async fn wait_for_signal(shutdown: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("signal received, stopping worker");
        shutdown.cancel();
    }
}
