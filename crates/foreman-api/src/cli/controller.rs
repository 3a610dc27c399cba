//! Controller wiring: secure channels, dispatcher, receiver, worker pool.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use foreman_core::dispatch::{Dispatcher, Receiver};
use foreman_core::engine::registry::AppRegistry;
use foreman_core::event::EventBus;
use foreman_infra::apps::BuiltinRegistry;
use foreman_infra::channel::{ChannelKeys, TcpPull, TcpRouter};
use foreman_infra::process::WorkerPool;
use foreman_types::config::ForemanConfig;
use foreman_types::event::Event;

/// A running controller: dispatcher and receiver tasks plus the spawned
/// worker pool.
pub struct Controller {
    pub dispatcher: Arc<Dispatcher<TcpRouter, TcpRouter>>,
    pub receiver: Arc<Receiver<TcpPull>>,
    pub bus: EventBus,
    pool: WorkerPool,
    shutdown: CancellationToken,
}

impl Controller {
    /// Bind the three channels, start the dispatcher and receiver tasks,
    /// and spawn the worker pool.
    pub async fn start(
        config: &ForemanConfig,
        workers: Option<u32>,
        config_path: Option<&Path>,
    ) -> anyhow::Result<Self> {
        let keys = Arc::new(
            ChannelKeys::load(&config.key_dir)
                .with_context(|| format!(
                    "cannot load channel keys from {} (run `foreman keygen` first)",
                    config.key_dir.display()
                ))?,
        );
        let shutdown = CancellationToken::new();
        let poll_interval = Duration::from_millis(config.poll_interval_ms);

        let requests =
            TcpRouter::bind(&config.requests_addr, Arc::clone(&keys), shutdown.clone()).await?;
        let control =
            TcpRouter::bind(&config.control_addr, Arc::clone(&keys), shutdown.clone()).await?;
        let results =
            TcpPull::bind(&config.results_addr, Arc::clone(&keys), shutdown.clone()).await?;

        let registry: Arc<dyn AppRegistry> = Arc::new(BuiltinRegistry);
        let dispatcher = Arc::new(Dispatcher::new(requests, control, registry, poll_interval));
        let bus = EventBus::new(config.event_capacity);
        let receiver = Arc::new(Receiver::new(results, bus.clone(), poll_interval));

        {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move { dispatcher.run().await });
        }
        {
            let receiver = Arc::clone(&receiver);
            tokio::spawn(async move { receiver.run().await });
        }

        let worker_count = workers.unwrap_or(config.workers);
        let pool = WorkerPool::spawn(worker_count, config_path)
            .context("failed to spawn worker processes")?;

        Ok(Self {
            dispatcher,
            receiver,
            bus,
            pool,
            shutdown,
        })
    }

    /// Stop the loops, release the sockets, and kill the worker pool.
    pub async fn stop(self) {
        self.dispatcher.stop();
        self.receiver.stop();
        self.shutdown.cancel();
        self.pool.shutdown().await;
    }
}

/// Log or print one received event.
pub fn report_event(event: &Event, json: bool) {
    if json {
        match serde_json::to_string(event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::error!(error = %e, "failed to serialize event"),
        }
    } else {
        tracing::info!(
            callback = event.id.callback_name(),
            execution_uid = event.workflow_execution_uid(),
            "event"
        );
    }
}

/// Run the controller until interrupted.
pub async fn run_controller(
    config: ForemanConfig,
    workers: Option<u32>,
    config_path: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let controller = Controller::start(&config, workers, config_path).await?;
    tracing::info!(
        requests = config.requests_addr.as_str(),
        results = config.results_addr.as_str(),
        control = config.control_addr.as_str(),
        "controller running, press Ctrl-C to stop"
    );

    let mut events = controller.bus.subscribe();
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            report_event(&event, json);
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    tracing::info!(
        completed = controller.receiver.workflows_completed(),
        "shutting down"
    );
    controller.stop().await;
    event_task.abort();
    Ok(())
}
