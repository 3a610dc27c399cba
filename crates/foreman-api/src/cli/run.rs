//! The `foreman run` command: execute one playbook and stream its events.

use std::path::Path;

use anyhow::Context;

use foreman_types::config::ForemanConfig;
use foreman_types::event::EventId;
use foreman_types::workflow::WorkflowDefinition;

use super::controller::{Controller, report_event};

/// Start a controller, submit the playbook, print its events until the
/// shutdown event arrives, then tear everything down.
pub async fn run_playbook(
    config: ForemanConfig,
    playbook: &Path,
    workers: Option<u32>,
    config_path: Option<&Path>,
    json: bool,
) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(playbook)
        .with_context(|| format!("cannot read {}", playbook.display()))?;
    let definition: WorkflowDefinition = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a valid workflow", playbook.display()))?;

    let controller = Controller::start(&config, workers, config_path).await?;
    let mut events = controller.bus.subscribe();

    let execution_uid = match controller.dispatcher.submit(definition) {
        Ok(execution_uid) => execution_uid,
        Err(e) => {
            controller.stop().await;
            anyhow::bail!("workflow rejected: {e}");
        }
    };
    tracing::info!(execution_uid = execution_uid.as_str(), "playbook submitted");

    loop {
        let Some(event) = events.next_for(&execution_uid).await else {
            controller.stop().await;
            anyhow::bail!("event stream ended before the workflow finished");
        };
        report_event(&event, json);
        if event.id == EventId::WorkflowShutdown {
            break;
        }
    }

    controller.stop().await;
    Ok(())
}
