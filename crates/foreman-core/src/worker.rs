//! The worker loop: one workflow at a time, with a cooperating control
//! task.
//!
//! On startup the worker announces `Ready` on the requests channel and
//! `Executing` on the control channel, then loops: receive one workflow,
//! execute it, announce `Done`. The control task reads the control channel
//! concurrently and handles pause / resume / trigger delivery; the two
//! tasks share only the per-execution [`ExecutionControls`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use foreman_types::event::Event;
use foreman_types::protocol::{ControlReply, ControlRequest, ReadySignal};
use foreman_types::wire;
use foreman_types::workflow::WorkflowDefinition;
use tokio_util::sync::CancellationToken;

use crate::engine::context::ExecutionControls;
use crate::engine::executor::{EventSink, WorkflowExecutor};
use crate::engine::registry::AppRegistry;
use crate::engine::workflow::Workflow;
use crate::transport::{PushChannel, TransportError, WorkerChannel};

/// How long a stopping worker waits for its control task to join.
const CONTROL_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Identity string a worker announces on the router channels.
pub fn worker_identity(id: u32) -> String {
    format!("Worker-{id}")
}

// ---------------------------------------------------------------------------
// Event sink over the results channel
// ---------------------------------------------------------------------------

struct ChannelSink<P: PushChannel> {
    results: Arc<P>,
}

impl<P: PushChannel> EventSink for ChannelSink<P> {
    async fn emit(&self, event: Event) {
        match wire::encode_event(&event) {
            Ok(bytes) => {
                if let Err(e) = self.results.send(bytes).await {
                    tracing::warn!(error = %e, "failed to push event");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to encode event");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// A long-lived worker executing workflows serially.
pub struct Worker<Q, C, P>
where
    Q: WorkerChannel,
    C: WorkerChannel,
    P: PushChannel,
{
    identity: String,
    requests: Q,
    control: Arc<C>,
    results: Arc<P>,
    registry: Arc<dyn AppRegistry>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<Q, C, P> Worker<Q, C, P>
where
    Q: WorkerChannel,
    C: WorkerChannel,
    P: PushChannel,
{
    pub fn new(
        identity: String,
        requests: Q,
        control: C,
        results: P,
        registry: Arc<dyn AppRegistry>,
        poll_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            identity,
            requests,
            control: Arc::new(control),
            results: Arc::new(results),
            registry,
            poll_interval,
            shutdown,
        }
    }

    /// Run until the shutdown token fires or a channel closes.
    pub async fn run(&self) -> Result<(), TransportError> {
        tracing::info!(worker = self.identity.as_str(), "worker starting");
        self.requests
            .send(ReadySignal::Ready.as_bytes().to_vec())
            .await?;
        self.control
            .send(ControlReply::Executing.as_bytes().to_vec())
            .await?;

        let active: Arc<Mutex<Option<Arc<ExecutionControls>>>> = Arc::new(Mutex::new(None));
        let control_task = tokio::spawn(control_loop(
            Arc::clone(&self.control),
            Arc::clone(&active),
            self.poll_interval,
            self.shutdown.clone(),
        ));

        let executor = WorkflowExecutor::new(
            Arc::clone(&self.registry),
            ChannelSink {
                results: Arc::clone(&self.results),
            },
        );

        loop {
            let payload = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                payload = self.requests.recv() => match payload {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(worker = self.identity.as_str(), error = %e, "requests channel closed");
                        break;
                    }
                },
            };

            let definition: WorkflowDefinition = match serde_json::from_slice(&payload) {
                Ok(definition) => definition,
                Err(e) => {
                    tracing::error!(worker = self.identity.as_str(), error = %e, "malformed workflow JSON");
                    self.requests
                        .send(ReadySignal::Done.as_bytes().to_vec())
                        .await?;
                    continue;
                }
            };

            match Workflow::from_definition(definition, self.registry.as_ref()) {
                Err(e) => {
                    // Defense in depth: the dispatcher validates at
                    // submission, so this workflow never started and emits
                    // nothing.
                    tracing::error!(worker = self.identity.as_str(), error = %e, "rejecting invalid workflow");
                }
                Ok((mut workflow, start_arguments)) => {
                    let controls = Arc::new(ExecutionControls::new());
                    if let Ok(mut slot) = active.lock() {
                        *slot = Some(Arc::clone(&controls));
                    }
                    executor
                        .execute(&mut workflow, &controls, start_arguments, &self.shutdown)
                        .await;
                    if let Ok(mut slot) = active.lock() {
                        *slot = None;
                    }
                }
            }
            self.requests
                .send(ReadySignal::Done.as_bytes().to_vec())
                .await?;
        }

        self.shutdown.cancel();
        if tokio::time::timeout(CONTROL_JOIN_TIMEOUT, control_task)
            .await
            .is_err()
        {
            tracing::warn!(worker = self.identity.as_str(), "control task did not join in time");
        }
        tracing::info!(worker = self.identity.as_str(), "worker stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Control task
// ---------------------------------------------------------------------------

fn current_controls(
    active: &Arc<Mutex<Option<Arc<ExecutionControls>>>>,
) -> Option<Arc<ExecutionControls>> {
    active.lock().ok().and_then(|slot| slot.clone())
}

/// Read the control channel: set/clear the pause flag with immediate
/// acks, hand trigger payloads to the executing step's incoming-data
/// slot.
async fn control_loop<C: WorkerChannel>(
    control: Arc<C>,
    active: Arc<Mutex<Option<Arc<ExecutionControls>>>>,
    poll_interval: Duration,
    shutdown: CancellationToken,
) {
    loop {
        if shutdown.is_cancelled() {
            break;
        }
        match control.try_recv().await {
            Ok(Some(message)) => match ControlRequest::decode(&message) {
                Ok(ControlRequest::Pause) => {
                    if let Some(controls) = current_controls(&active) {
                        controls.pause();
                    }
                    if let Err(e) = control.send(ControlReply::Paused.as_bytes().to_vec()).await {
                        tracing::warn!(error = %e, "failed to ack pause");
                    }
                }
                Ok(ControlRequest::Resume) => {
                    if let Some(controls) = current_controls(&active) {
                        controls.resume();
                    }
                    if let Err(e) = control.send(ControlReply::Resumed.as_bytes().to_vec()).await {
                        tracing::warn!(error = %e, "failed to ack resume");
                    }
                }
                Ok(ControlRequest::Trigger(payload)) => {
                    let delivered = current_controls(&active)
                        .map(|controls| controls.deliver_trigger(payload))
                        .unwrap_or(false);
                    if !delivered {
                        tracing::debug!("no step awaiting trigger data, payload dropped");
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable control message");
                }
            },
            Ok(None) => {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "control channel receive failed");
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }
    }
    tracing::debug!("control task stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::{ActionError, ActionFuture, AppInstance};
    use crate::transport::RouterChannel;
    use crate::transport::memory::{MemoryRouter, memory_pipe};
    use foreman_types::error::DefinitionError;
    use serde_json::{Map, Value};

    struct NullRegistry;

    struct NullInstance;

    impl AppInstance for NullInstance {
        fn invoke<'a>(
            &'a mut self,
            _action: &'a str,
            _inputs: &'a Map<String, Value>,
        ) -> ActionFuture<'a> {
            Box::pin(async { Ok(Value::Null) })
        }

        fn shutdown(&mut self) -> Result<(), ActionError> {
            Ok(())
        }
    }

    impl AppRegistry for NullRegistry {
        fn validate_action(&self, app: &str, _action: &str) -> Result<(), DefinitionError> {
            if app == "forbidden" {
                Err(DefinitionError::UnknownApp(app.to_string()))
            } else {
                Ok(())
            }
        }

        fn create_instance(
            &self,
            _app: &str,
            _device: &str,
        ) -> Result<Box<dyn AppInstance>, DefinitionError> {
            Ok(Box::new(NullInstance))
        }
    }

    fn spawn_worker(
        requests: &MemoryRouter,
        control: &MemoryRouter,
    ) -> (CancellationToken, tokio::task::JoinHandle<()>) {
        let (push, _pull) = memory_pipe();
        let shutdown = CancellationToken::new();
        let worker = Worker::new(
            worker_identity(0),
            requests.connect(&worker_identity(0)),
            control.connect(&worker_identity(0)),
            push,
            Arc::new(NullRegistry),
            Duration::from_millis(5),
            shutdown.clone(),
        );
        let handle = tokio::spawn(async move {
            let _ = worker.run().await;
        });
        (shutdown, handle)
    }

    async fn recv_from(
        router: &MemoryRouter,
        expected_identity: &str,
    ) -> Vec<u8> {
        let deadline = std::time::Duration::from_secs(5);
        tokio::time::timeout(deadline, async {
            loop {
                if let Some((identity, payload)) = router.try_recv().await.unwrap() {
                    assert_eq!(identity, expected_identity);
                    return payload;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("timed out waiting for worker message")
    }

    #[test]
    fn test_worker_identity_format() {
        assert_eq!(worker_identity(3), "Worker-3");
    }

    #[tokio::test]
    async fn announces_ready_and_executing_at_start() {
        let requests = MemoryRouter::new();
        let control = MemoryRouter::new();
        let (shutdown, handle) = spawn_worker(&requests, &control);

        assert_eq!(recv_from(&requests, "Worker-0").await, b"Ready");
        assert_eq!(recv_from(&control, "Worker-0").await, b"Executing");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn pause_and_resume_acked_even_when_idle() {
        let requests = MemoryRouter::new();
        let control = MemoryRouter::new();
        let (shutdown, handle) = spawn_worker(&requests, &control);
        recv_from(&requests, "Worker-0").await;
        recv_from(&control, "Worker-0").await;

        control.send_to("Worker-0", b"Pause".to_vec()).await.unwrap();
        assert_eq!(recv_from(&control, "Worker-0").await, b"Paused");

        control.send_to("Worker-0", b"Resume".to_vec()).await.unwrap();
        assert_eq!(recv_from(&control, "Worker-0").await, b"Resumed");

        shutdown.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_workflow_still_announces_done() {
        let requests = MemoryRouter::new();
        let control = MemoryRouter::new();
        let (shutdown, handle) = spawn_worker(&requests, &control);
        recv_from(&requests, "Worker-0").await;
        recv_from(&control, "Worker-0").await;

        requests
            .send_to("Worker-0", b"{ not json".to_vec())
            .await
            .unwrap();
        assert_eq!(recv_from(&requests, "Worker-0").await, b"Done");

        shutdown.cancel();
        handle.await.unwrap();
    }
}
