//! The dispatch loop and control-channel multiplexer.
//!
//! Tracks idle workers, queues submitted workflows, routes each workflow
//! to an idle worker, and routes control messages (pause / resume /
//! trigger data) by workflow execution uid. Workflows dispatch in
//! submission order; workers are selected LIFO from the idle pool.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use foreman_types::error::DefinitionError;
use foreman_types::protocol::{ControlRequest, ReadySignal, TriggerPayload};
use foreman_types::workflow::{Argument, WorkflowDefinition};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::engine::registry::AppRegistry;
use crate::engine::workflow::validate_definition;
use crate::transport::RouterChannel;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a dispatched workflow is running.
#[derive(Debug, Clone)]
struct Route {
    worker: String,
    dispatched_at: DateTime<Utc>,
}

#[derive(Default)]
struct DispatchState {
    /// Workers that have announced readiness; popped LIFO.
    idle_workers: Vec<String>,
    /// Workflows awaiting a worker, in submission order.
    pending: VecDeque<WorkflowDefinition>,
    /// execution_uid -> worker, for control-message routing.
    routes: HashMap<String, Route>,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Controller-side workflow dispatcher.
pub struct Dispatcher<Q: RouterChannel, C: RouterChannel> {
    requests: Q,
    control: C,
    registry: Arc<dyn AppRegistry>,
    state: Mutex<DispatchState>,
    poll_interval: Duration,
    shutdown: CancellationToken,
}

impl<Q: RouterChannel, C: RouterChannel> Dispatcher<Q, C> {
    pub fn new(
        requests: Q,
        control: C,
        registry: Arc<dyn AppRegistry>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            requests,
            control,
            registry,
            state: Mutex::new(DispatchState::default()),
            poll_interval,
            shutdown: CancellationToken::new(),
        }
    }

    /// Enqueue a workflow for execution and return its fresh execution uid.
    ///
    /// Definition errors fail the submission here, before anything is
    /// queued or any event is emitted.
    pub fn submit(&self, mut definition: WorkflowDefinition) -> Result<String, DefinitionError> {
        validate_definition(&definition, self.registry.as_ref())?;
        let execution_uid = Uuid::now_v7().to_string();
        definition.execution_uid = execution_uid.clone();
        tracing::info!(
            workflow = definition.name.as_str(),
            execution_uid = execution_uid.as_str(),
            "workflow submitted"
        );
        if let Ok(mut state) = self.state.lock() {
            state.pending.push_back(definition);
        }
        Ok(execution_uid)
    }

    /// Ask the worker executing the workflow to pause it. Best-effort; a
    /// no-op when the execution is unknown or already terminated.
    pub async fn pause(&self, execution_uid: &str) {
        tracing::info!(execution_uid, "pausing workflow");
        self.send_control(execution_uid, ControlRequest::Pause).await;
    }

    /// Ask the worker executing the workflow to resume it.
    pub async fn resume(&self, execution_uid: &str) {
        tracing::info!(execution_uid, "resuming workflow");
        self.send_control(execution_uid, ControlRequest::Resume).await;
    }

    /// Deliver a trigger payload to a step currently awaiting data.
    pub async fn send_trigger_data(
        &self,
        execution_uid: &str,
        data_in: Value,
        arguments: Vec<Argument>,
    ) {
        self.send_control(
            execution_uid,
            ControlRequest::Trigger(TriggerPayload { data_in, arguments }),
        )
        .await;
    }

    async fn send_control(&self, execution_uid: &str, request: ControlRequest) {
        let route = self
            .state
            .lock()
            .ok()
            .and_then(|state| state.routes.get(execution_uid).cloned());
        let Some(route) = route else {
            tracing::debug!(execution_uid, "dropping control message for unknown execution");
            return;
        };
        let payload = match request.encode() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(execution_uid, error = %e, "failed to encode control message");
                return;
            }
        };
        if let Err(e) = self.control.send_to(&route.worker, payload).await {
            tracing::warn!(
                execution_uid,
                worker = route.worker.as_str(),
                error = %e,
                "failed to deliver control message"
            );
        }
    }

    /// Terminate the dispatch loop.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    /// Run the dispatch loop until stopped.
    ///
    /// While an idle worker and a pending workflow both exist, pop both
    /// and dispatch; otherwise poll the requests channel for readiness
    /// announcements and yield briefly on empty.
    pub async fn run(&self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let dispatch = self.state.lock().ok().and_then(|mut state| {
                if state.idle_workers.is_empty() || state.pending.is_empty() {
                    return None;
                }
                let definition = state.pending.pop_front()?;
                let worker = state.idle_workers.pop()?;
                state.routes.insert(
                    definition.execution_uid.clone(),
                    Route {
                        worker: worker.clone(),
                        dispatched_at: Utc::now(),
                    },
                );
                Some((worker, definition))
            });

            if let Some((worker, definition)) = dispatch {
                tracing::info!(
                    worker = worker.as_str(),
                    execution_uid = definition.execution_uid.as_str(),
                    "dispatching workflow"
                );
                match serde_json::to_vec(&definition) {
                    Ok(payload) => {
                        if let Err(e) = self.requests.send_to(&worker, payload).await {
                            tracing::warn!(worker = worker.as_str(), error = %e, "dispatch failed");
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize workflow for dispatch");
                    }
                }
                continue;
            }

            match self.requests.try_recv().await {
                Ok(Some((worker, message))) => match ReadySignal::from_bytes(&message) {
                    Some(ReadySignal::Ready) => {
                        tracing::debug!(worker = worker.as_str(), "worker ready");
                        if let Ok(mut state) = self.state.lock() {
                            state.idle_workers.push(worker);
                        }
                    }
                    Some(ReadySignal::Done) => {
                        if let Ok(mut state) = self.state.lock() {
                            state.routes.retain(|execution_uid, route| {
                                if route.worker == worker {
                                    let elapsed = Utc::now() - route.dispatched_at;
                                    tracing::info!(
                                        worker = worker.as_str(),
                                        execution_uid = execution_uid.as_str(),
                                        elapsed_ms = elapsed.num_milliseconds(),
                                        "workflow completed"
                                    );
                                    false
                                } else {
                                    true
                                }
                            });
                            state.idle_workers.push(worker);
                        }
                    }
                    None => {
                        tracing::warn!(
                            worker = worker.as_str(),
                            "unexpected message on requests channel"
                        );
                    }
                },
                Ok(None) => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "requests channel receive failed");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!("dispatch loop stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
