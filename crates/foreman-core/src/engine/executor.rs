//! The step-walking state machine.
//!
//! One iteration of the walk: announce the step, observe the pause flag
//! (the sole pause observation point -- pauses apply between steps, never
//! mid-step), acquire the `(app, device)` instance, overlay start
//! arguments on the first step, wait for trigger data if the step asks
//! for it, render inputs against the accumulator, invoke the action,
//! record the output, and select the next step by evaluating edges in
//! order. Step errors accrue normalized risk and never abort the walk.
//!
//! On termination every app instance is shut down (errors logged, not
//! propagated) and the full accumulator is emitted with the shutdown
//! event.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use foreman_types::event::{Event, EventId, GeneralSender};
use foreman_types::protocol::TriggerPayload;
use foreman_types::workflow::{
    Argument, DATA_IN_INPUT, STATUS_FAILURE, STATUS_SUCCESS, StepOutput,
};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use super::context::ExecutionControls;
use super::registry::{ActionError, AppInstance, AppRegistry};
use super::workflow::Workflow;

// ---------------------------------------------------------------------------
// EventSink
// ---------------------------------------------------------------------------

/// Where the executor emits its events.
///
/// The worker implements this over the results channel; tests collect
/// events in memory.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event) -> impl Future<Output = ()> + Send;
}

// ---------------------------------------------------------------------------
// WorkflowExecutor
// ---------------------------------------------------------------------------

/// Interprets a workflow graph to completion.
pub struct WorkflowExecutor<S: EventSink> {
    registry: Arc<dyn AppRegistry>,
    sink: S,
}

impl<S: EventSink> WorkflowExecutor<S> {
    pub fn new(registry: Arc<dyn AppRegistry>, sink: S) -> Self {
        Self { registry, sink }
    }

    /// Execute the workflow to completion and return its accumulator.
    ///
    /// Cancellation is observed at the pause and trigger suspension
    /// points; a cancelled walk still shuts its app instances down and
    /// emits the shutdown event.
    pub async fn execute(
        &self,
        workflow: &mut Workflow,
        controls: &ExecutionControls,
        start_arguments: Vec<Argument>,
        cancel: &CancellationToken,
    ) -> HashMap<String, Value> {
        let wf_sender = workflow.workflow_sender();
        let execution_uid = workflow.execution_uid.clone();
        tracing::info!(
            workflow = workflow.name.as_str(),
            execution_uid = execution_uid.as_str(),
            "executing workflow"
        );
        self.sink
            .emit(Event::workflow(
                EventId::WorkflowExecutionStart,
                wf_sender.clone(),
                None,
            ))
            .await;

        let mut instances: HashMap<(String, String), Box<dyn AppInstance>> = HashMap::new();
        let mut accumulator: HashMap<String, Value> = HashMap::new();
        let mut pause_signal = controls.pause_signal();
        let mut start_arguments = Some(start_arguments);
        let mut current = workflow.start.clone();

        loop {
            if !workflow.steps.contains_key(&current) {
                break;
            }
            self.sink
                .emit(Event::workflow(
                    EventId::NextStepFound,
                    wf_sender.clone(),
                    None,
                ))
                .await;

            // Sole pause observation point.
            if *pause_signal.borrow() {
                self.sink
                    .emit(Event::workflow(
                        EventId::WorkflowPaused,
                        wf_sender.clone(),
                        None,
                    ))
                    .await;
                let resumed = tokio::select! {
                    _ = cancel.cancelled() => false,
                    changed = pause_signal.wait_for(|paused| !*paused) => changed.is_ok(),
                };
                if !resumed {
                    break;
                }
                self.sink
                    .emit(Event::workflow(
                        EventId::WorkflowResumed,
                        wf_sender.clone(),
                        None,
                    ))
                    .await;
            }
            if cancel.is_cancelled() {
                break;
            }

            let (failed, step_risk, next) = {
                let Some(step) = workflow.steps.get_mut(&current) else {
                    break;
                };
                step.begin_execution();
                tracing::debug!(
                    step = step.name.as_str(),
                    execution_uid = execution_uid.as_str(),
                    "executing step"
                );

                // Acquire the (app, device) instance; at most one per pair
                // per run.
                let key = (step.app.clone(), step.device.clone());
                let mut step_error: Option<ActionError> = None;
                if !instances.contains_key(&key) {
                    match self.registry.create_instance(&step.app, &step.device) {
                        Ok(instance) => {
                            instances.insert(key.clone(), instance);
                            self.sink
                                .emit(Event::workflow(
                                    EventId::AppInstanceCreated,
                                    wf_sender.clone(),
                                    None,
                                ))
                                .await;
                        }
                        Err(e) => step_error = Some(ActionError::Failed(e.to_string())),
                    }
                }

                // Overlay start arguments onto the very first step.
                if let Some(overlay) = start_arguments.take() {
                    if !overlay.is_empty() {
                        if overlay.iter().all(|arg| arg.validate().is_ok()) {
                            apply_overrides(&mut step.inputs, overlay);
                            self.sink
                                .emit(Event::workflow(
                                    EventId::WorkflowInputValidated,
                                    wf_sender.clone(),
                                    None,
                                ))
                                .await;
                        } else {
                            tracing::warn!(
                                step = step.name.as_str(),
                                "invalid start arguments, keeping original inputs"
                            );
                            self.sink
                                .emit(Event::workflow(
                                    EventId::WorkflowInputInvalid,
                                    wf_sender.clone(),
                                    None,
                                ))
                                .await;
                        }
                    }
                }

                self.sink
                    .emit(Event::action(
                        EventId::StepStarted,
                        step.action_sender(&execution_uid),
                        None,
                    ))
                    .await;

                // Suspend on the incoming-data slot when the step asks for
                // trigger data.
                let mut data_in = None;
                if step.trigger {
                    let mut slot = controls.begin_trigger_wait();
                    self.sink
                        .emit(Event::action(
                            EventId::TriggerAwaitingData,
                            step.action_sender(&execution_uid),
                            None,
                        ))
                        .await;
                    let payload = tokio::select! {
                        _ = cancel.cancelled() => None,
                        payload = slot.recv() => payload,
                    };
                    controls.end_trigger_wait();
                    let Some(TriggerPayload {
                        data_in: payload_data,
                        arguments,
                    }) = payload
                    else {
                        break;
                    };
                    if !arguments.is_empty() {
                        apply_overrides(&mut step.inputs, arguments);
                    }
                    let data = serde_json::to_string(&payload_data)
                        .unwrap_or_else(|_| "null".to_string());
                    self.sink
                        .emit(Event::action(
                            EventId::TriggerTaken,
                            step.action_sender(&execution_uid),
                            Some(data),
                        ))
                        .await;
                    data_in = Some(payload_data);
                }

                // Render inputs against the accumulator.
                let mut rendered = Map::new();
                for argument in &step.inputs {
                    match argument.resolve(&accumulator) {
                        Ok(value) => {
                            rendered.insert(argument.name.clone(), value);
                        }
                        Err(e) => {
                            if step_error.is_none() {
                                step_error = Some(ActionError::InvalidInputs(e.to_string()));
                            }
                            break;
                        }
                    }
                }
                if let Some(data_in) = data_in {
                    rendered.insert(DATA_IN_INPUT.to_string(), data_in);
                }

                // Invoke the action.
                let result = match step_error {
                    Some(e) => Err(e),
                    None => match instances.get_mut(&key) {
                        Some(instance) => instance.invoke(&step.action, &rendered).await,
                        None => Err(ActionError::Failed(format!(
                            "no instance for app '{}' on device '{}'",
                            step.app, step.device
                        ))),
                    },
                };

                let failed = match result {
                    Ok(value) => {
                        step.output = Some(StepOutput::success(value));
                        false
                    }
                    Err(e) => {
                        tracing::debug!(
                            step = step.name.as_str(),
                            error = %e,
                            "step executed with error"
                        );
                        step.output = Some(StepOutput::failure(json!({"error": e.to_string()})));
                        true
                    }
                };

                let payload = json!({
                    "app": step.app,
                    "action": step.action,
                    "name": step.name,
                    "input": Value::Object(rendered),
                    "result": step.output.as_ref().map(StepOutput::as_json),
                    "execution_uid": step.execution_uid,
                });
                let event_id = if failed {
                    EventId::StepExecutionError
                } else {
                    EventId::StepExecutionSuccess
                };
                self.sink
                    .emit(Event::workflow(
                        event_id,
                        wf_sender.clone(),
                        Some(payload.to_string()),
                    ))
                    .await;

                // Record the output for downstream steps, success or not.
                let result_value = step
                    .output
                    .as_ref()
                    .map(|output| output.result.clone())
                    .unwrap_or(Value::Null);
                accumulator.insert(step.name.clone(), result_value);

                // Evaluate next-step edges in order; first match wins.
                let status = if failed { STATUS_FAILURE } else { STATUS_SUCCESS };
                let mut next = None;
                for edge in &step.next {
                    let sender = GeneralSender {
                        uid: edge.uid.clone(),
                        workflow_execution_uid: execution_uid.clone(),
                        app_name: None,
                    };
                    if edge.condition.evaluate(&accumulator, status) {
                        self.sink
                            .emit(Event::general(EventId::BranchTaken, sender))
                            .await;
                        next = Some(edge.name.clone());
                        break;
                    }
                    self.sink
                        .emit(Event::general(EventId::BranchNotTaken, sender))
                        .await;
                }

                (failed, step.risk, next)
            };

            if failed {
                workflow.record_failure_risk(step_risk);
            }
            match next {
                Some(name) => current = name,
                // Termination: also covers an edge naming an unknown step.
                None => break,
            }
        }

        self.shutdown(workflow, instances, &accumulator).await;
        accumulator
    }

    /// Shut down app instances and emit the shutdown event with the full
    /// accumulator.
    async fn shutdown(
        &self,
        workflow: &Workflow,
        instances: HashMap<(String, String), Box<dyn AppInstance>>,
        accumulator: &HashMap<String, Value>,
    ) {
        for ((app, device), mut instance) in instances {
            match instance.shutdown() {
                Ok(()) => {
                    tracing::debug!(app = app.as_str(), device = device.as_str(), "app instance shut down");
                }
                Err(e) => {
                    tracing::error!(
                        app = app.as_str(),
                        device = device.as_str(),
                        error = %e,
                        "error shutting down app instance"
                    );
                }
            }
        }

        let mut sanitized = Map::new();
        for (name, value) in accumulator {
            match serde_json::to_string(value) {
                Ok(_) => {
                    sanitized.insert(name.clone(), value.clone());
                }
                Err(_) => {
                    tracing::error!(step = name.as_str(), "step result cannot be recorded as JSON");
                    sanitized.insert(
                        name.clone(),
                        Value::String("error: could not convert to JSON".to_string()),
                    );
                }
            }
        }
        let data = match serde_json::to_string(&Value::Object(sanitized)) {
            Ok(text) => text,
            Err(_) => format!("{accumulator:?}"),
        };
        self.sink
            .emit(Event::workflow(
                EventId::WorkflowShutdown,
                workflow.workflow_sender(),
                Some(data),
            ))
            .await;
        tracing::info!(
            workflow = workflow.name.as_str(),
            execution_uid = workflow.execution_uid.as_str(),
            accumulated_risk = workflow.accumulated_risk,
            "workflow completed"
        );
    }
}

/// Replace same-named input bindings, appending bindings for new names.
fn apply_overrides(inputs: &mut Vec<Argument>, overrides: Vec<Argument>) {
    for incoming in overrides {
        match inputs.iter_mut().find(|arg| arg.name == incoming.name) {
            Some(existing) => *existing = incoming,
            None => inputs.push(incoming),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::ActionFuture;
    use foreman_types::error::DefinitionError;
    use foreman_types::workflow::{NextStepEdge, StepDefinition, WorkflowDefinition};
    use std::sync::Mutex;

    /// Sink that records every emitted event.
    #[derive(Clone, Default)]
    struct Collector(Arc<Mutex<Vec<Event>>>);

    impl Collector {
        fn ids(&self) -> Vec<EventId> {
            self.0.lock().unwrap().iter().map(|e| e.id).collect()
        }
    }

    impl EventSink for Collector {
        async fn emit(&self, event: Event) {
            self.0.lock().unwrap().push(event);
        }
    }

    /// Registry whose `echo` action returns its inputs and whose `fail`
    /// action always errors.
    struct EchoRegistry;

    struct EchoInstance;

    impl AppInstance for EchoInstance {
        fn invoke<'a>(
            &'a mut self,
            action: &'a str,
            inputs: &'a Map<String, Value>,
        ) -> ActionFuture<'a> {
            Box::pin(async move {
                match action {
                    "echo" => Ok(Value::Object(inputs.clone())),
                    "fail" => Err(ActionError::Failed("intentional".to_string())),
                    other => Err(ActionError::Failed(format!("unknown action {other}"))),
                }
            })
        }

        fn shutdown(&mut self) -> Result<(), ActionError> {
            Ok(())
        }
    }

    impl AppRegistry for EchoRegistry {
        fn validate_action(&self, app: &str, action: &str) -> Result<(), DefinitionError> {
            if app != "utility" {
                return Err(DefinitionError::UnknownApp(app.to_string()));
            }
            if !matches!(action, "echo" | "fail") {
                return Err(DefinitionError::UnknownAppAction {
                    app: app.to_string(),
                    action: action.to_string(),
                });
            }
            Ok(())
        }

        fn create_instance(
            &self,
            app: &str,
            _device: &str,
        ) -> Result<Box<dyn AppInstance>, DefinitionError> {
            if app == "utility" {
                Ok(Box::new(EchoInstance))
            } else {
                Err(DefinitionError::UnknownApp(app.to_string()))
            }
        }
    }

    fn step(name: &str, action: &str, next_name: Option<&str>, risk: f64) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            uid: format!("{name}-uid"),
            app: "utility".to_string(),
            device: "local".to_string(),
            action: action.to_string(),
            inputs: vec![],
            next: next_name
                .map(|n| {
                    vec![NextStepEdge {
                        uid: format!("{name}-edge"),
                        name: n.to_string(),
                        condition: Default::default(),
                    }]
                })
                .unwrap_or_default(),
            risk,
            trigger: false,
        }
    }

    fn build(steps: Vec<StepDefinition>, start: &str) -> Workflow {
        let definition = WorkflowDefinition {
            uid: "wf".to_string(),
            execution_uid: "exec".to_string(),
            name: "test".to_string(),
            start: start.to_string(),
            start_arguments: vec![],
            steps,
        };
        Workflow::from_definition(definition, &EchoRegistry).unwrap().0
    }

    async fn run(workflow: &mut Workflow) -> (Collector, HashMap<String, Value>) {
        let sink = Collector::default();
        let executor = WorkflowExecutor::new(Arc::new(EchoRegistry), sink.clone());
        let controls = ExecutionControls::new();
        let accumulator = executor
            .execute(workflow, &controls, vec![], &CancellationToken::new())
            .await;
        (sink, accumulator)
    }

    #[tokio::test]
    async fn linear_two_step_event_order() {
        let mut workflow = build(
            vec![step("a", "echo", Some("b"), 0.0), step("b", "echo", None, 0.0)],
            "a",
        );
        let (sink, accumulator) = run(&mut workflow).await;

        let workflow_ids: Vec<EventId> = sink
            .ids()
            .into_iter()
            .filter(|id| !matches!(id, EventId::StepStarted | EventId::BranchTaken))
            .collect();
        assert_eq!(
            workflow_ids,
            vec![
                EventId::WorkflowExecutionStart,
                EventId::NextStepFound,
                EventId::AppInstanceCreated,
                EventId::StepExecutionSuccess,
                EventId::NextStepFound,
                EventId::StepExecutionSuccess,
                EventId::WorkflowShutdown,
            ]
        );
        assert!(accumulator.contains_key("a"));
        assert!(accumulator.contains_key("b"));
    }

    #[tokio::test]
    async fn single_instance_per_app_device_pair() {
        let mut workflow = build(
            vec![step("a", "echo", Some("b"), 0.0), step("b", "echo", None, 0.0)],
            "a",
        );
        let (sink, _) = run(&mut workflow).await;
        let created = sink
            .ids()
            .into_iter()
            .filter(|id| *id == EventId::AppInstanceCreated)
            .count();
        assert_eq!(created, 1);
    }

    #[tokio::test]
    async fn failed_step_accrues_risk_and_continues() {
        let mut workflow = build(
            vec![
                step("a", "echo", Some("b"), 1.0),
                step("b", "fail", Some("c"), 1.0),
                step("c", "echo", None, 1.0),
            ],
            "a",
        );
        let (sink, accumulator) = run(&mut workflow).await;

        let ids = sink.ids();
        let error_pos = ids
            .iter()
            .position(|id| *id == EventId::StepExecutionError)
            .unwrap();
        let later_success = ids[error_pos..]
            .iter()
            .any(|id| *id == EventId::StepExecutionSuccess);
        assert!(later_success, "execution continues past a failed step");
        assert!((workflow.accumulated_risk - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(accumulator.len(), 3);
    }

    #[tokio::test]
    async fn unknown_next_step_terminates_without_error_event() {
        let mut workflow = build(vec![step("a", "echo", Some("ghost"), 0.0)], "a");
        let (sink, accumulator) = run(&mut workflow).await;

        let ids = sink.ids();
        assert_eq!(*ids.last().unwrap(), EventId::WorkflowShutdown);
        assert!(!ids.contains(&EventId::StepExecutionError));
        assert_eq!(accumulator.len(), 1);
    }

    #[tokio::test]
    async fn empty_workflow_emits_start_and_shutdown_only() {
        let mut workflow = build(vec![], "start");
        let (sink, accumulator) = run(&mut workflow).await;
        assert_eq!(
            sink.ids(),
            vec![EventId::WorkflowExecutionStart, EventId::WorkflowShutdown]
        );
        assert!(accumulator.is_empty());
    }

    #[tokio::test]
    async fn start_arguments_overlay_first_step() {
        let mut workflow = build(vec![step("a", "echo", None, 0.0)], "a");
        let sink = Collector::default();
        let executor = WorkflowExecutor::new(Arc::new(EchoRegistry), sink.clone());
        let controls = ExecutionControls::new();
        let accumulator = executor
            .execute(
                &mut workflow,
                &controls,
                vec![Argument::literal("x", json!("42"))],
                &CancellationToken::new(),
            )
            .await;

        assert!(sink.ids().contains(&EventId::WorkflowInputValidated));
        assert_eq!(accumulator["a"], json!({"x": "42"}));
    }

    #[tokio::test]
    async fn invalid_start_arguments_keep_original_inputs() {
        let mut a = step("a", "echo", None, 0.0);
        a.inputs = vec![Argument::literal("x", json!("original"))];
        let mut workflow = build(vec![a], "a");
        let sink = Collector::default();
        let executor = WorkflowExecutor::new(Arc::new(EchoRegistry), sink.clone());
        let controls = ExecutionControls::new();
        let bad = Argument {
            name: "x".to_string(),
            ..Default::default()
        };
        let accumulator = executor
            .execute(&mut workflow, &controls, vec![bad], &CancellationToken::new())
            .await;

        assert!(sink.ids().contains(&EventId::WorkflowInputInvalid));
        assert_eq!(accumulator["a"], json!({"x": "original"}));
    }

    #[tokio::test]
    async fn reference_arguments_resolve_from_accumulator() {
        let mut b = step("b", "echo", None, 0.0);
        b.inputs = vec![Argument {
            name: "carried".to_string(),
            selection: Some("a.x".to_string()),
            ..Default::default()
        }];
        let mut a = step("a", "echo", Some("b"), 0.0);
        a.inputs = vec![Argument::literal("x", json!("payload"))];
        let mut workflow = build(vec![a, b], "a");
        let (_, accumulator) = run(&mut workflow).await;
        assert_eq!(accumulator["b"], json!({"carried": "payload"}));
    }

    #[tokio::test]
    async fn branch_not_taken_emitted_for_skipped_edges() {
        let mut a = step("a", "echo", None, 0.0);
        a.next = vec![
            NextStepEdge {
                uid: "edge-1".to_string(),
                name: "b".to_string(),
                condition: foreman_types::workflow::EdgeCondition::StatusIs {
                    status: STATUS_FAILURE.to_string(),
                },
            },
            NextStepEdge {
                uid: "edge-2".to_string(),
                name: "b".to_string(),
                condition: Default::default(),
            },
        ];
        let mut workflow = build(vec![a, step("b", "echo", None, 0.0)], "a");
        let (sink, _) = run(&mut workflow).await;
        let ids = sink.ids();
        assert!(ids.contains(&EventId::BranchNotTaken));
        assert!(ids.contains(&EventId::BranchTaken));
    }
}
