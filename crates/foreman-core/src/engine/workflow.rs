//! Runtime workflow state: the validated step graph a worker executes.
//!
//! Construction validates every step against the app registry and the
//! structural invariants (unique step names, argument shape, start step
//! present). Updates stage the replacement step set in full and swap only
//! on success, so a rejected definition never corrupts prior state.

use std::collections::HashMap;

use foreman_types::error::DefinitionError;
use foreman_types::event::{ActionSender, WorkflowSender};
use foreman_types::workflow::{
    Argument, NextStepEdge, StepDefinition, StepOutput, WorkflowDefinition,
};
use serde_json::Value;
use uuid::Uuid;

use super::registry::AppRegistry;

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// A validated step plus its per-run execution state.
#[derive(Debug, Clone)]
pub struct Step {
    pub name: String,
    pub uid: String,
    pub app: String,
    pub device: String,
    pub action: String,
    pub inputs: Vec<Argument>,
    pub next: Vec<NextStepEdge>,
    pub risk: f64,
    pub trigger: bool,
    /// Fresh uid assigned each time the step executes.
    pub execution_uid: String,
    /// Recorded outcome of the most recent execution.
    pub output: Option<StepOutput>,
}

impl Step {
    fn from_definition(
        definition: StepDefinition,
        registry: &dyn AppRegistry,
    ) -> Result<Self, DefinitionError> {
        registry.validate_action(&definition.app, &definition.action)?;
        for argument in &definition.inputs {
            argument
                .validate()
                .map_err(|e| DefinitionError::InvalidInput(e.to_string()))?;
        }
        Ok(Self {
            name: definition.name,
            uid: definition.uid,
            app: definition.app,
            device: definition.device,
            action: definition.action,
            inputs: definition.inputs,
            next: definition.next,
            risk: definition.risk.max(0.0),
            trigger: definition.trigger,
            execution_uid: String::new(),
            output: None,
        })
    }

    /// Assign a fresh execution uid and clear the previous outcome.
    pub fn begin_execution(&mut self) {
        self.execution_uid = Uuid::now_v7().to_string();
        self.output = None;
    }

    /// Select the next step name: the target of the first edge whose
    /// condition holds against the accumulator.
    pub fn get_next_step(
        &self,
        accumulator: &HashMap<String, Value>,
        source_status: &str,
    ) -> Option<&str> {
        self.next
            .iter()
            .find(|edge| edge.condition.evaluate(accumulator, source_status))
            .map(|edge| edge.name.as_str())
    }

    /// Sender identity for action-kind events emitted by this step.
    pub fn action_sender(&self, workflow_execution_uid: &str) -> ActionSender {
        ActionSender {
            name: self.name.clone(),
            uid: self.uid.clone(),
            workflow_execution_uid: workflow_execution_uid.to_string(),
            execution_uid: self.execution_uid.clone(),
            app_name: self.app.clone(),
            action_name: self.action.clone(),
            device_id: self.device.clone(),
            arguments: self.inputs.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// The runtime workflow a worker owns for one execution.
#[derive(Debug)]
pub struct Workflow {
    pub uid: String,
    pub name: String,
    pub execution_uid: String,
    pub start: String,
    pub steps: HashMap<String, Step>,
    /// Risk accrued from failed steps, in `[0.0, 1.0]`.
    pub accumulated_risk: f64,
    total_risk: f64,
}

impl Workflow {
    /// Build a runtime workflow from a submission.
    ///
    /// Strips `start_arguments` from the envelope and returns them
    /// separately; `uid` and `execution_uid` are re-applied verbatim.
    pub fn from_definition(
        definition: WorkflowDefinition,
        registry: &dyn AppRegistry,
    ) -> Result<(Self, Vec<Argument>), DefinitionError> {
        let mut workflow = Self {
            uid: definition.uid,
            name: definition.name,
            execution_uid: definition.execution_uid,
            start: definition.start,
            steps: HashMap::new(),
            accumulated_risk: 0.0,
            total_risk: 0.0,
        };
        workflow.apply_steps(definition.steps, registry)?;
        Ok((workflow, definition.start_arguments))
    }

    /// Replace the step set from new definitions.
    ///
    /// The replacement set is staged in full before the swap: on any
    /// validation failure the current steps remain untouched.
    pub fn apply_steps(
        &mut self,
        definitions: Vec<StepDefinition>,
        registry: &dyn AppRegistry,
    ) -> Result<(), DefinitionError> {
        let mut staged = HashMap::with_capacity(definitions.len());
        for definition in definitions {
            let step = Step::from_definition(definition, registry)?;
            let name = step.name.clone();
            if staged.insert(name.clone(), step).is_some() {
                return Err(DefinitionError::DuplicateStep(name));
            }
        }
        if !staged.is_empty() && !staged.contains_key(&self.start) {
            return Err(DefinitionError::UnknownStart(self.start.clone()));
        }
        self.steps = staged;
        self.total_risk = self
            .steps
            .values()
            .map(|step| step.risk)
            .filter(|risk| *risk > 0.0)
            .sum();
        Ok(())
    }

    /// Accrue the normalized risk of a failed step.
    pub fn record_failure_risk(&mut self, step_risk: f64) {
        if self.total_risk > 0.0 {
            self.accumulated_risk += step_risk / self.total_risk;
        }
    }

    /// Sum of positive step risks, the normalization denominator.
    pub fn total_risk(&self) -> f64 {
        self.total_risk
    }

    /// Sender identity for workflow-kind events.
    pub fn workflow_sender(&self) -> WorkflowSender {
        WorkflowSender {
            name: self.name.clone(),
            uid: self.uid.clone(),
            workflow_execution_uid: self.execution_uid.clone(),
        }
    }
}

/// Validate a submission without building the runtime workflow.
///
/// The dispatcher runs this at submission time so definition errors are
/// surfaced to the submitter before anything is queued.
pub fn validate_definition(
    definition: &WorkflowDefinition,
    registry: &dyn AppRegistry,
) -> Result<(), DefinitionError> {
    let mut seen = std::collections::HashSet::new();
    for step in &definition.steps {
        registry.validate_action(&step.app, &step.action)?;
        for argument in &step.inputs {
            argument
                .validate()
                .map_err(|e| DefinitionError::InvalidInput(e.to_string()))?;
        }
        if !seen.insert(step.name.as_str()) {
            return Err(DefinitionError::DuplicateStep(step.name.clone()));
        }
    }
    if !definition.steps.is_empty() && !seen.contains(definition.start.as_str()) {
        return Err(DefinitionError::UnknownStart(definition.start.clone()));
    }
    for argument in &definition.start_arguments {
        argument
            .validate()
            .map_err(|e| DefinitionError::InvalidInput(e.to_string()))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::registry::{ActionError, ActionFuture, AppInstance};
    use foreman_types::workflow::{EdgeCondition, STATUS_FAILURE, STATUS_SUCCESS};
    use serde_json::{Map, json};

    /// Registry that accepts only the `utility` app with `echo`/`fail`.
    struct UtilityOnly;

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

    impl AppRegistry for UtilityOnly {
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
            self.validate_action(app, "echo")?;
            Ok(Box::new(NullInstance))
        }
    }

    fn step_def(name: &str, action: &str, next: Vec<NextStepEdge>) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            uid: format!("{name}-uid"),
            app: "utility".to_string(),
            device: "local".to_string(),
            action: action.to_string(),
            inputs: vec![],
            next,
            risk: 0.0,
            trigger: false,
        }
    }

    fn definition(steps: Vec<StepDefinition>, start: &str) -> WorkflowDefinition {
        WorkflowDefinition {
            uid: "wf-uid".to_string(),
            execution_uid: "exec-uid".to_string(),
            name: "test".to_string(),
            start: start.to_string(),
            start_arguments: vec![],
            steps,
        }
    }

    #[test]
    fn test_from_definition_applies_identities() {
        let def = definition(vec![step_def("a", "echo", vec![])], "a");
        let (workflow, start_args) = Workflow::from_definition(def, &UtilityOnly).unwrap();
        assert_eq!(workflow.uid, "wf-uid");
        assert_eq!(workflow.execution_uid, "exec-uid");
        assert!(start_args.is_empty());
        assert!(workflow.steps.contains_key("a"));
    }

    #[test]
    fn test_unknown_app_rejected() {
        let mut bad = step_def("a", "echo", vec![]);
        bad.app = "ghost-app".to_string();
        let result = Workflow::from_definition(definition(vec![bad], "a"), &UtilityOnly);
        assert!(matches!(result, Err(DefinitionError::UnknownApp(app)) if app == "ghost-app"));
    }

    #[test]
    fn test_unknown_action_rejected() {
        let bad = step_def("a", "teleport", vec![]);
        let result = Workflow::from_definition(definition(vec![bad], "a"), &UtilityOnly);
        assert!(matches!(
            result,
            Err(DefinitionError::UnknownAppAction { .. })
        ));
    }

    #[test]
    fn test_unknown_start_rejected() {
        let result =
            Workflow::from_definition(definition(vec![step_def("a", "echo", vec![])], "ghost"), &UtilityOnly);
        assert!(matches!(result, Err(DefinitionError::UnknownStart(_))));
    }

    #[test]
    fn test_empty_workflow_allows_any_start() {
        let (workflow, _) =
            Workflow::from_definition(definition(vec![], "anything"), &UtilityOnly).unwrap();
        assert!(workflow.steps.is_empty());
    }

    #[test]
    fn test_staged_swap_preserves_prior_steps_on_rejection() {
        let def = definition(vec![step_def("a", "echo", vec![])], "a");
        let (mut workflow, _) = Workflow::from_definition(def, &UtilityOnly).unwrap();

        let mut bad = step_def("a", "echo", vec![]);
        bad.app = "ghost-app".to_string();
        let result = workflow.apply_steps(vec![bad, step_def("b", "echo", vec![])], &UtilityOnly);

        assert!(result.is_err());
        // prior graph untouched: still one validated step
        assert_eq!(workflow.steps.len(), 1);
        assert_eq!(workflow.steps["a"].action, "echo");
    }

    #[test]
    fn test_total_risk_sums_positive_weights() {
        let mut a = step_def("a", "echo", vec![]);
        a.risk = 1.5;
        let mut b = step_def("b", "echo", vec![]);
        b.risk = 0.0;
        let mut c = step_def("c", "fail", vec![]);
        c.risk = 0.5;
        let (mut workflow, _) =
            Workflow::from_definition(definition(vec![a, b, c], "a"), &UtilityOnly).unwrap();
        assert_eq!(workflow.total_risk(), 2.0);

        workflow.record_failure_risk(0.5);
        assert!((workflow.accumulated_risk - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_zero_total_risk_never_divides() {
        let (mut workflow, _) =
            Workflow::from_definition(definition(vec![step_def("a", "echo", vec![])], "a"), &UtilityOnly)
                .unwrap();
        workflow.record_failure_risk(0.0);
        assert_eq!(workflow.accumulated_risk, 0.0);
    }

    #[test]
    fn test_get_next_step_first_matching_edge_wins() {
        let edges = vec![
            NextStepEdge {
                uid: "e1".to_string(),
                name: "on-failure".to_string(),
                condition: EdgeCondition::StatusIs {
                    status: STATUS_FAILURE.to_string(),
                },
            },
            NextStepEdge {
                uid: "e2".to_string(),
                name: "on-success".to_string(),
                condition: EdgeCondition::Always,
            },
        ];
        let (workflow, _) = Workflow::from_definition(
            definition(
                vec![
                    step_def("a", "echo", edges),
                    step_def("on-failure", "echo", vec![]),
                    step_def("on-success", "echo", vec![]),
                ],
                "a",
            ),
            &UtilityOnly,
        )
        .unwrap();

        let accumulator = HashMap::new();
        let step = &workflow.steps["a"];
        assert_eq!(
            step.get_next_step(&accumulator, STATUS_FAILURE),
            Some("on-failure")
        );
        assert_eq!(
            step.get_next_step(&accumulator, STATUS_SUCCESS),
            Some("on-success")
        );
    }

    #[test]
    fn test_begin_execution_refreshes_uid() {
        let (mut workflow, _) =
            Workflow::from_definition(definition(vec![step_def("a", "echo", vec![])], "a"), &UtilityOnly)
                .unwrap();
        let step = workflow.steps.get_mut("a").unwrap();
        step.begin_execution();
        let first = step.execution_uid.clone();
        step.output = Some(StepOutput::success(json!(1)));
        step.begin_execution();
        assert_ne!(step.execution_uid, first);
        assert!(step.output.is_none());
    }

    #[test]
    fn test_validate_definition_matches_construction() {
        let good = definition(vec![step_def("a", "echo", vec![])], "a");
        assert!(validate_definition(&good, &UtilityOnly).is_ok());

        let mut dup = definition(
            vec![step_def("a", "echo", vec![]), step_def("a", "echo", vec![])],
            "a",
        );
        assert!(matches!(
            validate_definition(&dup, &UtilityOnly),
            Err(DefinitionError::DuplicateStep(_))
        ));

        dup.steps.pop();
        dup.start_arguments = vec![Argument {
            name: "x".to_string(),
            ..Default::default()
        }];
        assert!(matches!(
            validate_definition(&dup, &UtilityOnly),
            Err(DefinitionError::InvalidInput(_))
        ));
    }
}
