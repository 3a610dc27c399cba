//! Workflow domain types for Foreman.
//!
//! Defines the submission JSON shape (`WorkflowDefinition`), the step graph
//! (`StepDefinition`, `NextStepEdge`, `EdgeCondition`), step input bindings
//! (`Argument`) and step outputs (`StepOutput`). These types are the wire
//! contract between the controller and its workers; runtime state lives in
//! `foreman-core`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Status string recorded for a step whose action returned normally.
pub const STATUS_SUCCESS: &str = "Success";

/// Status string recorded for a step whose action raised an error.
pub const STATUS_FAILURE: &str = "Failure";

/// Reserved input name under which trigger data is exposed to an action.
pub const DATA_IN_INPUT: &str = "data_in";

fn new_uid() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Workflow Definition (submission JSON)
// ---------------------------------------------------------------------------

/// A workflow as submitted by a client.
///
/// The full envelope carries `uid`, `execution_uid` and `start_arguments`
/// alongside the graph itself; the worker strips those three before
/// constructing its runtime workflow and re-applies the two identifiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Stable workflow identity. Generated when omitted.
    #[serde(default = "new_uid")]
    pub uid: String,
    /// Per-run identity, assigned by the dispatcher at submission.
    #[serde(default)]
    pub execution_uid: String,
    /// Human-readable workflow name.
    pub name: String,
    /// Name of the starting step.
    pub start: String,
    /// Optional argument overlay for the starting step.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_arguments: Vec<Argument>,
    /// The step graph.
    pub steps: Vec<StepDefinition>,
}

// ---------------------------------------------------------------------------
// Step Definition
// ---------------------------------------------------------------------------

/// A node in the workflow graph: one action on one app against one device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step name, unique within a workflow.
    pub name: String,
    /// Stable step identity. Generated when omitted.
    #[serde(default = "new_uid")]
    pub uid: String,
    /// Target application.
    pub app: String,
    /// Target device within the application.
    #[serde(default)]
    pub device: String,
    /// Action to invoke on the application.
    pub action: String,
    /// Input bindings, resolved against the accumulator before execution.
    #[serde(default)]
    pub inputs: Vec<Argument>,
    /// Ordered next-step edges; the first whose condition holds is taken.
    #[serde(default)]
    pub next: Vec<NextStepEdge>,
    /// Risk weight contributed on failure.
    #[serde(default)]
    pub risk: f64,
    /// Whether the step suspends awaiting external trigger data before
    /// invoking its action.
    #[serde(default)]
    pub trigger: bool,
}

/// An edge to a candidate next step, guarded by a condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStepEdge {
    /// Edge identity (used as the sender of branch events).
    #[serde(default = "new_uid")]
    pub uid: String,
    /// Target step name.
    pub name: String,
    /// Condition evaluated against the accumulator.
    #[serde(default)]
    pub condition: EdgeCondition,
}

/// Condition guarding a next-step edge.
///
/// Evaluated against the accumulator and the status of the step that just
/// completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Unconditional edge.
    #[default]
    Always,
    /// Matches when the source step completed with the given status.
    StatusIs { status: String },
    /// Matches when a completed step's recorded output equals a value.
    OutputEquals { step: String, value: Value },
}

impl EdgeCondition {
    /// Evaluate this condition.
    ///
    /// `source_status` is the status of the step the edge originates from,
    /// which has always completed by the time edges are evaluated.
    pub fn evaluate(&self, accumulator: &HashMap<String, Value>, source_status: &str) -> bool {
        match self {
            EdgeCondition::Always => true,
            EdgeCondition::StatusIs { status } => status == source_status,
            EdgeCondition::OutputEquals { step, value } => {
                accumulator.get(step).is_some_and(|out| out == value)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Argument
// ---------------------------------------------------------------------------

/// A named input binding for a step. Exactly one value source is populated:
/// a literal `value`, a `reference` to a completed step's output, or a
/// `selection` path into such an output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    /// Literal value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    /// Name of a completed step whose whole output is bound.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    /// Dot-separated path; the first segment names a completed step, the
    /// remaining segments index into its output (object keys or array
    /// indices).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selection: Option<String>,
}

impl Argument {
    /// Convenience constructor for a literal argument.
    pub fn literal(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            reference: None,
            selection: None,
        }
    }

    /// Check the exactly-one-source invariant.
    pub fn validate(&self) -> Result<(), ResolveError> {
        if self.name.is_empty() {
            return Err(ResolveError::UnnamedArgument);
        }
        let populated = [
            self.value.is_some(),
            self.reference.is_some(),
            self.selection.is_some(),
        ]
        .iter()
        .filter(|p| **p)
        .count();
        if populated == 1 {
            Ok(())
        } else {
            Err(ResolveError::AmbiguousSource {
                name: self.name.clone(),
                populated,
            })
        }
    }

    /// Resolve this argument against the accumulator.
    pub fn resolve(&self, accumulator: &HashMap<String, Value>) -> Result<Value, ResolveError> {
        self.validate()?;
        if let Some(value) = &self.value {
            return Ok(value.clone());
        }
        if let Some(step) = &self.reference {
            return accumulator
                .get(step)
                .cloned()
                .ok_or_else(|| ResolveError::UnresolvedReference {
                    name: self.name.clone(),
                    step: step.clone(),
                });
        }
        // validate() guarantees a selection is present here
        let selection = self.selection.as_deref().unwrap_or_default();
        let mut segments = selection.split('.');
        let step = segments.next().unwrap_or_default();
        let mut current = accumulator
            .get(step)
            .ok_or_else(|| ResolveError::UnresolvedReference {
                name: self.name.clone(),
                step: step.to_string(),
            })?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(|idx| items.get(idx)),
                _ => None,
            }
            .ok_or_else(|| ResolveError::SelectionMiss {
                name: self.name.clone(),
                selection: selection.to_string(),
                segment: segment.to_string(),
            })?;
        }
        Ok(current.clone())
    }
}

/// Errors from argument validation and resolution.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("argument has no name")]
    UnnamedArgument,

    #[error("argument '{name}' must populate exactly one of value/reference/selection, found {populated}")]
    AmbiguousSource { name: String, populated: usize },

    #[error("argument '{name}' references step '{step}' which has not completed")]
    UnresolvedReference { name: String, step: String },

    #[error("argument '{name}' selection '{selection}' has no segment '{segment}'")]
    SelectionMiss {
        name: String,
        selection: String,
        segment: String,
    },
}

// ---------------------------------------------------------------------------
// Step Output
// ---------------------------------------------------------------------------

/// The recorded outcome of one step execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// `Success` or `Failure`.
    pub status: String,
    /// The action's result (or error description on failure). This is the
    /// value recorded in the accumulator under the step name.
    pub result: Value,
}

impl StepOutput {
    pub fn success(result: Value) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            result,
        }
    }

    pub fn failure(result: Value) -> Self {
        Self {
            status: STATUS_FAILURE.to_string(),
            result,
        }
    }

    /// JSON form carried in step event payloads.
    pub fn as_json(&self) -> Value {
        json!({ "status": self.status, "result": self.result })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
