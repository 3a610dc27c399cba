//! Typed events emitted by workers during workflow execution.
//!
//! Every event is identified by an [`EventId`] (carrying a stable
//! callback-name string used on the wire), a sender whose shape depends on
//! the event kind, and an optional JSON-encoded data payload. The wire
//! encoding lives in [`crate::wire`].

use serde::{Deserialize, Serialize};

use crate::workflow::Argument;

// ---------------------------------------------------------------------------
// Event identifiers
// ---------------------------------------------------------------------------

/// The three sender shapes an event can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Workflow,
    Action,
    General,
}

/// Every event the execution core can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventId {
    WorkflowExecutionStart,
    NextStepFound,
    WorkflowPaused,
    WorkflowResumed,
    AppInstanceCreated,
    WorkflowInputValidated,
    WorkflowInputInvalid,
    StepExecutionSuccess,
    StepExecutionError,
    WorkflowShutdown,
    StepStarted,
    TriggerAwaitingData,
    TriggerTaken,
    BranchTaken,
    BranchNotTaken,
}

/// All known event identifiers, in emission-plausible order.
pub const ALL_EVENT_IDS: [EventId; 15] = [
    EventId::WorkflowExecutionStart,
    EventId::NextStepFound,
    EventId::WorkflowPaused,
    EventId::WorkflowResumed,
    EventId::AppInstanceCreated,
    EventId::WorkflowInputValidated,
    EventId::WorkflowInputInvalid,
    EventId::StepExecutionSuccess,
    EventId::StepExecutionError,
    EventId::WorkflowShutdown,
    EventId::StepStarted,
    EventId::TriggerAwaitingData,
    EventId::TriggerTaken,
    EventId::BranchTaken,
    EventId::BranchNotTaken,
];

impl EventId {
    /// The sender shape this event carries.
    pub fn kind(&self) -> EventKind {
        match self {
            EventId::WorkflowExecutionStart
            | EventId::NextStepFound
            | EventId::WorkflowPaused
            | EventId::WorkflowResumed
            | EventId::AppInstanceCreated
            | EventId::WorkflowInputValidated
            | EventId::WorkflowInputInvalid
            | EventId::StepExecutionSuccess
            | EventId::StepExecutionError
            | EventId::WorkflowShutdown => EventKind::Workflow,

            EventId::StepStarted | EventId::TriggerAwaitingData | EventId::TriggerTaken => {
                EventKind::Action
            }

            EventId::BranchTaken | EventId::BranchNotTaken => EventKind::General,
        }
    }

    /// Whether this event carries an `additional_data` payload.
    pub fn requires_data(&self) -> bool {
        matches!(
            self,
            EventId::StepExecutionSuccess
                | EventId::StepExecutionError
                | EventId::WorkflowShutdown
                | EventId::TriggerTaken
        )
    }

    /// The stable callback-name string carried on the wire.
    pub fn callback_name(&self) -> &'static str {
        match self {
            EventId::WorkflowExecutionStart => "Workflow Execution Start",
            EventId::NextStepFound => "Next Step Found",
            EventId::WorkflowPaused => "Workflow Paused",
            EventId::WorkflowResumed => "Workflow Resumed",
            EventId::AppInstanceCreated => "App Instance Created",
            EventId::WorkflowInputValidated => "Workflow Input Validated",
            EventId::WorkflowInputInvalid => "Workflow Input Invalid",
            EventId::StepExecutionSuccess => "Step Execution Success",
            EventId::StepExecutionError => "Step Execution Error",
            EventId::WorkflowShutdown => "Workflow Shutdown",
            EventId::StepStarted => "Step Started",
            EventId::TriggerAwaitingData => "Trigger Action Awaiting Data",
            EventId::TriggerTaken => "Trigger Action Taken",
            EventId::BranchTaken => "Branch Taken",
            EventId::BranchNotTaken => "Branch Not Taken",
        }
    }

    /// Resolve a callback name received over the wire.
    pub fn from_callback_name(name: &str) -> Option<Self> {
        ALL_EVENT_IDS.into_iter().find(|id| id.callback_name() == name)
    }
}

// ---------------------------------------------------------------------------
// Senders
// ---------------------------------------------------------------------------

/// Sender identity for workflow-kind events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSender {
    pub name: String,
    pub uid: String,
    pub workflow_execution_uid: String,
}

/// Sender identity for action-kind (step) events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSender {
    pub name: String,
    pub uid: String,
    pub workflow_execution_uid: String,
    /// The step's per-execution uid, fresh each time the step runs.
    pub execution_uid: String,
    pub app_name: String,
    pub action_name: String,
    pub device_id: String,
    /// The step's input bindings at emission time.
    pub arguments: Vec<Argument>,
}

/// Sender identity for general-kind (branch/condition/transform) events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSender {
    pub uid: String,
    pub workflow_execution_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_name: Option<String>,
}

/// A sender of one of the three shapes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventSender {
    Workflow(WorkflowSender),
    Action(ActionSender),
    General(GeneralSender),
}

impl EventSender {
    pub fn kind(&self) -> EventKind {
        match self {
            EventSender::Workflow(_) => EventKind::Workflow,
            EventSender::Action(_) => EventKind::Action,
            EventSender::General(_) => EventKind::General,
        }
    }

    /// The workflow execution uid every sender shape carries.
    pub fn workflow_execution_uid(&self) -> &str {
        match self {
            EventSender::Workflow(s) => &s.workflow_execution_uid,
            EventSender::Action(s) => &s.workflow_execution_uid,
            EventSender::General(s) => &s.workflow_execution_uid,
        }
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A typed event envelope: identifier, sender, optional JSON payload.
///
/// The sender shape must match `id.kind()`; the constructors below make a
/// mismatch impossible, and the wire encoder rejects hand-built mismatches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub sender: EventSender,
    /// JSON-encoded additional data, present iff the variant carries data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Event {
    pub fn workflow(id: EventId, sender: WorkflowSender, data: Option<String>) -> Self {
        Self {
            id,
            sender: EventSender::Workflow(sender),
            data,
        }
    }

    pub fn action(id: EventId, sender: ActionSender, data: Option<String>) -> Self {
        Self {
            id,
            sender: EventSender::Action(sender),
            data,
        }
    }

    pub fn general(id: EventId, sender: GeneralSender) -> Self {
        Self {
            id,
            sender: EventSender::General(sender),
            data: None,
        }
    }

    pub fn workflow_execution_uid(&self) -> &str {
        self.sender.workflow_execution_uid()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_names_roundtrip() {
        for id in ALL_EVENT_IDS {
            assert_eq!(EventId::from_callback_name(id.callback_name()), Some(id));
        }
        assert_eq!(EventId::from_callback_name("No Such Callback"), None);
    }

    #[test]
    fn test_kind_partition() {
        let workflow = ALL_EVENT_IDS
            .iter()
            .filter(|id| id.kind() == EventKind::Workflow)
            .count();
        let action = ALL_EVENT_IDS
            .iter()
            .filter(|id| id.kind() == EventKind::Action)
            .count();
        let general = ALL_EVENT_IDS
            .iter()
            .filter(|id| id.kind() == EventKind::General)
            .count();
        assert_eq!((workflow, action, general), (10, 3, 2));
    }

    #[test]
    fn test_data_requirements() {
        assert!(EventId::StepExecutionSuccess.requires_data());
        assert!(EventId::StepExecutionError.requires_data());
        assert!(EventId::WorkflowShutdown.requires_data());
        assert!(EventId::TriggerTaken.requires_data());
        assert!(!EventId::WorkflowExecutionStart.requires_data());
        assert!(!EventId::BranchTaken.requires_data());
    }

    #[test]
    fn test_event_constructors_match_kinds() {
        let event = Event::workflow(
            EventId::WorkflowPaused,
            WorkflowSender {
                name: "wf".to_string(),
                uid: "u".to_string(),
                workflow_execution_uid: "e".to_string(),
            },
            None,
        );
        assert_eq!(event.sender.kind(), event.id.kind());
        assert_eq!(event.workflow_execution_uid(), "e");
    }

    #[test]
    fn test_event_serde_roundtrip() {
        let event = Event::action(
            EventId::StepStarted,
            ActionSender {
                name: "scan".to_string(),
                uid: "s".to_string(),
                workflow_execution_uid: "e".to_string(),
                execution_uid: "x".to_string(),
                app_name: "scanner".to_string(),
                action_name: "sweep".to_string(),
                device_id: "edge".to_string(),
                arguments: vec![],
            },
            None,
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"kind\":\"action\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
