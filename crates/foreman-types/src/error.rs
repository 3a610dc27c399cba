use thiserror::Error;

/// Errors raised while constructing a workflow from a definition.
///
/// All of these fail the submission before any execution; they are never
/// produced once a workflow has started running.
#[derive(Debug, Clone, Error)]
pub enum DefinitionError {
    #[error("unknown app '{0}'")]
    UnknownApp(String),

    #[error("unknown action '{action}' for app '{app}'")]
    UnknownAppAction { app: String, action: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("start step '{0}' is not defined")]
    UnknownStart(String),

    #[error("duplicate step name '{0}'")]
    DuplicateStep(String),

    #[error("malformed workflow JSON: {0}")]
    Parse(String),
}
