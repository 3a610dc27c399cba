//! App-registry ports.
//!
//! The registry that maps `(app, action)` to executable code is an external
//! collaborator; these traits are the seam it plugs into. They are
//! object-safe (boxed futures) so registries and instances can be carried
//! behind `Arc<dyn AppRegistry>` / `Box<dyn AppInstance>`.

use std::future::Future;
use std::pin::Pin;

use foreman_types::error::DefinitionError;
use serde_json::{Map, Value};
use thiserror::Error;

/// Boxed future returned by [`AppInstance::invoke`].
pub type ActionFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ActionError>> + Send + 'a>>;

/// A lazily constructed, per-`(app, device)` runtime handle.
///
/// At most one instance exists per `(app, device)` pair within one workflow
/// run; instances are shut down at workflow termination.
pub trait AppInstance: Send {
    /// Invoke a named action with rendered inputs.
    fn invoke<'a>(&'a mut self, action: &'a str, inputs: &'a Map<String, Value>)
    -> ActionFuture<'a>;

    /// Release whatever the instance holds. Errors are logged by the
    /// caller, never propagated.
    fn shutdown(&mut self) -> Result<(), ActionError>;
}

/// The action registry seam.
pub trait AppRegistry: Send + Sync {
    /// Check that `(app, action)` names executable code. Used when a
    /// workflow definition is validated, before any execution.
    fn validate_action(&self, app: &str, action: &str) -> Result<(), DefinitionError>;

    /// Create the runtime handle for `(app, device)`.
    fn create_instance(
        &self,
        app: &str,
        device: &str,
    ) -> Result<Box<dyn AppInstance>, DefinitionError>;
}

/// Errors raised by app instances at runtime.
///
/// These are caught per step: recorded into the accumulated risk, emitted
/// as a step-error event, and execution continues.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action failed: {0}")]
    Failed(String),

    #[error("invalid inputs: {0}")]
    InvalidInputs(String),

    #[error("instance shutdown failed: {0}")]
    Shutdown(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_error_display() {
        let err = ActionError::Failed("connection refused".to_string());
        assert_eq!(err.to_string(), "action failed: connection refused");

        let err = ActionError::InvalidInputs("missing 'subnet'".to_string());
        assert!(err.to_string().contains("subnet"));
    }
}
