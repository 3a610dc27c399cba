//! Built-in app registry for the Foreman binaries.
//!
//! The real action registry is an external collaborator; this is the
//! in-tree stand-in wired into the `foreman` binary so the platform runs
//! out of the box. It exposes a single `utility` app with a handful of
//! actions useful for playbook plumbing and demos.

use std::time::Duration;

use foreman_core::engine::registry::{ActionError, ActionFuture, AppInstance, AppRegistry};
use foreman_types::error::DefinitionError;
use serde_json::{Map, Value, json};

const UTILITY_APP: &str = "utility";
const UTILITY_ACTIONS: [&str; 3] = ["echo", "sleep", "fail"];

/// Registry exposing the built-in `utility` app.
pub struct BuiltinRegistry;

impl AppRegistry for BuiltinRegistry {
    fn validate_action(&self, app: &str, action: &str) -> Result<(), DefinitionError> {
        if app != UTILITY_APP {
            return Err(DefinitionError::UnknownApp(app.to_string()));
        }
        if !UTILITY_ACTIONS.contains(&action) {
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
        device: &str,
    ) -> Result<Box<dyn AppInstance>, DefinitionError> {
        if app != UTILITY_APP {
            return Err(DefinitionError::UnknownApp(app.to_string()));
        }
        tracing::debug!(app, device, "creating utility instance");
        Ok(Box::new(UtilityInstance {
            device: device.to_string(),
        }))
    }
}

/// One `utility` handle per device.
struct UtilityInstance {
    device: String,
}

impl AppInstance for UtilityInstance {
    fn invoke<'a>(&'a mut self, action: &'a str, inputs: &'a Map<String, Value>) -> ActionFuture<'a> {
        Box::pin(async move {
            match action {
                // Returns its rendered inputs, tagged with the device.
                "echo" => Ok(json!({
                    "device": self.device,
                    "echo": Value::Object(inputs.clone()),
                })),
                // Sleeps for `seconds` (fractional allowed, default 0).
                "sleep" => {
                    let seconds = inputs
                        .get("seconds")
                        .and_then(Value::as_f64)
                        .unwrap_or(0.0)
                        .max(0.0);
                    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
                    Ok(json!({"slept": seconds}))
                }
                // Fails with the configured message.
                "fail" => {
                    let message = inputs
                        .get("message")
                        .and_then(Value::as_str)
                        .unwrap_or("requested failure");
                    Err(ActionError::Failed(message.to_string()))
                }
                other => Err(ActionError::Failed(format!("unknown action {other}"))),
            }
        })
    }

    fn shutdown(&mut self) -> Result<(), ActionError> {
        tracing::debug!(device = self.device.as_str(), "utility instance shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_known_and_unknown_actions() {
        assert!(BuiltinRegistry.validate_action("utility", "echo").is_ok());
        assert!(BuiltinRegistry.validate_action("utility", "sleep").is_ok());
        assert!(matches!(
            BuiltinRegistry.validate_action("utility", "teleport"),
            Err(DefinitionError::UnknownAppAction { .. })
        ));
        assert!(matches!(
            BuiltinRegistry.validate_action("siem", "query"),
            Err(DefinitionError::UnknownApp(_))
        ));
    }

    #[tokio::test]
    async fn test_echo_returns_inputs_with_device() {
        let mut instance = BuiltinRegistry.create_instance("utility", "edge").unwrap();
        let mut inputs = Map::new();
        inputs.insert("text".to_string(), json!("hello"));
        let output = instance.invoke("echo", &inputs).await.unwrap();
        assert_eq!(output["device"], json!("edge"));
        assert_eq!(output["echo"]["text"], json!("hello"));
    }

    #[tokio::test]
    async fn test_fail_uses_configured_message() {
        let mut instance = BuiltinRegistry.create_instance("utility", "edge").unwrap();
        let mut inputs = Map::new();
        inputs.insert("message".to_string(), json!("boom"));
        let err = instance.invoke("fail", &inputs).await.unwrap_err();
        assert_eq!(err.to_string(), "action failed: boom");
    }

    #[tokio::test]
    async fn test_sleep_with_zero_duration() {
        let mut instance = BuiltinRegistry.create_instance("utility", "edge").unwrap();
        let output = instance.invoke("sleep", &Map::new()).await.unwrap();
        assert_eq!(output, json!({"slept": 0.0}));
    }
}
