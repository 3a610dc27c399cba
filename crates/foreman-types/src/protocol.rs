//! Request- and control-channel message protocol.
//!
//! The requests channel carries readiness tokens from workers (`Ready` at
//! startup, `Done` after each completion) and JSON workflow submissions
//! from the controller. The control channel carries the literal tokens
//! `Pause` / `Resume`, a JSON trigger payload, and the worker's replies.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::workflow::Argument;

// ---------------------------------------------------------------------------
// Requests channel: worker -> controller readiness tokens
// ---------------------------------------------------------------------------

/// A worker's readiness announcement on the requests channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySignal {
    /// Sent once after worker startup.
    Ready,
    /// Sent after each workflow completion.
    Done,
}

impl ReadySignal {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ReadySignal::Ready => b"Ready",
            ReadySignal::Done => b"Done",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"Ready" => Some(ReadySignal::Ready),
            b"Done" => Some(ReadySignal::Done),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Control channel: controller -> worker
// ---------------------------------------------------------------------------

/// Trigger data addressed to a step awaiting it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Payload handed to the waiting step.
    #[serde(default)]
    pub data_in: Value,
    /// Optional argument overrides for the waiting step's inputs.
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

/// A message the controller sends on the control channel.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    Pause,
    Resume,
    Trigger(TriggerPayload),
}

impl ControlRequest {
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        match self {
            ControlRequest::Pause => Ok(b"Pause".to_vec()),
            ControlRequest::Resume => Ok(b"Resume".to_vec()),
            ControlRequest::Trigger(payload) => {
                serde_json::to_vec(payload).map_err(|e| ProtocolError::Json(e.to_string()))
            }
        }
    }

    /// Decode a control message: the two literal tokens, else a JSON
    /// trigger payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        match bytes {
            b"Pause" => Ok(ControlRequest::Pause),
            b"Resume" => Ok(ControlRequest::Resume),
            other => serde_json::from_slice(other)
                .map(ControlRequest::Trigger)
                .map_err(|e| ProtocolError::Json(e.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Control channel: worker -> controller
// ---------------------------------------------------------------------------

/// A worker's reply on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    /// Sent once after worker startup.
    Executing,
    /// Acknowledges `Pause`; the actual pause takes effect at the next
    /// suspension point of the executor.
    Paused,
    /// Acknowledges `Resume`.
    Resumed,
}

impl ControlReply {
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            ControlReply::Executing => b"Executing",
            ControlReply::Paused => b"Paused",
            ControlReply::Resumed => b"Resumed",
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        match bytes {
            b"Executing" => Some(ControlReply::Executing),
            b"Paused" => Some(ControlReply::Paused),
            b"Resumed" => Some(ControlReply::Resumed),
            _ => None,
        }
    }
}

/// Errors from channel message decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is neither a control token nor valid JSON: {0}")]
    Json(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
