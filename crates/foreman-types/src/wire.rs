//! Protobuf wire format for the results channel.
//!
//! The envelope is discriminated by a `packet_type` field into five
//! variants: workflow / action packets each in plain and with-data form,
//! plus a general packet for branch/condition/transform senders. Messages
//! are hand-derived prost structs, so no protoc build step is needed; the
//! length prefix required on the wire is supplied by the channel framing.
//!
//! Argument values are carried as JSON-encoded strings so that an
//! [`Event`] survives an encode/decode round trip unchanged.

use prost::Message as _;
use thiserror::Error;

use crate::event::{ActionSender, Event, EventId, EventSender, GeneralSender, WorkflowSender};
use crate::workflow::Argument;

// ---------------------------------------------------------------------------
// Protobuf messages
// ---------------------------------------------------------------------------

/// Discriminant for the five envelope variants.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PacketType {
    WorkflowPacket = 0,
    WorkflowPacketData = 1,
    ActionPacket = 2,
    ActionPacketData = 3,
    GeneralPacket = 4,
}

/// The outer envelope sent on the results channel.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Envelope {
    #[prost(enumeration = "PacketType", tag = "1")]
    pub packet_type: i32,
    #[prost(message, optional, tag = "2")]
    pub workflow_packet: Option<WorkflowPacket>,
    #[prost(message, optional, tag = "3")]
    pub workflow_packet_data: Option<WorkflowPacketData>,
    #[prost(message, optional, tag = "4")]
    pub action_packet: Option<ActionPacket>,
    #[prost(message, optional, tag = "5")]
    pub action_packet_data: Option<ActionPacketData>,
    #[prost(message, optional, tag = "6")]
    pub general_packet: Option<GeneralPacket>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowSenderProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub uid: String,
    #[prost(string, tag = "3")]
    pub workflow_execution_uid: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ArgumentProto {
    #[prost(string, tag = "1")]
    pub name: String,
    /// JSON-encoded literal value, when populated.
    #[prost(string, optional, tag = "2")]
    pub value: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub reference: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub selection: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionSenderProto {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(string, tag = "2")]
    pub uid: String,
    #[prost(string, tag = "3")]
    pub workflow_execution_uid: String,
    #[prost(string, tag = "4")]
    pub execution_uid: String,
    #[prost(string, tag = "5")]
    pub app_name: String,
    #[prost(string, tag = "6")]
    pub action_name: String,
    #[prost(string, tag = "7")]
    pub device_id: String,
    #[prost(message, repeated, tag = "8")]
    pub arguments: Vec<ArgumentProto>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GeneralSenderProto {
    #[prost(string, tag = "1")]
    pub uid: String,
    #[prost(string, tag = "2")]
    pub workflow_execution_uid: String,
    #[prost(string, optional, tag = "3")]
    pub app_name: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowPacket {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<WorkflowSenderProto>,
    #[prost(string, tag = "2")]
    pub callback_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct WorkflowPacketData {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<WorkflowSenderProto>,
    #[prost(string, tag = "2")]
    pub callback_name: String,
    #[prost(string, tag = "3")]
    pub additional_data: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionPacket {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<ActionSenderProto>,
    #[prost(string, tag = "2")]
    pub callback_name: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ActionPacketData {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<ActionSenderProto>,
    #[prost(string, tag = "2")]
    pub callback_name: String,
    #[prost(string, tag = "3")]
    pub additional_data: String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GeneralPacket {
    #[prost(message, optional, tag = "1")]
    pub sender: Option<GeneralSenderProto>,
    #[prost(string, tag = "2")]
    pub callback_name: String,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from envelope encoding and decoding.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("envelope decode failed: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error("unknown callback '{0}'")]
    UnknownCallback(String),

    #[error("unknown packet type {0}")]
    UnknownPacketType(i32),

    #[error("envelope is missing its {0} payload")]
    MissingPacket(&'static str),

    #[error("envelope is missing its sender")]
    MissingSender,

    #[error("event '{0}' requires additional data but carries none")]
    MissingData(&'static str),

    #[error("event '{0}' does not carry additional data")]
    UnexpectedData(&'static str),

    #[error("sender shape does not match event kind for '{0}'")]
    SenderMismatch(&'static str),

    #[error("argument value is not valid JSON: {0}")]
    Json(String),
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

fn argument_to_proto(argument: &Argument) -> Result<ArgumentProto, WireError> {
    let value = argument
        .value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| WireError::Json(e.to_string())))
        .transpose()?;
    Ok(ArgumentProto {
        name: argument.name.clone(),
        value,
        reference: argument.reference.clone(),
        selection: argument.selection.clone(),
    })
}

fn argument_from_proto(proto: ArgumentProto) -> Result<Argument, WireError> {
    let value = proto
        .value
        .as_deref()
        .map(|v| serde_json::from_str(v).map_err(|e| WireError::Json(e.to_string())))
        .transpose()?;
    Ok(Argument {
        name: proto.name,
        value,
        reference: proto.reference,
        selection: proto.selection,
    })
}

/// Encode an event into its wire envelope.
///
/// The variant is selected by the event kind and the presence of data, and
/// the payload requirements of the event identifier are enforced.
pub fn encode_event(event: &Event) -> Result<Vec<u8>, WireError> {
    let name = event.id.callback_name();
    if event.sender.kind() != event.id.kind() {
        return Err(WireError::SenderMismatch(name));
    }
    if event.id.requires_data() && event.data.is_none() {
        return Err(WireError::MissingData(name));
    }
    if !event.id.requires_data() && event.data.is_some() {
        return Err(WireError::UnexpectedData(name));
    }

    let mut envelope = Envelope::default();
    match (&event.sender, &event.data) {
        (EventSender::Workflow(sender), None) => {
            envelope.packet_type = PacketType::WorkflowPacket as i32;
            envelope.workflow_packet = Some(WorkflowPacket {
                sender: Some(workflow_sender_to_proto(sender)),
                callback_name: name.to_string(),
            });
        }
        (EventSender::Workflow(sender), Some(data)) => {
            envelope.packet_type = PacketType::WorkflowPacketData as i32;
            envelope.workflow_packet_data = Some(WorkflowPacketData {
                sender: Some(workflow_sender_to_proto(sender)),
                callback_name: name.to_string(),
                additional_data: data.clone(),
            });
        }
        (EventSender::Action(sender), None) => {
            envelope.packet_type = PacketType::ActionPacket as i32;
            envelope.action_packet = Some(ActionPacket {
                sender: Some(action_sender_to_proto(sender)?),
                callback_name: name.to_string(),
            });
        }
        (EventSender::Action(sender), Some(data)) => {
            envelope.packet_type = PacketType::ActionPacketData as i32;
            envelope.action_packet_data = Some(ActionPacketData {
                sender: Some(action_sender_to_proto(sender)?),
                callback_name: name.to_string(),
                additional_data: data.clone(),
            });
        }
        (EventSender::General(sender), _) => {
            envelope.packet_type = PacketType::GeneralPacket as i32;
            envelope.general_packet = Some(GeneralPacket {
                sender: Some(GeneralSenderProto {
                    uid: sender.uid.clone(),
                    workflow_execution_uid: sender.workflow_execution_uid.clone(),
                    app_name: sender.app_name.clone(),
                }),
                callback_name: name.to_string(),
            });
        }
    }
    Ok(envelope.encode_to_vec())
}

fn workflow_sender_to_proto(sender: &WorkflowSender) -> WorkflowSenderProto {
    WorkflowSenderProto {
        name: sender.name.clone(),
        uid: sender.uid.clone(),
        workflow_execution_uid: sender.workflow_execution_uid.clone(),
    }
}

fn action_sender_to_proto(sender: &ActionSender) -> Result<ActionSenderProto, WireError> {
    Ok(ActionSenderProto {
        name: sender.name.clone(),
        uid: sender.uid.clone(),
        workflow_execution_uid: sender.workflow_execution_uid.clone(),
        execution_uid: sender.execution_uid.clone(),
        app_name: sender.app_name.clone(),
        action_name: sender.action_name.clone(),
        device_id: sender.device_id.clone(),
        arguments: sender
            .arguments
            .iter()
            .map(argument_to_proto)
            .collect::<Result<_, _>>()?,
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a wire envelope back into a typed event.
pub fn decode_event(bytes: &[u8]) -> Result<Event, WireError> {
    let envelope = Envelope::decode(bytes)?;
    let packet_type = PacketType::try_from(envelope.packet_type)
        .map_err(|_| WireError::UnknownPacketType(envelope.packet_type))?;

    let (sender, callback_name, data) = match packet_type {
        PacketType::WorkflowPacket => {
            let packet = envelope
                .workflow_packet
                .ok_or(WireError::MissingPacket("workflow"))?;
            let sender = packet.sender.ok_or(WireError::MissingSender)?;
            (
                EventSender::Workflow(workflow_sender_from_proto(sender)),
                packet.callback_name,
                None,
            )
        }
        PacketType::WorkflowPacketData => {
            let packet = envelope
                .workflow_packet_data
                .ok_or(WireError::MissingPacket("workflow-data"))?;
            let sender = packet.sender.ok_or(WireError::MissingSender)?;
            (
                EventSender::Workflow(workflow_sender_from_proto(sender)),
                packet.callback_name,
                Some(packet.additional_data),
            )
        }
        PacketType::ActionPacket => {
            let packet = envelope
                .action_packet
                .ok_or(WireError::MissingPacket("action"))?;
            let sender = packet.sender.ok_or(WireError::MissingSender)?;
            (
                EventSender::Action(action_sender_from_proto(sender)?),
                packet.callback_name,
                None,
            )
        }
        PacketType::ActionPacketData => {
            let packet = envelope
                .action_packet_data
                .ok_or(WireError::MissingPacket("action-data"))?;
            let sender = packet.sender.ok_or(WireError::MissingSender)?;
            (
                EventSender::Action(action_sender_from_proto(sender)?),
                packet.callback_name,
                Some(packet.additional_data),
            )
        }
        PacketType::GeneralPacket => {
            let packet = envelope
                .general_packet
                .ok_or(WireError::MissingPacket("general"))?;
            let sender = packet.sender.ok_or(WireError::MissingSender)?;
            (
                EventSender::General(GeneralSender {
                    uid: sender.uid,
                    workflow_execution_uid: sender.workflow_execution_uid,
                    app_name: sender.app_name,
                }),
                packet.callback_name,
                None,
            )
        }
    };

    let id = EventId::from_callback_name(&callback_name)
        .ok_or(WireError::UnknownCallback(callback_name))?;
    if id.kind() != sender.kind() {
        return Err(WireError::SenderMismatch(id.callback_name()));
    }
    if id.requires_data() && data.is_none() {
        return Err(WireError::MissingData(id.callback_name()));
    }

    Ok(Event { id, sender, data })
}

fn workflow_sender_from_proto(proto: WorkflowSenderProto) -> WorkflowSender {
    WorkflowSender {
        name: proto.name,
        uid: proto.uid,
        workflow_execution_uid: proto.workflow_execution_uid,
    }
}

fn action_sender_from_proto(proto: ActionSenderProto) -> Result<ActionSender, WireError> {
    Ok(ActionSender {
        name: proto.name,
        uid: proto.uid,
        workflow_execution_uid: proto.workflow_execution_uid,
        execution_uid: proto.execution_uid,
        app_name: proto.app_name,
        action_name: proto.action_name,
        device_id: proto.device_id,
        arguments: proto
            .arguments
            .into_iter()
            .map(argument_from_proto)
            .collect::<Result<_, _>>()?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
