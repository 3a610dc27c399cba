//! Shared domain types for the Foreman workflow platform.
//!
//! This crate contains the types exchanged between the controller and its
//! workers: workflow and step definitions, the typed event envelope, the
//! protobuf wire format, the control-channel protocol, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, prost, uuid, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod protocol;
pub mod wire;
pub mod workflow;
