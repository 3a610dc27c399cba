//! Dispatch, execution, and event-routing logic for Foreman.
//!
//! This crate defines the "ports" (transport and app-registry traits) that
//! the infrastructure layer implements, plus the three cooperating
//! components built on them: the controller-side [`dispatch::Dispatcher`]
//! and [`dispatch::Receiver`], and the [`worker::Worker`] that interprets
//! workflows. It depends only on `foreman-types` -- never on any socket or
//! crypto crate.

pub mod dispatch;
pub mod engine;
pub mod event;
pub mod transport;
pub mod worker;
