//! Span export for Foreman's controller and worker processes.

pub mod tracing_setup;

pub use tracing_setup::{Telemetry, TelemetryError, init};
