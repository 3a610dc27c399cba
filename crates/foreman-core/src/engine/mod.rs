//! The worker-side workflow interpreter.
//!
//! [`workflow::Workflow`] is the runtime step graph, validated against an
//! [`registry::AppRegistry`] at construction. [`executor::WorkflowExecutor`]
//! walks it step by step, cooperating with [`context::ExecutionControls`]
//! for pause/resume and trigger delivery.

pub mod context;
pub mod executor;
pub mod registry;
pub mod workflow;

pub use context::ExecutionControls;
pub use executor::{EventSink, WorkflowExecutor};
pub use registry::{ActionError, AppInstance, AppRegistry};
pub use workflow::{Step, Workflow, validate_definition};
