//! Workflow Execution Module
//!
//! Provides the step lifecycle, the CreateInstances step with its serial
//! console streamers, and the engine that runs a workflow file.
//!
//! # Architecture
//!
//! - [`engine`]: Runs every step of a workflow in order
//! - [`step`]: The populate/validate/run contract
//! - [`create_instances`]: Parallel instance creation
//! - [`serial`]: Per-instance serial console streaming
//! - [`cancel`]: Workflow-wide cancellation signal
//! - [`streams`]: Tracking of streamer threads that outlive their step
//! - [`context`]: Workflow and step contexts passed to every call

pub mod cancel;
pub mod context;
pub mod create_instances;
pub mod engine;
pub mod serial;
pub mod step;
pub mod streams;

pub use cancel::{CancelRegistration, CancelSignal};
pub use context::{StepContext, WorkflowConfig, WorkflowContext};
pub use create_instances::CreateInstances;
pub use engine::Engine;
pub use serial::{LogBuffer, SerialLogStreamer, StreamEnd};
pub use step::StepAction;
pub use streams::StreamerGroup;
