//! CloudRunner - Parallel Instance Provisioning
//!
//! A workflow step engine that creates compute instances concurrently,
//! streams each instance's serial console into an object store while
//! it runs, and records what was created so it can be cleaned up.
//!
//! # Architecture
//!
//! The library is organized into four main modules:
//!
//! - [`workflow`]: Instance model, YAML parsing, registries and validation
//! - [`execution`]: The CreateInstances step, log streamers and the engine
//! - [`cloud`]: Compute provider and object store interfaces
//! - [`monitoring`]: Log sinks and the instance timeline
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cloudrunner::cloud::{LocalStorage, SimulatedCompute};
//! use cloudrunner::monitoring::ConsoleLogSink;
//! use cloudrunner::{load_workflow, Engine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Load a workflow from YAML
//!     let workflow = load_workflow("build-image.yaml")?;
//!
//!     let mut engine = Engine::new(
//!         workflow,
//!         Arc::new(SimulatedCompute::new()),
//!         Arc::new(LocalStorage::new("./cloudrunner-storage")),
//!         Arc::new(ConsoleLogSink),
//!     );
//!
//!     engine.run()?;
//!     Ok(())
//! }
//! ```

pub mod cloud;
pub mod error;
pub mod execution;
pub mod monitoring;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use error::{ProviderError, StepError, StorageError};
pub use execution::create_instances::CreateInstances;
pub use execution::engine::Engine;
pub use workflow::model::{Instance, WorkflowFile};
pub use workflow::parser::load_workflow;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "CloudRunner";
