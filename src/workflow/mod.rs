//! Workflow Definition Module
//!
//! Provides the instance data model, YAML loading, registries and the
//! per-instance lifecycle helpers used by steps.
//!
//! # Structure
//!
//! - [`model`]: Instance specifications and the workflow file
//! - [`parser`]: YAML parsing and loading
//! - [`registry`]: Short-name to link lookup tables
//! - [`resolver`]: Rewriting instance references through the registries
//! - [`validator`]: Population defaults and precondition checks
//! - [`state`]: Persisted record of created instances

pub mod model;
pub mod parser;
pub mod registry;
pub mod resolver;
pub mod state;
pub mod validator;

pub use model::{
    AccessConfig, AttachedDisk, InitializeParams, Instance, InstanceState, NetworkInterface,
    ResourceLinks, ServiceAccount, StepDefinition, WorkflowFile,
};
pub use parser::{load_workflow, parse_workflow};
pub use registry::{Registries, Registry, Resource, ResourceMap};
pub use resolver::resolve_references;
pub use state::ProvisionState;
pub use validator::{populate_instance, validate_instance, Defaults, ValidationError};
