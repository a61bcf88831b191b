//! Step Lifecycle
//!
//! The contract between a workflow scheduler and the steps it runs.
//! A scheduler calls `populate` and `validate` on every step before it
//! runs any of them, then calls `run` once per step.

use crate::error::StepError;

use super::context::StepContext;

/// A unit of workflow work with a populate/validate/run lifecycle.
pub trait StepAction: Send {
    /// Name of the step kind, used in log messages.
    fn kind(&self) -> &'static str;

    /// Applies defaults and normalizes identifiers.
    ///
    /// Errors from every item in the step are collected into one
    /// [`StepError`].
    fn populate(&mut self, ctx: &StepContext) -> Result<(), StepError>;

    /// Checks preconditions without touching the provider.
    fn validate(&self, ctx: &StepContext) -> Result<(), StepError>;

    /// Executes the step.
    fn run(&mut self, ctx: &StepContext) -> Result<(), StepError>;
}
