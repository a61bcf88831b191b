//! Error Types
//!
//! Errors raised by the compute provider, the object store, and the
//! step lifecycle. Only [`StepError`] ever reaches the workflow
//! scheduler; provider and storage errors are wrapped or logged.

use std::io;

use thiserror::Error;

use crate::workflow::validator::ValidationError;

/// Error returned by a compute provider call.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider rejected or failed the request.
    #[error("{0}")]
    Api(String),

    /// The named instance does not exist.
    #[error("instance {0:?} not found")]
    NotFound(String),

    /// An instance with the same name already exists.
    #[error("instance {0:?} already exists")]
    AlreadyExists(String),
}

/// Error returned while writing an object to storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] io::Error),

    /// The store refused the write.
    #[error("storage write rejected: {0}")]
    Rejected(String),
}

/// Outcome of a failed `populate`, `validate` or `run`.
#[derive(Debug, Error)]
pub enum StepError {
    /// The provider failed to create one of the step's instances.
    #[error("failed to create instances: {0}")]
    CreateInstances(#[source] ProviderError),

    /// An instance did not satisfy its preconditions.
    #[error("step {step:?}: {source}")]
    Validation {
        step: String,
        #[source]
        source: ValidationError,
    },

    /// A creation task panicked before reporting.
    #[error("creation task for instance {0:?} panicked")]
    TaskPanicked(String),

    /// A worker thread could not be started.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] io::Error),

    /// Several errors collected across instances.
    #[error("{}", join_messages(.0))]
    Multiple(Vec<StepError>),
}

impl StepError {
    /// Folds collected errors into a single result.
    ///
    /// No errors is success, a single error is returned as is, and
    /// anything more becomes [`StepError::Multiple`].
    pub fn aggregate(mut errors: Vec<StepError>) -> Result<(), StepError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(StepError::Multiple(errors)),
        }
    }

    /// Number of leaf errors carried by this value.
    pub fn count(&self) -> usize {
        match self {
            StepError::Multiple(errors) => errors.iter().map(StepError::count).sum(),
            _ => 1,
        }
    }
}

fn join_messages(errors: &[StepError]) -> String {
    let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    messages.join("\n")
}
