//! Cloud Collaborators
//!
//! Interfaces to the compute provider and the object store, plus the
//! implementations shipped with the binary.
//!
//! # Components
//!
//! - [`ComputeClient`]: instance creation, serial console and status calls
//! - [`StorageClient`]: object writes with a content type
//! - [`local::LocalStorage`]: object store rooted in a local directory
//! - [`simulated::SimulatedCompute`]: in-memory provider for dry runs

pub mod local;
pub mod simulated;

pub use local::LocalStorage;
pub use simulated::SimulatedCompute;

use crate::error::{ProviderError, StorageError};
use crate::workflow::Instance;

/// Instance statuses after which no more console output is produced.
pub const TERMINAL_STATUSES: &[&str] = &["TERMINATED", "STOPPED", "STOPPING"];

/// Returns true if `status` means the instance has stopped or is stopping.
pub fn is_terminal_status(status: &str) -> bool {
    TERMINAL_STATUSES.contains(&status)
}

/// One chunk of serial console output.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SerialPortOutput {
    pub contents: String,
    /// Offset to request on the next fetch
    pub next: i64,
}

/// The compute provider calls this crate depends on.
///
/// Implementations must be usable from many threads at once. Retry and
/// backoff are the implementation's concern.
pub trait ComputeClient: Send + Sync {
    fn create_instance(
        &self,
        project: &str,
        zone: &str,
        instance: &Instance,
    ) -> Result<(), ProviderError>;

    /// Fetches console output of `port` starting at byte offset `start`.
    fn get_serial_port_output(
        &self,
        project: &str,
        zone: &str,
        name: &str,
        port: u32,
        start: i64,
    ) -> Result<SerialPortOutput, ProviderError>;

    /// Returns the provider's status string, e.g. `RUNNING` or `TERMINATED`.
    fn instance_status(&self, project: &str, zone: &str, name: &str)
        -> Result<String, ProviderError>;
}

/// An in-progress object write. Nothing is visible until `finalize`.
pub trait ObjectWriter: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;
    fn finalize(self: Box<Self>) -> Result<(), StorageError>;
}

/// Object storage addressed by path.
pub trait StorageClient: Send + Sync {
    /// Starts a write that replaces the object at `path`.
    fn writer(&self, path: &str, content_type: &str) -> Box<dyn ObjectWriter>;

    /// Human-readable location of the object at `path`.
    fn object_url(&self, path: &str) -> String {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(is_terminal_status("TERMINATED"));
        assert!(is_terminal_status("STOPPED"));
        assert!(is_terminal_status("STOPPING"));
        assert!(!is_terminal_status("RUNNING"));
        assert!(!is_terminal_status("terminated"));
        assert!(!is_terminal_status(""));
    }
}
