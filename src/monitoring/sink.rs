//! Log Sinks
//!
//! The two logging call sites a step uses: step-scoped informational
//! messages and the final hand-off of each instance's serial console
//! log once its streamer stops.

use log::{debug, info};

/// Destination for step messages and finished serial console logs.
pub trait LogSink: Send + Sync {
    /// Emits an informational message scoped to one step.
    fn step_info(&self, step_name: &str, step_kind: &str, message: &str) {
        info!("[{}] {}: {}", step_name, step_kind, message);
    }

    /// Receives the complete console log of an instance. Called exactly
    /// once per streamer, when it stops.
    fn write_serial_port_logs(&self, workflow: &str, instance: &str, contents: &str);
}

/// Sink that writes everything through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleLogSink;

impl LogSink for ConsoleLogSink {
    fn write_serial_port_logs(&self, workflow: &str, instance: &str, contents: &str) {
        info!(
            "[{}] Serial port log for instance {:?}: {} bytes, {} lines",
            workflow,
            instance,
            contents.len(),
            contents.lines().count()
        );
        for line in contents.lines() {
            debug!("[{}] {}: {}", workflow, instance, line);
        }
    }
}
