//! Execution Context
//!
//! Everything a step needs from its workflow, passed explicitly: the
//! provider and storage clients, the log sink, the registries, the
//! cancellation signal and the group that tracks log streamers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cloud::{ComputeClient, StorageClient};
use crate::monitoring::{ExecutionTimeline, LogSink};
use crate::workflow::validator::Defaults;
use crate::workflow::{Registries, WorkflowFile};

use super::cancel::CancelSignal;
use super::streams::StreamerGroup;

/// Workflow-wide settings.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub name: String,
    pub project: String,
    pub zone: String,
    /// Object store prefix for serial console logs
    pub logs_path: String,
    pub serial_port: u32,
    pub serial_interval: Duration,
}

impl WorkflowConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            project: String::new(),
            zone: String::new(),
            logs_path: "logs".to_string(),
            serial_port: 1,
            serial_interval: Duration::from_secs(3),
        }
    }

    pub fn from_workflow(workflow: &WorkflowFile) -> Self {
        Self {
            name: workflow.name.clone(),
            project: workflow.project.clone(),
            zone: workflow.zone.clone(),
            logs_path: workflow.logs_path.clone(),
            serial_port: workflow.serial_port,
            serial_interval: workflow.serial_interval(),
        }
    }

    pub fn defaults(&self) -> Defaults {
        Defaults {
            project: self.project.clone(),
            zone: self.zone.clone(),
        }
    }
}

/// Shared state of one workflow run.
pub struct WorkflowContext {
    pub config: WorkflowConfig,
    pub compute: Arc<dyn ComputeClient>,
    pub storage: Arc<dyn StorageClient>,
    pub sink: Arc<dyn LogSink>,
    pub registries: Registries,
    pub cancel: CancelSignal,
    pub log_streams: StreamerGroup,
    pub timeline: ExecutionTimeline,
}

impl WorkflowContext {
    pub fn new(
        config: WorkflowConfig,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            config,
            compute,
            storage,
            sink,
            registries: Registries::empty(),
            cancel: CancelSignal::new(),
            log_streams: StreamerGroup::new(),
            timeline: ExecutionTimeline::new(),
        }
    }

    pub fn with_registries(mut self, registries: Registries) -> Self {
        self.registries = registries;
        self
    }

    /// Uses an externally owned cancellation signal.
    pub fn with_cancel_signal(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }
}

impl fmt::Debug for WorkflowContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowContext")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .field("log_streams", &self.log_streams.len())
            .finish_non_exhaustive()
    }
}

/// The context handed to one step's lifecycle calls.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub name: String,
    pub workflow: Arc<WorkflowContext>,
}

impl StepContext {
    pub fn new(name: impl Into<String>, workflow: Arc<WorkflowContext>) -> Self {
        Self {
            name: name.into(),
            workflow,
        }
    }

    /// Logs an informational message scoped to this step.
    pub fn info(&self, kind: &str, message: &str) {
        self.workflow.sink.step_info(&self.name, kind, message);
    }

    pub fn is_canceled(&self) -> bool {
        self.workflow.cancel.is_canceled()
    }
}
