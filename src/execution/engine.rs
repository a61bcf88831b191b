//! Workflow Execution Engine
//!
//! Runs a workflow file end to end:
//! - Populates and validates every step before any instance is created
//! - Runs steps in order, stopping at the first failure
//! - Cancellation via a signal or a file-based flag
//! - Waits for serial console streamers before reporting
//! - Persists the created instances for a later cleanup

use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::cloud::{ComputeClient, StorageClient};
use crate::error::StepError;
use crate::monitoring::LogSink;
use crate::workflow::state::STATE_DIR;
use crate::workflow::{ProvisionState, Registries, StepDefinition, WorkflowFile};

use super::cancel::CancelSignal;
use super::context::{StepContext, WorkflowConfig, WorkflowContext};
use super::step::StepAction;

/// Interval for checking the cancel flag file.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(200);

/// Interval between checks for creations still in flight after a failure.
const SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Workflow execution engine.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use cloudrunner::cloud::{LocalStorage, SimulatedCompute};
/// use cloudrunner::monitoring::ConsoleLogSink;
/// use cloudrunner::{load_workflow, Engine};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let workflow = load_workflow("build-image.yaml")?;
///     let mut engine = Engine::new(
///         workflow,
///         Arc::new(SimulatedCompute::new()),
///         Arc::new(LocalStorage::new("storage")),
///         Arc::new(ConsoleLogSink),
///     );
///     engine.set_workflow_path("build-image.yaml");
///
///     let state = engine.run()?;
///     println!("{} instances created", state.created_instances.len());
///     Ok(())
/// }
/// ```
pub struct Engine {
    workflow: WorkflowFile,
    compute: Arc<dyn ComputeClient>,
    storage: Arc<dyn StorageClient>,
    sink: Arc<dyn LogSink>,
    workflow_path: String,
    state_dir: PathBuf,
    cancel_flag_path: Option<PathBuf>,
    serial_interval: Option<Duration>,
    cancel: CancelSignal,
}

impl Engine {
    pub fn new(
        workflow: WorkflowFile,
        compute: Arc<dyn ComputeClient>,
        storage: Arc<dyn StorageClient>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            workflow,
            compute,
            storage,
            sink,
            workflow_path: String::new(),
            state_dir: PathBuf::from(STATE_DIR),
            cancel_flag_path: None,
            serial_interval: None,
            cancel: CancelSignal::new(),
        }
    }

    /// Sets the workflow file path (used to name the state file).
    pub fn set_workflow_path(&mut self, path: impl Into<String>) {
        self.workflow_path = path.into();
    }

    pub fn set_state_dir(&mut self, dir: impl Into<PathBuf>) {
        self.state_dir = dir.into();
    }

    /// Cancels the run once a file appears at `path`.
    pub fn set_cancel_flag_path(&mut self, path: impl Into<PathBuf>) {
        self.cancel_flag_path = Some(path.into());
    }

    /// Overrides the workflow's serial console polling interval.
    pub fn set_serial_interval(&mut self, interval: Duration) {
        self.serial_interval = Some(interval);
    }

    /// Handle for canceling the run from another thread.
    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    /// Executes the workflow.
    ///
    /// The returned state is also saved under the state directory,
    /// whether the run succeeded or not.
    ///
    /// # Returns
    ///
    /// * `Ok(state)` - Every step succeeded, or the run was canceled
    ///   (`state.canceled` is set)
    /// * `Err` - Population, validation or a step failed
    pub fn run(&mut self) -> Result<ProvisionState, Box<dyn Error>> {
        let start_time = Instant::now();

        if self.workflow_path.is_empty() {
            self.workflow_path = "workflow.yaml".to_string();
        }

        let workflow = Arc::new(self.build_context());
        let mut steps: Vec<(StepContext, StepDefinition)> = std::mem::take(&mut self.workflow.steps)
            .into_iter()
            .map(|step| (StepContext::new(step.name.clone(), Arc::clone(&workflow)), step))
            .collect();

        info!(
            "Starting workflow '{}' ({} steps, {} instances)",
            workflow.name(),
            steps.len(),
            steps.iter().map(|(_, s)| s.create_instances.len()).sum::<usize>()
        );

        prepare_steps(&mut steps)?;

        // Watch for the cancel flag
        let watcher_running = Arc::new(AtomicBool::new(true));
        let watcher_handle = self.cancel_flag_path.clone().map(|path| {
            let running = Arc::clone(&watcher_running);
            let cancel = self.cancel.clone();
            thread::spawn(move || {
                while running.load(Ordering::Relaxed) && !cancel.is_canceled() {
                    check_cancel_flag(&path, &cancel);
                    thread::sleep(CANCEL_CHECK_INTERVAL);
                }
            })
        });

        let mut state = ProvisionState::new(&self.workflow_path);
        let mut failure = None;

        for (ctx, step) in steps.iter_mut() {
            if let Some(path) = &self.cancel_flag_path {
                check_cancel_flag(path, &self.cancel);
            }
            if self.cancel.is_canceled() {
                break;
            }

            info!("Starting step: {}", ctx.name);
            match step.create_instances.run(ctx) {
                Ok(()) => info!("Step '{}' completed", ctx.name),
                Err(e) => {
                    error!("Step '{}' failed: {}", ctx.name, e);
                    state.mark_failed(&ctx.name);
                    failure = Some(format!("Workflow failed at step '{}': {}", ctx.name, e));
                    break;
                }
            }
        }

        settle(&workflow, &steps);

        watcher_running.store(false, Ordering::Relaxed);
        if let Some(handle) = watcher_handle {
            if handle.join().is_err() {
                warn!("Cancel flag watcher panicked");
            }
        }

        for (_, step) in &steps {
            for link in step.create_instances.created_links() {
                state.mark_created(link);
            }
        }
        if self.cancel.is_canceled() {
            info!("Workflow '{}' canceled", workflow.name());
            state.mark_canceled();
        }
        state.save(&self.state_dir)?;

        println!("{}", workflow.timeline.gantt_chart());

        if let Some(message) = failure {
            return Err(message.into());
        }

        println!();
        if state.canceled {
            println!("Workflow canceled");
        } else {
            println!("Workflow completed successfully");
        }
        println!("Instances created: {}", state.created_instances.len());
        println!("Total execution time: {:.2?}", start_time.elapsed());

        Ok(state)
    }

    fn build_context(&self) -> WorkflowContext {
        let mut config = WorkflowConfig::from_workflow(&self.workflow);
        if let Some(interval) = self.serial_interval {
            config.serial_interval = interval;
        }

        WorkflowContext::new(
            config,
            Arc::clone(&self.compute),
            Arc::clone(&self.storage),
            Arc::clone(&self.sink),
        )
        .with_registries(Registries::from_links(&self.workflow.resources))
        .with_cancel_signal(self.cancel.clone())
    }
}

/// Populates, then validates, every step.
///
/// All steps are populated before any is validated; errors within each
/// phase are collected across steps.
fn prepare_steps(steps: &mut [(StepContext, StepDefinition)]) -> Result<(), Box<dyn Error>> {
    let errors: Vec<StepError> = steps
        .iter_mut()
        .filter_map(|(ctx, step)| step.create_instances.populate(ctx).err())
        .collect();
    if let Err(e) = StepError::aggregate(errors) {
        return Err(format!("Workflow population failed:\n{}", e).into());
    }

    let errors: Vec<StepError> = steps
        .iter()
        .filter_map(|(ctx, step)| step.create_instances.validate(ctx).err())
        .collect();
    if let Err(e) = StepError::aggregate(errors) {
        return Err(format!("Workflow validation failed:\n{}", e).into());
    }

    Ok(())
}

/// Waits for creations still in flight and every log streamer.
///
/// A failed step returns while sibling creations continue; those may
/// still register streamers, so this loops until both have drained.
fn settle(workflow: &WorkflowContext, steps: &[(StepContext, StepDefinition)]) {
    loop {
        let joined = workflow.log_streams.wait();
        if joined > 0 {
            info!("{} serial port streamer(s) finished", joined);
        }

        let in_flight: usize = steps.iter().map(|(_, s)| s.create_instances.in_flight()).sum();
        if in_flight == 0 && workflow.log_streams.is_empty() {
            return;
        }
        thread::sleep(SETTLE_INTERVAL);
    }
}

/// Cancels `cancel` if a file exists at `path`.
fn check_cancel_flag(path: &Path, cancel: &CancelSignal) {
    if path.exists() && !cancel.is_canceled() {
        info!("Cancel flag {} found - canceling workflow", path.display());
        cancel.cancel();
    }
}
