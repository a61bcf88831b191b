//! CreateInstances Step
//!
//! Creates every instance of the step in parallel:
//! - One worker thread per instance resolves its references and calls the provider
//! - Each created instance gets a serial console streamer that outlives the step
//! - The first creation failure fails the step without waiting for the others
//! - Cancellation waits for in-flight creations, then reports success so
//!   that a cleanup step can delete whatever was created

use std::collections::HashSet;
use std::sync::mpsc::channel;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use log::{debug, error, info, warn};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::StepError;
use crate::monitoring::EventType;
use crate::workflow::validator::{populate_instance, validate_instance, ValidationError};
use crate::workflow::{resolve_references, Instance, InstanceState};

use super::context::StepContext;
use super::serial::SerialLogStreamer;
use super::step::StepAction;

/// Step kind reported in log messages.
pub const STEP_KIND: &str = "CreateInstances";

type SharedInstance = Arc<Mutex<Instance>>;

/// Messages from creation workers to the coordinating `run`.
#[derive(Debug)]
enum TaskEvent {
    Failed(StepError),
    /// Every worker has returned
    Finished,
    Canceled,
}

/// A step that creates a set of instances concurrently.
///
/// Each instance is only touched by its own worker once `run` starts;
/// [`snapshot`](Self::snapshot) copies the current specifications and
/// states for inspection.
#[derive(Debug, Default)]
pub struct CreateInstances {
    instances: Vec<SharedInstance>,
}

impl CreateInstances {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self {
            instances: instances
                .into_iter()
                .map(|instance| Arc::new(Mutex::new(instance)))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Copies of the instances as they are now.
    pub fn snapshot(&self) -> Vec<Instance> {
        self.instances
            .iter()
            .map(|instance| lock(instance).clone())
            .collect()
    }

    /// Number of instances whose creation call has not yet settled.
    pub fn in_flight(&self) -> usize {
        self.instances
            .iter()
            .filter(|instance| lock(instance).state == InstanceState::Creating)
            .count()
    }

    /// Links of instances the provider has created.
    pub fn created_links(&self) -> Vec<String> {
        self.instances
            .iter()
            .map(|instance| lock(instance))
            .filter(|instance| instance.state == InstanceState::Created)
            .map(|instance| instance.link())
            .collect()
    }
}

impl From<Vec<Instance>> for CreateInstances {
    fn from(instances: Vec<Instance>) -> Self {
        Self::new(instances)
    }
}

impl Serialize for CreateInstances {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CreateInstances {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<Instance>::deserialize(deserializer).map(Self::new)
    }
}

impl StepAction for CreateInstances {
    fn kind(&self) -> &'static str {
        STEP_KIND
    }

    fn populate(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        let defaults = ctx.workflow.config.defaults();
        let mut errors = Vec::new();

        for instance in &self.instances {
            let problems = populate_instance(&mut lock(instance), &defaults);
            errors.extend(problems.into_iter().map(|source| StepError::Validation {
                step: ctx.name.clone(),
                source,
            }));
        }

        StepError::aggregate(errors)
    }

    fn validate(&self, ctx: &StepContext) -> Result<(), StepError> {
        let mut problems = Vec::new();
        let mut seen = HashSet::new();

        for instance in self.snapshot() {
            if !seen.insert(instance.name.clone()) {
                problems.push(ValidationError::DuplicateName(instance.name.clone()));
            }
            problems.extend(validate_instance(&instance));
        }

        let errors = problems
            .into_iter()
            .map(|source| StepError::Validation {
                step: ctx.name.clone(),
                source,
            })
            .collect();
        StepError::aggregate(errors)
    }

    /// Creates all instances concurrently.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - Every creation succeeded, or the workflow was canceled
    ///   (in which case all in-flight creations have returned)
    /// * `Err` - The first creation failure; remaining workers keep running
    fn run(&mut self, ctx: &StepContext) -> Result<(), StepError> {
        // The channel is unbounded, so a worker reporting a failure after
        // the outcome is decided never blocks.
        let (tx, rx) = channel();

        let cancel_tx = tx.clone();
        let _registration = ctx.workflow.cancel.on_cancel(move || {
            let _ = cancel_tx.send(TaskEvent::Canceled);
        });

        let mut workers = Vec::with_capacity(self.instances.len());
        for instance in &self.instances {
            let name = lock(instance).name.clone();
            let worker_ctx = ctx.clone();
            let worker_instance = Arc::clone(instance);
            let worker_tx = tx.clone();

            let handle = thread::Builder::new()
                .name(format!("create-{}", name))
                .spawn(move || {
                    if let Err(err) = create_instance(&worker_ctx, &worker_instance) {
                        let _ = worker_tx.send(TaskEvent::Failed(err));
                    }
                })
                .map_err(StepError::Spawn)?;
            workers.push((name, handle));
        }

        thread::Builder::new()
            .name(format!("{}-join", ctx.name))
            .spawn(move || {
                for (name, handle) in workers {
                    if handle.join().is_err() {
                        let _ = tx.send(TaskEvent::Failed(StepError::TaskPanicked(name)));
                    }
                }
                let _ = tx.send(TaskEvent::Finished);
            })
            .map_err(StepError::Spawn)?;

        match rx.recv() {
            Ok(TaskEvent::Failed(err)) => Err(err),
            Ok(TaskEvent::Finished) | Err(_) => Ok(()),
            Ok(TaskEvent::Canceled) => {
                info!(
                    "Step '{}' canceled, waiting for in-flight instance creations",
                    ctx.name
                );
                // Wait so instances being created now can be deleted.
                for event in rx.iter() {
                    match event {
                        TaskEvent::Finished => break,
                        TaskEvent::Failed(err) => debug!("Ignoring error after cancellation: {}", err),
                        TaskEvent::Canceled => {}
                    }
                }
                Ok(())
            }
        }
    }
}

/// Creates one instance and starts streaming its serial console.
fn create_instance(ctx: &StepContext, instance: &Mutex<Instance>) -> Result<(), StepError> {
    let workflow = &ctx.workflow;

    let spec = {
        let mut instance = lock(instance);
        resolve_references(&mut instance, &workflow.registries);
        instance.state = InstanceState::Creating;
        instance.clone()
    };

    ctx.info(STEP_KIND, &format!("Creating instance {:?}.", spec.name));
    workflow.timeline.add_event(&spec.name, EventType::Creating);

    if let Err(err) = workflow
        .compute
        .create_instance(&spec.project, &spec.zone, &spec)
    {
        warn!("Instance {:?} could not be created: {}", spec.name, err);
        lock(instance).state = InstanceState::Failed;
        workflow.timeline.add_event(&spec.name, EventType::CreateFailed);
        return Err(StepError::CreateInstances(err));
    }

    workflow.timeline.add_event(&spec.name, EventType::Created);
    ctx.info(STEP_KIND, &format!("Instance {:?} created.", spec.name));

    let streamer = SerialLogStreamer::new(ctx.clone(), &spec);
    if let Err(err) = workflow
        .log_streams
        .spawn(format!("serial-{}", spec.name), move || {
            streamer.run();
        })
    {
        error!(
            "Failed to start serial port streaming for instance {:?}: {}",
            spec.name, err
        );
    }

    // An instance leaves `Creating` only after its streamer is registered.
    lock(instance).state = InstanceState::Created;
    Ok(())
}

fn lock(instance: &Mutex<Instance>) -> MutexGuard<'_, Instance> {
    instance.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::{WorkflowConfig, WorkflowContext};
    use crate::testing::{
        output, test_context, wait_until, FakeCompute, RecordingSink, RecordingStorage,
    };
    use crate::workflow::{AttachedDisk, NetworkInterface, Registries, ResourceLinks};
    use std::time::Duration;

    struct Harness {
        compute: Arc<FakeCompute>,
        sink: Arc<RecordingSink>,
        ctx: StepContext,
    }

    fn harness() -> Harness {
        let compute = Arc::new(FakeCompute::default());
        let sink = Arc::new(RecordingSink::default());
        let ctx = test_context(
            compute.clone(),
            Arc::new(RecordingStorage::default()),
            sink.clone(),
        );
        Harness { compute, sink, ctx }
    }

    fn step(count: usize) -> CreateInstances {
        CreateInstances::new(
            (0..count)
                .map(|i| {
                    Instance::new(format!("vm-{}", i))
                        .with_project("proj")
                        .with_zone("zone-a")
                        .with_disk(AttachedDisk::from_source(format!("disk-{}", i)))
                })
                .collect(),
        )
    }

    fn run_in_background(
        mut step: CreateInstances,
        ctx: StepContext,
    ) -> thread::JoinHandle<(CreateInstances, Result<(), StepError>)> {
        thread::spawn(move || {
            let result = step.run(&ctx);
            (step, result)
        })
    }

    #[test]
    fn test_all_creations_succeed() {
        let h = harness();
        let mut step = step(4);

        assert!(step.run(&h.ctx).is_ok());
        assert_eq!(h.compute.attempt_count(), 4);

        assert_eq!(h.ctx.workflow.log_streams.wait(), 4);
        assert_eq!(h.sink.serial_logs().len(), 4);
        assert_eq!(h.sink.infos_containing("Streaming instance"), 4);
        assert_eq!(step.created_links().len(), 4);
        assert!(step
            .snapshot()
            .iter()
            .all(|i| i.state == InstanceState::Created));
    }

    #[test]
    fn test_empty_step_succeeds() {
        let h = harness();
        assert!(CreateInstances::default().run(&h.ctx).is_ok());
        assert_eq!(h.compute.attempt_count(), 0);
    }

    #[test]
    fn test_creation_failure_fails_step() {
        let h = harness();
        h.compute.fail_creation("vm-2");
        let mut step = step(5);

        let err = step.run(&h.ctx).unwrap_err();
        assert!(matches!(err, StepError::CreateInstances(_)));
        assert_eq!(err.to_string(), "failed to create instances: cannot create vm-2");

        // Siblings are not canceled.
        assert!(wait_until(|| h.compute.attempt_count() == 5));
        assert!(wait_until(|| h.ctx.workflow.log_streams.len() == 4));
        assert_eq!(h.ctx.workflow.log_streams.wait(), 4);
        assert_eq!(step.created_links().len(), 4);
    }

    #[test]
    fn test_failure_returns_without_waiting_for_siblings() {
        let h = harness();
        h.compute.fail_creation_early("vm-0");
        h.compute.gate.close();

        let handle = run_in_background(step(3), h.ctx.clone());
        assert!(h.compute.gate.wait_for_arrivals(2));

        // The step returns while both siblings are still held.
        assert!(wait_until(|| handle.is_finished()));
        let (step, result) = handle.join().unwrap();
        assert_eq!(
            result.unwrap_err().to_string(),
            "failed to create instances: cannot create vm-0"
        );
        assert_eq!(step.in_flight(), 2);
        assert!(step.created_links().is_empty());

        h.compute.gate.open();
        assert!(wait_until(|| step.in_flight() == 0));
        assert_eq!(h.ctx.workflow.log_streams.wait(), 2);
        assert_eq!(step.created_links().len(), 2);
    }

    #[test]
    fn test_failure_before_cancellation_is_returned() {
        let h = harness();
        h.compute.fail_creation_early("vm-1");
        h.compute.gate.close();

        let handle = run_in_background(step(3), h.ctx.clone());
        assert!(h.compute.gate.wait_for_arrivals(2));
        assert!(wait_until(|| handle.is_finished()));

        h.ctx.workflow.cancel.cancel();
        h.compute.gate.open();

        let (step, result) = handle.join().unwrap();
        assert!(matches!(result, Err(StepError::CreateInstances(_))));

        assert!(wait_until(|| step.in_flight() == 0));
        h.ctx.workflow.log_streams.wait();
        assert_eq!(step.created_links().len(), 2);
    }

    #[test]
    fn test_multiple_failures_do_not_block_workers() {
        let h = harness();
        for i in 0..6 {
            h.compute.fail_creation(&format!("vm-{}", i));
        }
        let mut step = step(6);

        assert!(step.run(&h.ctx).is_err());
        assert!(wait_until(|| step
            .snapshot()
            .iter()
            .all(|i| i.state == InstanceState::Failed)));
    }

    #[test]
    fn test_cancellation_waits_and_suppresses_errors() {
        let h = harness();
        h.compute.fail_creation("vm-1");
        h.compute.gate.close();

        let handle = run_in_background(step(3), h.ctx.clone());
        assert!(h.compute.gate.wait_for_arrivals(3));

        h.ctx.workflow.cancel.cancel();
        h.compute.gate.open();

        let (step, result) = handle.join().unwrap();
        assert!(result.is_ok());

        // Every in-flight creation returned before the step did.
        assert_eq!(h.compute.attempt_count(), 3);
        let states: Vec<InstanceState> = step.snapshot().iter().map(|i| i.state).collect();
        assert!(!states.contains(&InstanceState::Creating));
        assert_eq!(step.created_links().len(), 2);

        // Streamers notice the cancellation on their own.
        h.ctx.workflow.log_streams.wait();
    }

    #[test]
    fn test_cancellation_before_run() {
        let h = harness();
        h.compute.fail_creation("vm-0");
        h.ctx.workflow.cancel.cancel();

        let mut step = step(2);
        assert!(step.run(&h.ctx).is_ok());
        assert_eq!(h.compute.attempt_count(), 2);
        h.ctx.workflow.log_streams.wait();
    }

    #[test]
    fn test_references_resolved_before_create() {
        let compute = Arc::new(FakeCompute::default());
        let mut links = ResourceLinks::default();
        links.disks.insert(
            "disk-0".to_string(),
            "projects/proj/zones/zone-a/disks/disk-0-1234".to_string(),
        );
        links.networks.insert(
            "net".to_string(),
            "projects/proj/global/networks/net-1234".to_string(),
        );

        let mut config = WorkflowConfig::new("wf");
        config.serial_interval = Duration::from_millis(1);
        let workflow = WorkflowContext::new(
            config,
            compute.clone(),
            Arc::new(RecordingStorage::default()),
            Arc::new(RecordingSink::default()),
        )
        .with_registries(Registries::from_links(&links));
        let ctx = StepContext::new("create", Arc::new(workflow));

        let mut step = CreateInstances::new(vec![Instance::new("vm")
            .with_project("proj")
            .with_zone("zone-a")
            .with_disk(AttachedDisk::from_source("disk-0"))
            .with_disk(AttachedDisk::from_source("projects/other/zones/z/disks/shared"))
            .with_network_interface(NetworkInterface::on_network("net"))]);
        step.run(&ctx).unwrap();

        let sent = &compute.attempts()[0];
        assert_eq!(sent.disks[0].source, "projects/proj/zones/zone-a/disks/disk-0-1234");
        assert_eq!(sent.disks[1].source, "projects/other/zones/z/disks/shared");
        assert_eq!(sent.network_interfaces[0].network, "projects/proj/global/networks/net-1234");

        // The step's own copy is resolved too, for later steps.
        assert_eq!(step.snapshot()[0].disks[0].source, sent.disks[0].source);
        ctx.workflow.log_streams.wait();
    }

    #[test]
    fn test_streamer_started_per_created_instance() {
        let h = harness();
        h.compute.fail_creation("vm-1");
        h.compute.script_serial("vm-0", vec![output("boot\n", 5)]);
        let mut step = step(2);

        let _ = step.run(&h.ctx);
        assert!(wait_until(|| h.compute.attempt_count() == 2));
        assert!(wait_until(|| h.ctx.workflow.log_streams.len() == 1));
        h.ctx.workflow.log_streams.wait();
        assert_eq!(h.sink.infos_containing("Instance \"vm-0\" created."), 1);

        let logs = h.sink.serial_logs();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].1, "vm-0");
        assert_eq!(logs[0].2, "boot\n");
    }

    #[test]
    fn test_creation_logs_step_info() {
        let h = harness();
        step(1).run(&h.ctx).unwrap();
        h.ctx.workflow.log_streams.wait();

        assert_eq!(
            h.sink.infos_containing("[test-step] CreateInstances: Creating instance \"vm-0\"."),
            1
        );
    }

    #[test]
    fn test_populate_and_validate() {
        let h = harness();
        let mut step = CreateInstances::new(vec![
            Instance::new("vm-a").with_disk(AttachedDisk::from_source("d")),
            Instance::new("vm-b").with_disk(AttachedDisk::from_image("img")),
        ]);

        step.populate(&h.ctx).unwrap();
        step.validate(&h.ctx).unwrap();

        let instances = step.snapshot();
        assert_eq!(instances[0].project, "proj");
        assert_eq!(instances[1].zone, "zone-a");
    }

    #[test]
    fn test_validate_aggregates_across_instances() {
        let h = harness();
        let mut step = CreateInstances::new(vec![
            Instance::new("dup").with_disk(AttachedDisk::from_source("d")),
            Instance::new("dup").with_disk(AttachedDisk::from_source("d")),
            Instance::new("no-disks"),
        ]);
        step.populate(&h.ctx).unwrap();

        let err = step.validate(&h.ctx).unwrap_err();
        assert_eq!(err.count(), 2);
        let message = err.to_string();
        assert!(message.contains("used more than once"));
        assert!(message.contains("has no disks"));
        assert!(message.contains("step \"test-step\""));
    }

    #[test]
    fn test_populate_aggregates_errors() {
        let compute = Arc::new(FakeCompute::default());
        let workflow = WorkflowContext::new(
            WorkflowConfig::new("wf"),
            compute,
            Arc::new(RecordingStorage::default()),
            Arc::new(RecordingSink::default()),
        );
        let ctx = StepContext::new("create", Arc::new(workflow));

        let mut step = CreateInstances::new(vec![Instance::new("a"), Instance::new("b")]);
        let err = step.populate(&ctx).unwrap_err();
        assert_eq!(err.count(), 4);
    }

    #[test]
    fn test_deserialize_from_list() {
        let step: CreateInstances =
            serde_yaml::from_str("- name: vm-1\n- name: vm-2\n  zone: z\n").unwrap();
        assert_eq!(step.len(), 2);
        assert_eq!(step.snapshot()[1].zone, "z");

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json[0]["name"], "vm-1");
    }
}
