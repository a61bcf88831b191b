//! Test doubles for the provider, storage and log sink.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::cloud::{ComputeClient, ObjectWriter, SerialPortOutput, StorageClient};
use crate::error::{ProviderError, StorageError};
use crate::execution::context::{StepContext, WorkflowConfig, WorkflowContext};
use crate::monitoring::LogSink;
use crate::workflow::Instance;

const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// Polls `condition` until it holds or five seconds pass.
pub fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_LIMIT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn output(contents: &str, next: i64) -> Result<SerialPortOutput, ProviderError> {
    Ok(SerialPortOutput {
        contents: contents.to_string(),
        next,
    })
}

/// A step context over the given fakes, polling every millisecond.
pub fn test_context(
    compute: Arc<FakeCompute>,
    storage: Arc<RecordingStorage>,
    sink: Arc<RecordingSink>,
) -> StepContext {
    let mut config = WorkflowConfig::new("test-wf");
    config.project = "proj".to_string();
    config.zone = "zone-a".to_string();
    config.serial_interval = Duration::from_millis(1);

    let workflow = WorkflowContext::new(config, compute, storage, sink);
    StepContext::new("test-step", Arc::new(workflow))
}

#[derive(Debug)]
struct GateState {
    open: bool,
    arrivals: usize,
}

/// Holds callers until opened, counting how many are waiting.
#[derive(Debug)]
pub struct Gate {
    state: Mutex<GateState>,
    changed: Condvar,
}

impl Default for Gate {
    fn default() -> Self {
        Self {
            state: Mutex::new(GateState {
                open: true,
                arrivals: 0,
            }),
            changed: Condvar::new(),
        }
    }
}

impl Gate {
    pub fn close(&self) {
        self.state.lock().unwrap().open = false;
    }

    pub fn open(&self) {
        self.state.lock().unwrap().open = true;
        self.changed.notify_all();
    }

    fn pass(&self) {
        let mut state = self.state.lock().unwrap();
        state.arrivals += 1;
        self.changed.notify_all();
        while !state.open {
            state = self.changed.wait(state).unwrap();
        }
    }

    /// Waits until `count` callers have arrived.
    pub fn wait_for_arrivals(&self, count: usize) -> bool {
        let state = self.state.lock().unwrap();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, WAIT_LIMIT, |s| s.arrivals < count)
            .unwrap();
        state.arrivals >= count
    }
}

/// Scriptable compute provider.
///
/// Creation succeeds unless the name was marked with `fail_creation`
/// (fails after passing the gate) or `fail_creation_early` (fails
/// without waiting at the gate).
/// Serial output comes from a per-instance script; once it runs out
/// fetches fail. Status defaults to `TERMINATED`.
#[derive(Debug, Default)]
pub struct FakeCompute {
    pub gate: Gate,
    attempts: Mutex<Vec<Instance>>,
    /// Failing names; `true` when the failure skips the gate
    failures: Mutex<HashMap<String, bool>>,
    serial: Mutex<HashMap<String, VecDeque<Result<SerialPortOutput, ProviderError>>>>,
    fetch_offsets: Mutex<Vec<i64>>,
    statuses: Mutex<HashMap<String, Option<String>>>,
}

impl FakeCompute {
    pub fn fail_creation(&self, name: &str) {
        self.failures.lock().unwrap().insert(name.to_string(), false);
    }

    pub fn fail_creation_early(&self, name: &str) {
        self.failures.lock().unwrap().insert(name.to_string(), true);
    }

    pub fn script_serial(&self, name: &str, outputs: Vec<Result<SerialPortOutput, ProviderError>>) {
        self.serial
            .lock()
            .unwrap()
            .insert(name.to_string(), outputs.into());
    }

    /// Sets the status reported for `name`; `None` makes the query fail.
    pub fn set_status(&self, name: &str, status: Option<&str>) {
        self.statuses
            .lock()
            .unwrap()
            .insert(name.to_string(), status.map(str::to_string));
    }

    /// Instances passed to `create_instance`, in call order.
    pub fn attempts(&self) -> Vec<Instance> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn fetch_offsets(&self) -> Vec<i64> {
        self.fetch_offsets.lock().unwrap().clone()
    }
}

impl ComputeClient for FakeCompute {
    fn create_instance(
        &self,
        _project: &str,
        _zone: &str,
        instance: &Instance,
    ) -> Result<(), ProviderError> {
        let failure = self.failures.lock().unwrap().get(&instance.name).copied();
        if failure != Some(true) {
            self.gate.pass();
        }
        self.attempts.lock().unwrap().push(instance.clone());

        if failure.is_some() {
            return Err(ProviderError::Api(format!("cannot create {}", instance.name)));
        }
        Ok(())
    }

    fn get_serial_port_output(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
        _port: u32,
        start: i64,
    ) -> Result<SerialPortOutput, ProviderError> {
        self.fetch_offsets.lock().unwrap().push(start);
        self.serial
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Err(ProviderError::Api("no more output".to_string())))
    }

    fn instance_status(
        &self,
        _project: &str,
        _zone: &str,
        name: &str,
    ) -> Result<String, ProviderError> {
        match self.statuses.lock().unwrap().get(name) {
            Some(Some(status)) => Ok(status.clone()),
            Some(None) => Err(ProviderError::Api("status unavailable".to_string())),
            None => Ok("TERMINATED".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub content_type: String,
    pub data: String,
}

/// Storage that records finalized objects and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingStorage {
    objects: Arc<Mutex<Vec<StoredObject>>>,
    fail_writes: AtomicBool,
    fail_finalize: AtomicBool,
}

impl RecordingStorage {
    pub fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub fn fail_finalize(&self) {
        self.fail_finalize.store(true, Ordering::SeqCst);
    }

    /// Every finalized write, in order.
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects.lock().unwrap().clone()
    }
}

impl StorageClient for RecordingStorage {
    fn writer(&self, path: &str, content_type: &str) -> Box<dyn ObjectWriter> {
        Box::new(RecordingWriter {
            objects: Arc::clone(&self.objects),
            object: StoredObject {
                path: path.to_string(),
                content_type: content_type.to_string(),
                data: String::new(),
            },
            fail_write: self.fail_writes.load(Ordering::SeqCst),
            fail_finalize: self.fail_finalize.load(Ordering::SeqCst),
        })
    }
}

struct RecordingWriter {
    objects: Arc<Mutex<Vec<StoredObject>>>,
    object: StoredObject,
    fail_write: bool,
    fail_finalize: bool,
}

impl ObjectWriter for RecordingWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if self.fail_write {
            return Err(StorageError::Rejected("write refused".to_string()));
        }
        self.object.data.push_str(&String::from_utf8_lossy(data));
        Ok(())
    }

    fn finalize(self: Box<Self>) -> Result<(), StorageError> {
        if self.fail_finalize {
            return Err(StorageError::Rejected("finalize refused".to_string()));
        }
        self.objects.lock().unwrap().push(self.object);
        Ok(())
    }
}

/// Sink that records step messages and serial log hand-offs.
#[derive(Debug, Default)]
pub struct RecordingSink {
    infos: Mutex<Vec<String>>,
    serial_logs: Mutex<Vec<(String, String, String)>>,
}

impl RecordingSink {
    pub fn infos(&self) -> Vec<String> {
        self.infos.lock().unwrap().clone()
    }

    pub fn infos_containing(&self, needle: &str) -> usize {
        self.infos().iter().filter(|m| m.contains(needle)).count()
    }

    /// `(workflow, instance, contents)` for every hand-off.
    pub fn serial_logs(&self) -> Vec<(String, String, String)> {
        self.serial_logs.lock().unwrap().clone()
    }
}

impl LogSink for RecordingSink {
    fn step_info(&self, step_name: &str, step_kind: &str, message: &str) {
        self.infos
            .lock()
            .unwrap()
            .push(format!("[{}] {}: {}", step_name, step_kind, message));
    }

    fn write_serial_port_logs(&self, workflow: &str, instance: &str, contents: &str) {
        self.serial_logs.lock().unwrap().push((
            workflow.to_string(),
            instance.to_string(),
            contents.to_string(),
        ));
    }
}
