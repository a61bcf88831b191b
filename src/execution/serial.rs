//! Serial Console Streaming
//!
//! Each created instance gets a streamer that polls its serial console
//! on a fixed interval and keeps a cumulative copy of the output in
//! object storage. A streamer stops when:
//! - the instance reports a stopped or terminated status,
//! - a fetch fails for any other reason, or
//! - the workflow is canceled.
//!
//! Streaming problems never fail the step; they are logged at most.

use std::thread;
use std::time::{Duration, Instant};

use log::debug;
use thiserror::Error;

use crate::cloud::is_terminal_status;
use crate::error::StorageError;
use crate::monitoring::EventType;
use crate::workflow::Instance;

use super::context::StepContext;
use super::create_instances::STEP_KIND;

/// Content type of stored console logs.
pub const LOG_CONTENT_TYPE: &str = "text/plain";

/// Object path of an instance's console log under `logs_root`.
pub fn serial_log_path(logs_root: &str, instance: &str, port: u32) -> String {
    let file = format!("{}-serial-port{}.log", instance, port);
    match logs_root.trim_end_matches('/') {
        "" => file,
        root => format!("{}/{}", root, file),
    }
}

/// Why a streamer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// Fetch failed and the instance is stopped or stopping
    InstanceStopped,
    /// Fetch failed for any other reason
    FetchFailed,
    Canceled,
}

/// Console output collected so far, with the offset to fetch from next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBuffer {
    contents: String,
    next_offset: i64,
}

impl LogBuffer {
    /// Appends `contents` and moves the cursor to `next`.
    /// The cursor never moves backwards.
    pub fn record(&mut self, contents: &str, next: i64) {
        self.contents.push_str(contents);
        self.next_offset = self.next_offset.max(next);
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }
}

/// Repeating timer. The first tick fires one interval after creation;
/// ticks missed while the caller was busy are dropped.
#[derive(Debug)]
struct Ticker {
    interval: Duration,
    next: Instant,
}

impl Ticker {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            next: Instant::now() + interval,
        }
    }

    /// Blocks until the next tick.
    fn tick(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }

        self.next += self.interval;
        let now = Instant::now();
        if self.next < now {
            self.next = now + self.interval;
        }
    }
}

#[derive(Debug, Error)]
enum StoreFailure {
    #[error("error writing log to storage: {0}")]
    Write(StorageError),
    #[error("error saving log to storage: {0}")]
    Finalize(StorageError),
}

/// Polls one instance's serial console until a stop condition is met.
#[derive(Debug)]
pub struct SerialLogStreamer {
    ctx: StepContext,
    project: String,
    zone: String,
    instance: String,
    port: u32,
    interval: Duration,
}

impl SerialLogStreamer {
    /// Streams `instance` using the workflow's port and interval.
    pub fn new(ctx: StepContext, instance: &Instance) -> Self {
        let config = &ctx.workflow.config;
        let port = config.serial_port;
        let interval = config.serial_interval;

        Self {
            project: instance.project.clone(),
            zone: instance.zone.clone(),
            instance: instance.name.clone(),
            port,
            interval,
            ctx,
        }
    }

    /// Storage path this streamer writes to.
    pub fn object_path(&self) -> String {
        serial_log_path(&self.ctx.workflow.config.logs_path, &self.instance, self.port)
    }

    /// Runs the polling loop to completion, then hands the collected
    /// output to the log sink.
    pub fn run(self) -> StreamEnd {
        let workflow = &self.ctx.workflow;
        let path = self.object_path();

        self.ctx.info(
            STEP_KIND,
            &format!(
                "Streaming instance {:?} serial port {} output to {}",
                self.instance,
                self.port,
                workflow.storage.object_url(&path)
            ),
        );
        workflow.timeline.add_event(&self.instance, EventType::StreamStarted);

        let mut buffer = LogBuffer::default();
        let mut storage_error_logged = false;
        let mut ticker = Ticker::new(self.interval);

        let end = loop {
            ticker.tick();
            if let Some(end) = self.poll(&mut buffer, &path, &mut storage_error_logged) {
                break end;
            }
        };

        debug!(
            "Serial port {} streaming for instance {:?} stopped: {:?}",
            self.port, self.instance, end
        );
        workflow.timeline.add_event(&self.instance, EventType::StreamEnded);
        workflow
            .sink
            .write_serial_port_logs(workflow.name(), &self.instance, buffer.contents());

        end
    }

    /// One tick: fetch, store, then check for cancellation if the tick
    /// succeeded.
    fn poll(
        &self,
        buffer: &mut LogBuffer,
        path: &str,
        storage_error_logged: &mut bool,
    ) -> Option<StreamEnd> {
        let compute = &self.ctx.workflow.compute;

        let output = match compute.get_serial_port_output(
            &self.project,
            &self.zone,
            &self.instance,
            self.port,
            buffer.next_offset(),
        ) {
            Ok(output) => output,
            Err(err) => {
                // Fetches fail once the instance shuts down.
                if let Ok(status) = compute.instance_status(&self.project, &self.zone, &self.instance) {
                    if is_terminal_status(&status) {
                        return Some(StreamEnd::InstanceStopped);
                    }
                }
                self.ctx.info(
                    STEP_KIND,
                    &format!("Instance {:?}: error getting serial port: {}", self.instance, err),
                );
                return Some(StreamEnd::FetchFailed);
            }
        };

        buffer.record(&output.contents, output.next);

        if let Err(err) = self.store(buffer, path) {
            let first = !*storage_error_logged;
            if first {
                *storage_error_logged = true;
                self.ctx
                    .info(STEP_KIND, &format!("Instance {:?}: {}", self.instance, err));
            }
            // A failed tick skips the cancellation check, except for a
            // repeated finalize error.
            if first || matches!(err, StoreFailure::Write(_)) {
                return None;
            }
        }

        if self.ctx.is_canceled() {
            return Some(StreamEnd::Canceled);
        }
        None
    }

    /// Replaces the stored log with the whole buffer.
    fn store(&self, buffer: &LogBuffer, path: &str) -> Result<(), StoreFailure> {
        let mut writer = self.ctx.workflow.storage.writer(path, LOG_CONTENT_TYPE);
        writer
            .write(buffer.contents().as_bytes())
            .map_err(StoreFailure::Write)?;
        writer.finalize().map_err(StoreFailure::Finalize)
    }
}
