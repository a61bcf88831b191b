//! Workflow-Level Streamer Group
//!
//! Background threads that outlive the step that started them register
//! here instead of with the step. The workflow drains the group before
//! it considers itself finished.

use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error};

/// Tracks detached background threads for a whole workflow.
#[derive(Debug, Default)]
pub struct StreamerGroup {
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl StreamerGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts `work` on a named thread and registers it with the group.
    pub fn spawn<F>(&self, name: impl Into<String>, work: F) -> io::Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(work)?;
        self.lock().push((name, handle));
        Ok(())
    }

    /// Number of registered threads not yet joined by [`wait`](Self::wait).
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Blocks until every registered thread has finished, including
    /// threads registered while waiting. Returns how many were joined.
    pub fn wait(&self) -> usize {
        let mut joined = 0;

        loop {
            let handles = std::mem::take(&mut *self.lock());
            if handles.is_empty() {
                return joined;
            }

            for (name, handle) in handles {
                if handle.join().is_err() {
                    error!("Background thread '{}' panicked", name);
                } else {
                    debug!("Background thread '{}' finished", name);
                }
                joined += 1;
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(String, JoinHandle<()>)>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
