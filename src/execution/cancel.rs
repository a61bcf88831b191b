//! Workflow Cancellation
//!
//! A workflow-wide stop request. It is set once by whoever controls the
//! workflow and only observed by steps: loops poll [`CancelSignal::is_canceled`]
//! between units of work, while waiters that must react immediately
//! register a callback with [`CancelSignal::on_cancel`].

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct Callbacks {
    next_id: u64,
    pending: HashMap<u64, Callback>,
}

#[derive(Default)]
struct Inner {
    canceled: AtomicBool,
    callbacks: Mutex<Callbacks>,
}

/// Cloneable handle to a workflow's cancellation state.
#[derive(Clone, Default)]
pub struct CancelSignal {
    inner: Arc<Inner>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the workflow. Later calls have no effect.
    pub fn cancel(&self) {
        let pending = {
            let mut callbacks = self.lock();
            if self.inner.canceled.swap(true, Ordering::SeqCst) {
                return;
            }
            std::mem::take(&mut callbacks.pending)
        };

        for (_, callback) in pending {
            callback();
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.canceled.load(Ordering::SeqCst)
    }

    /// Runs `callback` once the workflow is canceled.
    ///
    /// If cancellation already happened the callback runs immediately on
    /// the calling thread. Otherwise it runs on the thread that calls
    /// [`cancel`](Self::cancel), unless the returned registration has
    /// been dropped by then.
    pub fn on_cancel<F>(&self, callback: F) -> CancelRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut callbacks = self.lock();
        if self.is_canceled() {
            drop(callbacks);
            callback();
            return CancelRegistration { signal: None, id: 0 };
        }

        let id = callbacks.next_id;
        callbacks.next_id += 1;
        callbacks.pending.insert(id, Box::new(callback));

        CancelRegistration {
            signal: Some(self.clone()),
            id,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Callbacks> {
        self.inner
            .callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

/// Keeps an [`on_cancel`](CancelSignal::on_cancel) callback registered.
/// Dropping it unregisters the callback.
#[must_use = "the callback is unregistered when this is dropped"]
pub struct CancelRegistration {
    signal: Option<CancelSignal>,
    id: u64,
}

impl Drop for CancelRegistration {
    fn drop(&mut self) {
        if let Some(signal) = self.signal.take() {
            signal.lock().pending.remove(&self.id);
        }
    }
}
