//! A background thread that stops on a flag plus a forced wake.

use crate::backend::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Handle to a running listener or monitor thread.
pub(crate) struct Worker {
    name: String,
    exit: Arc<AtomicBool>,
    waker: Arc<dyn Waker>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(
        name: String,
        exit: Arc<AtomicBool>,
        waker: Arc<dyn Waker>,
        thread: JoinHandle<()>,
    ) -> Self {
        Self {
            name,
            exit,
            waker,
            thread: Some(thread),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn waker(&self) -> &Arc<dyn Waker> {
        &self.waker
    }

    pub(crate) fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Set the exit flag, wake the thread, and join it.
    ///
    /// The thread is woken again every `retry` until it finishes; after
    /// `timeout` it is detached and left to exit on its own. A worker stopping
    /// itself (from inside a sink callback) is only flagged, never joined.
    pub(crate) fn stop(&mut self, timeout: Duration, retry: Duration) {
        self.exit.store(true, Ordering::Release);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if let Err(e) = self.waker.wake() {
            warn!(worker = %self.name, error = %e, "failed to wake worker");
        }
        if thread.thread().id() == thread::current().id() {
            debug!(worker = %self.name, "worker stopping itself; not joining");
            return;
        }

        let deadline = Instant::now() + timeout;
        while !thread.is_finished() {
            if Instant::now() >= deadline {
                warn!(worker = %self.name, ?timeout, "worker did not exit in time; detaching");
                return;
            }
            thread::sleep(retry);
            if let Err(e) = self.waker.wake() {
                debug!(worker = %self.name, error = %e, "re-wake failed");
            }
        }
        if thread.join().is_err() {
            warn!(worker = %self.name, "worker thread panicked");
        }
        debug!(worker = %self.name, "worker joined");
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
