//! One-shot handshake between a registering caller and the thread it spawned.

use parking_lot::{Condvar, Mutex};

enum InitState<T> {
    Pending,
    Ready(T),
    Failed(i32),
    Taken,
}

/// Completed exactly once by the worker, waited on by the registering caller.
///
/// The worker hands back whatever the caller needs to stop it later (its wake
/// handle) or a negative error code.
pub(crate) struct InitSignal<T> {
    state: Mutex<InitState<T>>,
    done: Condvar,
}

impl<T> InitSignal<T> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InitState::Pending),
            done: Condvar::new(),
        }
    }

    /// Record the outcome. Only the first call has an effect; returns whether it did.
    pub(crate) fn complete(&self, outcome: Result<T, i32>) -> bool {
        let mut state = self.state.lock();
        if !matches!(*state, InitState::Pending) {
            return false;
        }
        *state = match outcome {
            Ok(value) => InitState::Ready(value),
            Err(code) => InitState::Failed(code),
        };
        self.done.notify_all();
        true
    }

    /// Block until the outcome is known and take it.
    pub(crate) fn wait(&self) -> Result<T, i32> {
        let mut state = self.state.lock();
        while matches!(*state, InitState::Pending) {
            self.done.wait(&mut state);
        }
        match std::mem::replace(&mut *state, InitState::Taken) {
            InitState::Ready(value) => Ok(value),
            InitState::Failed(code) => Err(code),
            InitState::Pending | InitState::Taken => Err(crate::error::ERR_INIT_FAILED),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        matches!(*self.state.lock(), InitState::Pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_first_completion_wins() {
        let signal = InitSignal::new();
        assert!(signal.is_pending());
        assert!(signal.complete(Err(-13)));
        assert!(!signal.complete(Ok(7)));
        assert_eq!(signal.wait(), Err(-13));
    }

    #[test]
    fn test_wait_blocks_until_completed() {
        let signal = Arc::new(InitSignal::new());
        let worker = {
            let signal = Arc::clone(&signal);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                signal.complete(Ok("ready"));
            })
        };
        assert_eq!(signal.wait(), Ok("ready"));
        worker.join().unwrap();
    }
}
