//! Sink traits implemented by the caller, and the guards the listener threads
//! use when calling into them.

use crate::error::SinkError;
use crate::line::LineEvents;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, warn};

/// Hooks run on a listener thread before its first delivery and after its last.
///
/// A sink living inside a managed runtime uses these to attach the OS thread
/// to that runtime. Both default to no-ops.
pub trait RuntimeAttach: Send + Sync {
    fn attach(&self) -> Result<(), SinkError> {
        Ok(())
    }

    fn detach(&self) {}
}

/// Receives data, read errors and line events from listener threads.
///
/// Calls are made synchronously from the listener thread. An `Err` or a panic
/// is logged and dropped; it never stops the listener.
pub trait ListenerSink: RuntimeAttach {
    /// Bytes received on the port.
    fn deliver_data(&self, data: &[u8]) -> Result<(), SinkError>;

    /// A read or sustained wait error, carrying the platform error code.
    fn deliver_data_error(&self, code: i32) -> Result<(), SinkError>;

    /// Control line state.
    fn deliver_event(&self, events: LineEvents) -> Result<(), SinkError>;
}

/// Hot-plug notification codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortEvent {
    Added = 1,
    Removed = 2,
}

impl PortEvent {
    pub const fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for PortEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortEvent::Added => f.write_str("added"),
            PortEvent::Removed => f.write_str("removed"),
        }
    }
}

/// Receives hot-plug notifications from a port monitor.
pub trait PortEventSink: RuntimeAttach {
    fn on_port_event(&self, event: PortEvent) -> Result<(), SinkError>;
}

/// Scoped attachment of the current thread to a sink's runtime.
///
/// `attach` runs on construction; `detach` runs on drop, on every exit path.
pub struct SinkAttachment<'a, S: RuntimeAttach + ?Sized> {
    sink: &'a S,
}

impl<'a, S: RuntimeAttach + ?Sized> SinkAttachment<'a, S> {
    pub fn attach(sink: &'a S) -> Result<Self, SinkError> {
        match panic::catch_unwind(AssertUnwindSafe(|| sink.attach())) {
            Ok(Ok(())) => Ok(Self { sink }),
            Ok(Err(e)) => Err(e),
            Err(payload) => Err(SinkError::attach(panic_message(payload.as_ref()))),
        }
    }
}

impl<S: RuntimeAttach + ?Sized> Drop for SinkAttachment<'_, S> {
    fn drop(&mut self) {
        if panic::catch_unwind(AssertUnwindSafe(|| self.sink.detach())).is_err() {
            warn!("sink panicked while detaching listener thread");
        }
        debug!("listener thread detached from sink");
    }
}

/// Run one sink call, logging and discarding any error or panic it raises.
///
/// Returns `true` when the sink accepted the delivery.
pub(crate) fn guarded<F>(delivery: &'static str, call: F) -> bool
where
    F: FnOnce() -> Result<(), SinkError>,
{
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(delivery, error = %e, "sink rejected delivery");
            false
        }
        Err(payload) => {
            error!(
                delivery,
                panic = %panic_message(payload.as_ref()),
                "sink panicked during delivery"
            );
            false
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
