//! Error types for the listener subsystem.
//!
//! `ListenerError` is what the control surface returns to callers.
//! `SinkError` is what a sink hands back when it cannot accept a delivery;
//! the listener threads log it and carry on.

use crate::handle::PortHandle;
use crate::role::Role;
use std::io;
use thiserror::Error;

/// Native code reported when a listener thread could not finish its setup
/// for a reason that has no OS error number (sink attach failure, panic).
pub const ERR_INIT_FAILED: i32 = -240;

/// Errors returned by the registry, the monitor, and the manager facade.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The role is already active for this handle.
    #[error("{role} listener already registered for handle {handle}")]
    AlreadyRegistered { handle: PortHandle, role: Role },

    /// The role is not active for this handle.
    #[error("no {role} listener registered for handle {handle}")]
    NotRegistered { handle: PortHandle, role: Role },

    /// The listener thread reported a failure through its init handshake.
    #[error("listener thread for handle {handle} failed to initialise (code {code})")]
    InitFailed { handle: PortHandle, code: i32 },

    /// The OS refused to create a thread.
    #[error("failed to spawn listener thread: {0}")]
    Spawn(#[source] io::Error),

    /// A backend call on the registering thread failed (e.g. updating a wait mask).
    #[error("listener setup failed: {0}")]
    Setup(#[from] io::Error),

    /// The role has no backend on this platform.
    #[error("{0} listeners are not supported on this platform")]
    Unsupported(Role),

    /// On platforms where both roles share one thread, both roles must share a sink.
    #[error("handle {0} is already served by a different sink")]
    SinkMismatch(PortHandle),

    /// A presence monitor is already watching this port.
    #[error("port monitor already running for {0}")]
    MonitorRunning(String),

    /// No presence monitor is watching this port.
    #[error("no port monitor running for {0}")]
    MonitorNotRunning(String),

    /// The presence monitor thread could not subscribe to device notifications.
    #[error("port monitor for {port} failed to initialise (code {code})")]
    MonitorInitFailed { port: String, code: i32 },
}

impl ListenerError {
    /// Negative native error code for callers that speak in integers.
    pub fn code(&self) -> i32 {
        match self {
            Self::InitFailed { code, .. } | Self::MonitorInitFailed { code, .. } => *code,
            Self::Spawn(e) | Self::Setup(e) => os_code(e),
            _ => ERR_INIT_FAILED,
        }
    }
}

/// Maps an I/O error to the `-errno` convention; errors without an OS code map to
/// [`ERR_INIT_FAILED`].
pub fn os_code(err: &io::Error) -> i32 {
    match err.raw_os_error() {
        Some(code) if code > 0 => -code,
        _ => ERR_INIT_FAILED,
    }
}

/// Returned by sink callbacks that could not take a delivery.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink refused or failed to process the delivery.
    #[error("sink rejected delivery: {0}")]
    Rejected(String),

    /// The sink's runtime could not be entered from the listener thread.
    #[error("failed to attach listener thread to sink runtime: {0}")]
    Attach(String),
}

impl SinkError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn attach(message: impl Into<String>) -> Self {
        Self::Attach(message.into())
    }
}
