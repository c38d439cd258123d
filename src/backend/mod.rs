//! OS readiness backends.
//!
//! A [`Backend`] is owned by exactly one listener thread and blocks in
//! [`Backend::wait`] until the port has something for it, its [`Waker`] fires,
//! or the OS reports an error. The matching [`Waker`] is shared with the
//! registry so an unregister call can force the wait to return.
//!
//! | Platform        | Data role              | Event role                      |
//! |-----------------|------------------------|---------------------------------|
//! | Linux           | epoll + eventfd        | `TIOCMIWAIT`, woken by SIGUSR1  |
//! | macOS / BSD     | kqueue + pipe          | `TIOCMGET` polled on a ticker   |
//! | other Unix      | unsupported            | `TIOCMGET` polled on a ticker   |
//! | Windows         | `WaitCommEvent` on one shared thread, woken by `SetCommMask` |

use crate::config::EventsConfig;
use crate::handle::PortHandle;
use crate::line::{EventDelivery, LineStatus};
use crate::role::{Role, RoleSet};
use std::io;
use std::sync::Arc;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
pub mod kqueue;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod modem_wait;
pub mod poll;
#[cfg(unix)]
pub(crate) mod unix;
#[cfg(windows)]
pub mod windows;

/// Why [`Backend::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// The port has work for these roles: readable data, a line change, or both.
    Ready(RoleSet),
    /// The waker fired.
    Exit,
    /// Nothing to do; wait again.
    Spurious,
    /// The wait failed or reported an error condition on the port.
    Error(i32),
}

/// Outcome of one [`Backend::read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// `n` bytes read and nothing more is pending.
    Complete(usize),
    /// `n` bytes read and more are already pending; read again.
    Partial(usize),
    /// Interrupted before any byte was transferred; retry.
    Interrupted,
    /// Readiness was reported but no bytes were available.
    Empty,
    /// Read failed with an OS error code.
    Failed(i32),
}

/// Blocking wait and port access for one listener thread.
pub trait Backend: Send {
    /// Block until the port is ready, the waker fires, or an error occurs.
    fn wait(&mut self) -> Wake;

    /// Read available bytes into `buf`.
    fn read(&mut self, buf: &mut [u8]) -> ReadStatus;

    /// Current state of the input control lines.
    fn line_status(&mut self) -> io::Result<LineStatus>;
}

/// Forces a blocked [`Backend::wait`] to return.
pub trait Waker: Send + Sync {
    fn wake(&self) -> io::Result<()>;

    /// Roles the shared listener thread should now wait for.
    ///
    /// Only backends with a [`ThreadLayout::Shared`] layout use this.
    fn set_roles(&self, roles: RoleSet) -> io::Result<()> {
        let _ = roles;
        Ok(())
    }
}

/// How listener threads map onto roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadLayout {
    /// One thread per (handle, role).
    PerRole,
    /// One thread per handle serving both roles, driven by a role mask.
    Shared,
}

/// What a listener thread asks its driver for at startup.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    pub handle: PortHandle,
    /// Roles the thread serves for its whole life.
    pub serves: RoleSet,
    /// Roles active at the time of opening.
    pub active: RoleSet,
    pub events: EventsConfig,
}

/// A freshly set-up backend and its waker.
pub struct Opened {
    pub backend: Box<dyn Backend>,
    pub waker: Arc<dyn Waker>,
    /// The backend's natural event delivery, used unless configuration overrides it.
    pub delivery: EventDelivery,
}

/// Creates backends for port handles.
pub trait Driver: Send + Sync {
    fn layout(&self) -> ThreadLayout;

    fn supports(&self, role: Role) -> bool {
        let _ = role;
        true
    }

    /// Set up a backend. Runs on the listener thread.
    fn open(&self, request: &OpenRequest) -> io::Result<Opened>;

    /// One-off control line read, outside any listener thread.
    fn line_status(&self, handle: PortHandle) -> io::Result<LineStatus>;
}

/// The driver for the current platform.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDriver;

#[cfg(unix)]
impl Driver for NativeDriver {
    fn layout(&self) -> ThreadLayout {
        ThreadLayout::PerRole
    }

    fn supports(&self, role: Role) -> bool {
        match role {
            Role::Data => cfg!(any(
                target_os = "linux",
                target_os = "android",
                target_os = "macos",
                target_os = "ios",
                target_os = "freebsd",
                target_os = "netbsd",
                target_os = "openbsd",
                target_os = "dragonfly"
            )),
            Role::Event => true,
        }
    }

    fn open(&self, request: &OpenRequest) -> io::Result<Opened> {
        let fd = request.handle.fd();
        if request.serves.contains(Role::Data) {
            open_data(fd)
        } else {
            open_event(fd, request)
        }
    }

    fn line_status(&self, handle: PortHandle) -> io::Result<LineStatus> {
        unix::modem_status(handle.fd())
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_data(fd: std::os::unix::io::RawFd) -> io::Result<Opened> {
    let (backend, waker) = epoll::EpollBackend::new(fd)?;
    Ok(Opened {
        backend: Box::new(backend),
        waker: Arc::new(waker),
        delivery: EventDelivery::Always,
    })
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly"
))]
fn open_data(fd: std::os::unix::io::RawFd) -> io::Result<Opened> {
    let (backend, waker) = kqueue::KqueueBackend::new(fd)?;
    Ok(Opened {
        backend: Box::new(backend),
        waker: Arc::new(waker),
        delivery: EventDelivery::Always,
    })
}

#[cfg(all(
    unix,
    not(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly"
    ))
))]
fn open_data(_fd: std::os::unix::io::RawFd) -> io::Result<Opened> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "no readiness backend for data listeners on this platform",
    ))
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_event(fd: std::os::unix::io::RawFd, _request: &OpenRequest) -> io::Result<Opened> {
    let (backend, waker) = modem_wait::ModemWaitBackend::new(fd)?;
    Ok(Opened {
        backend: Box::new(backend),
        waker: Arc::new(waker),
        delivery: EventDelivery::Always,
    })
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn open_event(fd: std::os::unix::io::RawFd, request: &OpenRequest) -> io::Result<Opened> {
    let ticker = Arc::new(poll::Ticker::new(request.events.poll_interval()));
    let backend = poll::PolledStatusBackend::new(Arc::clone(&ticker), move || {
        unix::modem_status(fd)
    });
    Ok(Opened {
        backend: Box::new(backend),
        waker: ticker,
        delivery: EventDelivery::OnChange,
    })
}

#[cfg(windows)]
impl Driver for NativeDriver {
    fn layout(&self) -> ThreadLayout {
        ThreadLayout::Shared
    }

    fn open(&self, request: &OpenRequest) -> io::Result<Opened> {
        let (backend, waker) = windows::CommBackend::new(request.handle, request.active)?;
        Ok(Opened {
            backend: Box::new(backend),
            waker: Arc::new(waker),
            delivery: EventDelivery::Always,
        })
    }

    fn line_status(&self, handle: PortHandle) -> io::Result<LineStatus> {
        windows::modem_status(handle)
    }
}
