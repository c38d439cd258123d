//! Linux event backend: blocks in `TIOCMIWAIT` until a modem line changes.
//!
//! The ioctl has no wake descriptor, so the waker sets a pending flag and
//! sends `SIGUSR1` to the listener thread. The handler does nothing; it is
//! installed without `SA_RESTART`, which makes the ioctl fail with `EINTR`.
//! The process-wide `SIGUSR1` disposition is replaced the first time an event
//! listener starts.

use super::unix;
use super::{Backend, ReadStatus, Wake, Waker};
use crate::line::LineStatus;
use crate::role::RoleSet;
use parking_lot::Mutex;
use std::io::{Error, Result};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tracing::debug;

// <asm-generic/ioctls.h>
#[cfg(not(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc64"
)))]
const TIOCMIWAIT: libc::c_ulong = 0x545C;
#[cfg(any(
    target_arch = "mips",
    target_arch = "mips64",
    target_arch = "powerpc",
    target_arch = "powerpc64",
    target_arch = "sparc64"
))]
const TIOCMIWAIT: libc::c_ulong = 0x5C;

const WAKE_SIGNAL: libc::c_int = libc::SIGUSR1;

static HANDLER: Once = Once::new();

extern "C" fn on_wake_signal(_signal: libc::c_int) {}

fn install_handler() -> Result<()> {
    let mut result = Ok(());
    HANDLER.call_once(|| {
        let mut action: libc::sigaction = unsafe { std::mem::zeroed() };
        action.sa_sigaction = on_wake_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = 0;
        unsafe { libc::sigemptyset(&mut action.sa_mask) };
        if unsafe { libc::sigaction(WAKE_SIGNAL, &action, std::ptr::null_mut()) } < 0 {
            result = Err(Error::last_os_error());
        } else {
            debug!("installed SIGUSR1 handler for modem status waits");
        }
    });
    result
}

#[derive(Debug)]
struct WaitState {
    pending: AtomicBool,
    // None once the listener thread has dropped its backend.
    thread: Mutex<Option<libc::pthread_t>>,
}

#[derive(Debug)]
pub struct ModemWaitBackend {
    fd: RawFd,
    state: Arc<WaitState>,
}

impl ModemWaitBackend {
    /// Must be called on the thread that will call [`Backend::wait`].
    pub fn new(fd: RawFd) -> Result<(Self, SignalWaker)> {
        install_handler()?;
        // Fail setup early on descriptors that are not terminals.
        unix::modem_status(fd)?;

        let state = Arc::new(WaitState {
            pending: AtomicBool::new(false),
            thread: Mutex::new(Some(unsafe { libc::pthread_self() })),
        });
        let waker = SignalWaker {
            state: Arc::clone(&state),
        };
        Ok((ModemWaitBackend { fd, state }, waker))
    }
}

impl ModemWaitBackend {
    /// Map the return of a blocking wait; `EINTR` consumes a pending wake.
    fn after_wait(&self, res: libc::c_int) -> Wake {
        if res == 0 {
            return Wake::Ready(RoleSet::EVENT);
        }
        match unix::last_errno() {
            libc::EINTR if self.state.pending.swap(false, Ordering::AcqRel) => Wake::Exit,
            libc::EINTR => Wake::Spurious,
            errno => Wake::Error(errno),
        }
    }
}

impl Drop for ModemWaitBackend {
    fn drop(&mut self) {
        *self.state.thread.lock() = None;
    }
}

impl Backend for ModemWaitBackend {
    fn wait(&mut self) -> Wake {
        if self.state.pending.swap(false, Ordering::AcqRel) {
            return Wake::Exit;
        }
        let mask: libc::c_int =
            libc::TIOCM_CTS | libc::TIOCM_DSR | libc::TIOCM_CAR | libc::TIOCM_RNG;
        let res = unsafe { libc::ioctl(self.fd, TIOCMIWAIT as _, mask) };
        self.after_wait(res)
    }

    fn read(&mut self, _buf: &mut [u8]) -> ReadStatus {
        ReadStatus::Empty
    }

    fn line_status(&mut self) -> Result<LineStatus> {
        unix::modem_status(self.fd)
    }
}

/// Interrupts a thread blocked in `TIOCMIWAIT`.
#[derive(Debug, Clone)]
pub struct SignalWaker {
    state: Arc<WaitState>,
}

impl Waker for SignalWaker {
    fn wake(&self) -> Result<()> {
        self.state.pending.store(true, Ordering::Release);
        let thread = self.state.thread.lock();
        if let Some(tid) = *thread {
            let res = unsafe { libc::pthread_kill(tid, WAKE_SIGNAL) };
            if res != 0 && res != libc::ESRCH {
                return Err(Error::from_raw_os_error(res));
            }
        }
        Ok(())
    }
}
