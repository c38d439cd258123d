//! Windows backend: one thread per handle blocked in `WaitCommEvent`.
//!
//! The comm mask is the union of the active roles' events. Calling
//! `SetCommMask` from another thread completes a pending `WaitCommEvent`, so
//! the same call both updates the mask and wakes the listener.
//!
//! The handle must have been opened with `FILE_FLAG_OVERLAPPED`; on a
//! synchronous handle `SetCommMask` would queue behind the pending wait.

use super::{Backend, ReadStatus, Wake, Waker};
use crate::handle::PortHandle;
use crate::line::LineStatus;
use crate::role::{Role, RoleSet};
use parking_lot::Mutex;
use std::io::{Error, Result};
use std::ptr;
use winapi::shared::minwindef::{DWORD, FALSE, TRUE};
use winapi::shared::winerror::ERROR_IO_PENDING;
use winapi::um::fileapi::ReadFile;
use winapi::um::handleapi::CloseHandle;
use winapi::um::ioapiset::GetOverlappedResult;
use winapi::um::minwinbase::OVERLAPPED;
use winapi::um::synchapi::CreateEventW;
use winapi::um::winbase::{
    ClearCommError, GetCommModemStatus, SetCommMask, WaitCommEvent, COMSTAT, EV_BREAK, EV_CTS,
    EV_DSR, EV_ERR, EV_RING, EV_RLSD, EV_RXCHAR, EV_RXFLAG,
};
use winapi::um::winnt::HANDLE;

const DATA_EVENTS: DWORD = EV_RXCHAR;
const LINE_EVENTS: DWORD = EV_BREAK | EV_CTS | EV_DSR | EV_ERR | EV_RING | EV_RLSD | EV_RXFLAG;

const MS_CTS_ON: DWORD = 0x0010;
const MS_DSR_ON: DWORD = 0x0020;
const MS_RING_ON: DWORD = 0x0040;
const MS_RLSD_ON: DWORD = 0x0080;

fn comm_mask(roles: RoleSet) -> DWORD {
    let mut mask = 0;
    if roles.contains(Role::Data) {
        mask |= DATA_EVENTS;
    }
    if roles.contains(Role::Event) {
        mask |= LINE_EVENTS;
    }
    if mask == 0 {
        // Any valid mask; the thread is about to exit.
        EV_BREAK
    } else {
        mask
    }
}

// HANDLE values are plain kernel object identifiers and may cross threads.
#[derive(Debug, Clone, Copy)]
struct RawPort(isize);

impl RawPort {
    fn get(self) -> HANDLE {
        self.0 as HANDLE
    }
}

#[derive(Debug)]
struct OwnedEvent(isize);

impl OwnedEvent {
    fn new() -> Result<Self> {
        let event = unsafe { CreateEventW(ptr::null_mut(), TRUE, FALSE, ptr::null()) };
        if event.is_null() {
            return Err(Error::last_os_error());
        }
        Ok(OwnedEvent(event as isize))
    }

    fn overlapped(&self) -> OVERLAPPED {
        let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
        ov.hEvent = self.0 as HANDLE;
        ov
    }
}

impl Drop for OwnedEvent {
    fn drop(&mut self) {
        unsafe { CloseHandle(self.0 as HANDLE) };
    }
}

fn last_error_code() -> i32 {
    Error::last_os_error().raw_os_error().unwrap_or(-1)
}

pub(crate) fn modem_status(handle: PortHandle) -> Result<LineStatus> {
    let mut status: DWORD = 0;
    if unsafe { GetCommModemStatus(handle.raw_handle() as HANDLE, &mut status) } == 0 {
        return Err(Error::last_os_error());
    }
    Ok(LineStatus {
        cts: status & MS_CTS_ON != 0,
        dsr: status & MS_DSR_ON != 0,
        dcd: status & MS_RLSD_ON != 0,
        ri: status & MS_RING_ON != 0,
    })
}

#[derive(Debug)]
pub struct CommBackend {
    handle: PortHandle,
    port: RawPort,
    wait_event: OwnedEvent,
    read_event: OwnedEvent,
}

impl CommBackend {
    pub fn new(handle: PortHandle, active: RoleSet) -> Result<(Self, CommMaskWaker)> {
        let port = RawPort(handle.raw_handle() as isize);
        if unsafe { SetCommMask(port.get(), comm_mask(active)) } == 0 {
            let err = Error::last_os_error();
            let mut errors: DWORD = 0;
            let mut stat: COMSTAT = unsafe { std::mem::zeroed() };
            unsafe { ClearCommError(port.get(), &mut errors, &mut stat) };
            return Err(err);
        }
        let backend = CommBackend {
            handle,
            port,
            wait_event: OwnedEvent::new()?,
            read_event: OwnedEvent::new()?,
        };
        let waker = CommMaskWaker {
            port,
            roles: Mutex::new(active),
        };
        Ok((backend, waker))
    }
}

impl Backend for CommBackend {
    fn wait(&mut self) -> Wake {
        let mut fired: DWORD = 0;
        let mut ov = self.wait_event.overlapped();
        let ok = unsafe { WaitCommEvent(self.port.get(), &mut fired, &mut ov) };
        if ok == 0 {
            let code = last_error_code();
            if code != ERROR_IO_PENDING as i32 {
                return Wake::Error(code);
            }
            let mut transferred: DWORD = 0;
            if unsafe { GetOverlappedResult(self.port.get(), &mut ov, &mut transferred, TRUE) }
                == 0
            {
                return Wake::Error(last_error_code());
            }
        }

        let mut ready = RoleSet::EMPTY;
        if fired & DATA_EVENTS != 0 {
            ready = ready.with(Role::Data);
        }
        if fired & LINE_EVENTS != 0 {
            ready = ready.with(Role::Event);
        }
        if ready.is_empty() {
            // Mask was changed under the pending wait.
            Wake::Exit
        } else {
            Wake::Ready(ready)
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        let mut errors: DWORD = 0;
        let mut stat: COMSTAT = unsafe { std::mem::zeroed() };
        if unsafe { ClearCommError(self.port.get(), &mut errors, &mut stat) } == 0 {
            return ReadStatus::Failed(last_error_code());
        }
        let queued = stat.cbInQue as usize;
        if queued == 0 || buf.is_empty() {
            return ReadStatus::Empty;
        }
        let want = queued.min(buf.len());

        let mut read: DWORD = 0;
        let mut ov = self.read_event.overlapped();
        let ok = unsafe {
            ReadFile(
                self.port.get(),
                buf.as_mut_ptr() as *mut _,
                want as DWORD,
                &mut read,
                &mut ov,
            )
        };
        if ok == 0 {
            let code = last_error_code();
            if code != ERROR_IO_PENDING as i32 {
                return ReadStatus::Failed(code);
            }
            if unsafe { GetOverlappedResult(self.port.get(), &mut ov, &mut read, TRUE) } == 0 {
                return ReadStatus::Failed(last_error_code());
            }
        }

        match read as usize {
            0 => ReadStatus::Empty,
            n if queued > n => ReadStatus::Partial(n),
            n => ReadStatus::Complete(n),
        }
    }

    fn line_status(&mut self) -> Result<LineStatus> {
        modem_status(self.handle)
    }
}

/// Updates the comm mask, which also completes a pending `WaitCommEvent`.
#[derive(Debug)]
pub struct CommMaskWaker {
    port: RawPort,
    roles: Mutex<RoleSet>,
}

impl CommMaskWaker {
    fn apply(&self, roles: RoleSet) -> Result<()> {
        if unsafe { SetCommMask(self.port.get(), comm_mask(roles)) } == 0 {
            return Err(Error::last_os_error());
        }
        Ok(())
    }
}

impl Waker for CommMaskWaker {
    fn wake(&self) -> Result<()> {
        let roles = *self.roles.lock();
        self.apply(roles)
    }

    fn set_roles(&self, roles: RoleSet) -> Result<()> {
        let mut current = self.roles.lock();
        self.apply(roles)?;
        *current = roles;
        Ok(())
    }
}
