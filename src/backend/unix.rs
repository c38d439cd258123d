//! Port access shared by the Unix backends.

use super::ReadStatus;
use crate::line::LineStatus;
use std::io::{Error, Result};
use std::os::unix::io::RawFd;

/// `read(2)` into `buf`, classified for the data loop.
///
/// A read that fills the whole buffer while the driver still holds bytes is
/// reported as [`ReadStatus::Partial`].
pub(crate) fn read_fd(fd: RawFd, buf: &mut [u8]) -> ReadStatus {
    if buf.is_empty() {
        return ReadStatus::Empty;
    }
    let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    if n < 0 {
        let err = Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::EINTR) => ReadStatus::Interrupted,
            Some(code) if code == libc::EAGAIN || code == libc::EWOULDBLOCK => ReadStatus::Empty,
            Some(code) => ReadStatus::Failed(code),
            None => ReadStatus::Failed(libc::EIO),
        };
    }
    let n = n as usize;
    if n == 0 {
        ReadStatus::Empty
    } else if n == buf.len() && bytes_pending(fd).unwrap_or(0) > 0 {
        ReadStatus::Partial(n)
    } else {
        ReadStatus::Complete(n)
    }
}

/// Bytes waiting in the driver's input queue.
pub(crate) fn bytes_pending(fd: RawFd) -> Result<usize> {
    let mut count: libc::c_int = 0;
    let res = unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut count) };
    if res < 0 {
        return Err(Error::last_os_error());
    }
    Ok(count.max(0) as usize)
}

/// Read the modem control lines with `TIOCMGET`.
pub(crate) fn modem_status(fd: RawFd) -> Result<LineStatus> {
    let mut bits: libc::c_int = 0;
    let res = unsafe { libc::ioctl(fd, libc::TIOCMGET as _, &mut bits) };
    if res < 0 {
        return Err(Error::last_os_error());
    }
    Ok(LineStatus {
        cts: bits & libc::TIOCM_CTS != 0,
        dsr: bits & libc::TIOCM_DSR != 0,
        dcd: bits & libc::TIOCM_CAR != 0,
        ri: bits & libc::TIOCM_RNG != 0,
    })
}

/// Last OS error as a positive errno, defaulting to `EIO`.
pub(crate) fn last_errno() -> i32 {
    Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

/// An owned descriptor closed on drop.
#[derive(Debug)]
pub(crate) struct OwnedFd(pub(crate) RawFd);

impl Drop for OwnedFd {
    fn drop(&mut self) {
        unsafe { libc::close(self.0) };
    }
}

#[cfg(test)]
pub(crate) mod test_pipe {
    use super::*;

    /// A pipe standing in for a port: read end is the "port", write end feeds it.
    pub(crate) struct Pipe {
        pub(crate) read: OwnedFd,
        pub(crate) write: OwnedFd,
    }

    impl Pipe {
        pub(crate) fn new() -> Self {
            let mut fds = [0 as RawFd; 2];
            let res = unsafe { libc::pipe(fds.as_mut_ptr()) };
            assert_eq!(res, 0, "pipe() failed: {}", Error::last_os_error());
            Pipe {
                read: OwnedFd(fds[0]),
                write: OwnedFd(fds[1]),
            }
        }

        pub(crate) fn feed(&self, bytes: &[u8]) {
            let n = unsafe {
                libc::write(self.write.0, bytes.as_ptr() as *const libc::c_void, bytes.len())
            };
            assert_eq!(n, bytes.len() as isize);
        }
    }
}
