//! Opaque port handle borrowed by the listener subsystem.

use serde::Serialize;
use std::fmt;

/// An OS-level handle to an open serial device.
///
/// On Unix this is a file descriptor, on Windows a `HANDLE`. The listener
/// subsystem never closes it; the caller that opened the port owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PortHandle(i64);

impl PortHandle {
    /// Wrap a raw handle value.
    pub const fn from_raw(raw: i64) -> Self {
        Self(raw)
    }

    /// The raw handle value.
    pub const fn raw(self) -> i64 {
        self.0
    }

    #[cfg(unix)]
    pub fn from_fd(fd: std::os::unix::io::RawFd) -> Self {
        Self(i64::from(fd))
    }

    #[cfg(unix)]
    pub fn fd(self) -> std::os::unix::io::RawFd {
        self.0 as std::os::unix::io::RawFd
    }

    #[cfg(windows)]
    pub fn from_raw_handle(handle: std::os::windows::io::RawHandle) -> Self {
        Self(handle as isize as i64)
    }

    #[cfg(windows)]
    pub fn raw_handle(self) -> std::os::windows::io::RawHandle {
        self.0 as isize as std::os::windows::io::RawHandle
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip() {
        let handle = PortHandle::from_raw(42);
        assert_eq!(handle.raw(), 42);
        assert_eq!(handle.to_string(), "42");
    }

    #[cfg(unix)]
    #[test]
    fn test_fd_conversion() {
        let handle = PortHandle::from_fd(5);
        assert_eq!(handle.fd(), 5);
    }
}
