//! Opening a port in the mode the listener backends expect.
//!
//! Unix descriptors are switched to non-blocking; Windows handles are opened
//! for overlapped I/O so the comm event wait can be cancelled.

use super::error::PortError;
use super::settings::PortSettings;
use crate::handle::PortHandle;
use tracing::debug;

#[cfg(unix)]
type Inner = serialport::TTYPort;
#[cfg(windows)]
type Inner = serialport::COMPort;

/// An open serial port. Closed on drop; unregister its listeners first.
pub struct NativePort {
    name: String,
    settings: PortSettings,
    inner: Inner,
}

impl NativePort {
    #[cfg(unix)]
    pub fn open(name: &str, settings: PortSettings) -> Result<Self, PortError> {
        use std::os::unix::io::AsRawFd;

        let inner = serialport::new(name, settings.baud_rate)
            .data_bits(settings.data_bits.into())
            .parity(settings.parity.into())
            .stop_bits(settings.stop_bits.into())
            .flow_control(settings.flow_control.into())
            .open_native()
            .map_err(|e| PortError::from_open(name, e))?;

        let fd = inner.as_raw_fd();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
        if flags < 0 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
            return Err(PortError::Io(std::io::Error::last_os_error()));
        }

        debug!(port = name, fd, framing = %settings.framing(), baud = settings.baud_rate, "port opened");
        Ok(Self {
            name: name.to_string(),
            settings,
            inner,
        })
    }

    #[cfg(windows)]
    pub fn open(name: &str, settings: PortSettings) -> Result<Self, PortError> {
        use serialport::SerialPort;
        use std::ffi::OsStr;
        use std::os::windows::ffi::OsStrExt;
        use std::os::windows::io::FromRawHandle;
        use winapi::um::fileapi::{CreateFileW, OPEN_EXISTING};
        use winapi::um::handleapi::INVALID_HANDLE_VALUE;
        use winapi::um::winbase::FILE_FLAG_OVERLAPPED;
        use winapi::um::winnt::{GENERIC_READ, GENERIC_WRITE};

        let path = if name.starts_with(r"\\.\") {
            name.to_string()
        } else {
            format!(r"\\.\{}", name)
        };
        let wide: Vec<u16> = OsStr::new(&path).encode_wide().chain(Some(0)).collect();
        let raw = unsafe {
            CreateFileW(
                wide.as_ptr(),
                GENERIC_READ | GENERIC_WRITE,
                0,
                std::ptr::null_mut(),
                OPEN_EXISTING,
                FILE_FLAG_OVERLAPPED,
                std::ptr::null_mut(),
            )
        };
        if raw == INVALID_HANDLE_VALUE {
            let err = std::io::Error::last_os_error();
            return Err(match err.kind() {
                std::io::ErrorKind::NotFound => PortError::NotFound(name.to_string()),
                std::io::ErrorKind::PermissionDenied => PortError::Busy(name.to_string()),
                _ => PortError::Io(err),
            });
        }

        // Takes ownership of the handle; closed on drop from here on.
        let mut inner = unsafe { serialport::COMPort::from_raw_handle(raw as _) };
        inner.set_baud_rate(settings.baud_rate)?;
        inner.set_data_bits(settings.data_bits.into())?;
        inner.set_parity(settings.parity.into())?;
        inner.set_stop_bits(settings.stop_bits.into())?;
        inner.set_flow_control(settings.flow_control.into())?;

        debug!(port = name, framing = %settings.framing(), baud = settings.baud_rate, "port opened");
        Ok(Self {
            name: name.to_string(),
            settings,
            inner,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    /// The handle to pass to the listener registry.
    #[cfg(unix)]
    pub fn handle(&self) -> PortHandle {
        use std::os::unix::io::AsRawFd;
        PortHandle::from_fd(self.inner.as_raw_fd())
    }

    #[cfg(windows)]
    pub fn handle(&self) -> PortHandle {
        use std::os::windows::io::AsRawHandle;
        PortHandle::from_raw_handle(self.inner.as_raw_handle())
    }
}

impl std::fmt::Debug for NativePort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativePort")
            .field("name", &self.name)
            .field("settings", &self.settings)
            .field("handle", &self.handle())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_device_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ttyUSB42");
        let err = NativePort::open(path.to_str().unwrap(), PortSettings::default()).unwrap_err();
        assert!(
            matches!(err, PortError::NotFound(_) | PortError::Serial(_)),
            "unexpected error: {err}"
        );
    }
}
