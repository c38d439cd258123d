//! Re-validation of the monitored port after a removal notice.

use std::fmt;
use std::io;

/// What a presence check concluded about the monitored port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeVerdict {
    Present,
    /// The port path is gone; the removal is real.
    Removed,
    /// The check failed in a way that says nothing about removal.
    Ambiguous(String),
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeVerdict::Present => f.write_str("present"),
            ProbeVerdict::Removed => f.write_str("removed"),
            ProbeVerdict::Ambiguous(reason) => write!(f, "ambiguous ({})", reason),
        }
    }
}

/// Checks whether a port is still reachable.
pub trait PresenceProbe: Send + Sync {
    fn probe(&self, port: &str) -> ProbeVerdict;
}

/// Classify a failed `stat` of the port path.
///
/// Permission, symlink loop, name length, memory, path component, overflow
/// and bad address failures do not show the device is gone.
#[cfg(unix)]
pub fn classify(err: &io::Error) -> ProbeVerdict {
    let ambiguous = [
        libc::EACCES,
        libc::ELOOP,
        libc::ENAMETOOLONG,
        libc::ENOMEM,
        libc::ENOTDIR,
        libc::EOVERFLOW,
        libc::EFAULT,
    ];
    match err.raw_os_error() {
        Some(code) if ambiguous.contains(&code) => ProbeVerdict::Ambiguous(err.to_string()),
        _ if err.kind() == io::ErrorKind::PermissionDenied => {
            ProbeVerdict::Ambiguous(err.to_string())
        }
        _ => ProbeVerdict::Removed,
    }
}

#[cfg(not(unix))]
pub fn classify(err: &io::Error) -> ProbeVerdict {
    match err.kind() {
        io::ErrorKind::PermissionDenied | io::ErrorKind::OutOfMemory => {
            ProbeVerdict::Ambiguous(err.to_string())
        }
        _ => ProbeVerdict::Removed,
    }
}

/// Filesystem probe on Unix; port enumeration on Windows, where COM names
/// have no filesystem path.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl PresenceProbe for FsProbe {
    #[cfg(unix)]
    fn probe(&self, port: &str) -> ProbeVerdict {
        match std::fs::metadata(port) {
            Ok(_) => ProbeVerdict::Present,
            Err(e) => classify(&e),
        }
    }

    #[cfg(not(unix))]
    fn probe(&self, port: &str) -> ProbeVerdict {
        match serialport::available_ports() {
            Ok(ports) => {
                if ports.iter().any(|p| p.port_name.eq_ignore_ascii_case(port)) {
                    ProbeVerdict::Present
                } else {
                    ProbeVerdict::Removed
                }
            }
            Err(e) => ProbeVerdict::Ambiguous(e.to_string()),
        }
    }
}
