//! Linux hot-plug source reading kernel uevents from a netlink socket.

use super::{DeviceInfo, DeviceNotice, HotplugSource};
use crate::backend::epoll::{EventFd, EventFdWaker};
use crate::backend::unix::OwnedFd;
use crate::backend::Waker;
use crate::config::MonitorConfig;
use memchr::memchr;
use std::io::{Error, Result};
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Multicast group the kernel broadcasts uevents on.
const KERNEL_GROUP: u32 = 1;
const RECV_BUFFER: usize = 8192;

/// A parsed kernel uevent. Borrowed from the receive buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Uevent<'a> {
    pub action: &'a str,
    pub devpath: &'a str,
    pub subsystem: Option<&'a str>,
    pub devtype: Option<&'a str>,
    pub devname: Option<&'a str>,
}

/// Parse `action@devpath\0KEY=VALUE\0...`. Messages rebroadcast by udev
/// (`libudev` header) and malformed messages yield `None`.
pub fn parse_uevent(buf: &[u8]) -> Option<Uevent<'_>> {
    let mut fields = NulFields { rest: buf };
    let header = fields.next()?;
    let at = memchr(b'@', header.as_bytes())?;
    let mut event = Uevent {
        action: &header[..at],
        devpath: &header[at + 1..],
        subsystem: None,
        devtype: None,
        devname: None,
    };
    for field in fields {
        let Some(eq) = memchr(b'=', field.as_bytes()) else {
            continue;
        };
        let (key, value) = (&field[..eq], &field[eq + 1..]);
        match key {
            "ACTION" => event.action = value,
            "DEVPATH" => event.devpath = value,
            "SUBSYSTEM" => event.subsystem = Some(value),
            "DEVTYPE" => event.devtype = Some(value),
            "DEVNAME" => event.devname = Some(value),
            _ => {}
        }
    }
    Some(event)
}

struct NulFields<'a> {
    rest: &'a [u8],
}

impl<'a> Iterator for NulFields<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        loop {
            if self.rest.is_empty() {
                return None;
            }
            let end = memchr(0, self.rest).unwrap_or(self.rest.len());
            let field = &self.rest[..end];
            self.rest = self.rest.get(end + 1..).unwrap_or(&[]);
            if field.is_empty() {
                continue;
            }
            // Non-UTF-8 fields are skipped.
            if let Ok(s) = std::str::from_utf8(field) {
                return Some(s);
            }
        }
    }
}

/// Which uevents the monitor cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UeventFilter {
    pub subsystem: String,
    pub device_type: String,
}

impl UeventFilter {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            subsystem: config.subsystem.clone(),
            device_type: config.device_type.clone(),
        }
    }

    /// Match subsystem and device type; an empty filter field matches anything.
    pub fn notice_for(&self, event: &Uevent<'_>) -> Option<DeviceNotice> {
        if !self.subsystem.is_empty() && event.subsystem != Some(self.subsystem.as_str()) {
            return None;
        }
        if !self.device_type.is_empty() && event.devtype != Some(self.device_type.as_str()) {
            return None;
        }
        let device = DeviceInfo {
            id: event.devpath.to_string(),
            port_name: event.devname.map(|name| format!("/dev/{}", name)),
            subsystem: event.subsystem.unwrap_or_default().to_string(),
        };
        match event.action {
            "add" => Some(DeviceNotice::added(vec![device])),
            "remove" => Some(DeviceNotice::removed(vec![device])),
            _ => None,
        }
    }
}

pub struct UeventSource {
    socket: OwnedFd,
    wake: Arc<EventFd>,
    filter: UeventFilter,
    settle: Duration,
    buf: Vec<u8>,
}

impl UeventSource {
    pub fn new(config: &MonitorConfig) -> Result<Self> {
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
                libc::NETLINK_KOBJECT_UEVENT,
            )
        };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        let socket = OwnedFd(fd);

        let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_pid = 0;
        addr.nl_groups = KERNEL_GROUP;
        let res = unsafe {
            libc::bind(
                socket.0,
                &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if res < 0 {
            return Err(Error::last_os_error());
        }

        Ok(Self {
            socket,
            wake: Arc::new(EventFd::new()?),
            filter: UeventFilter::from_config(config),
            settle: config.settle_delay(),
            buf: vec![0; RECV_BUFFER],
        })
    }

    /// Poll the socket and the wake descriptor. Returns `true` if woken.
    fn wait_readable(&self, timeout: Option<Duration>) -> Result<bool> {
        let mut fds = [
            libc::pollfd {
                fd: self.socket.0,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.wake.raw(),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        // During the settle delay only the wake descriptor is watched.
        let (ptr, count) = match timeout {
            Some(_) => (fds[1..].as_mut_ptr(), 1),
            None => (fds.as_mut_ptr(), 2),
        };
        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as libc::c_int);
        let n = unsafe { libc::poll(ptr, count, timeout_ms) };
        if n < 0 {
            let err = Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                return Ok(false);
            }
            return Err(err);
        }
        if fds[1].revents != 0 {
            self.wake.drain();
            return Ok(true);
        }
        Ok(false)
    }
}

impl HotplugSource for UeventSource {
    fn reports_existing(&self) -> bool {
        false
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(EventFdWaker::new(Arc::clone(&self.wake)))
    }

    fn next_notice(&mut self) -> Result<Option<DeviceNotice>> {
        if self.wait_readable(None)? {
            return Ok(None);
        }

        let n = unsafe {
            libc::recv(
                self.socket.0,
                self.buf.as_mut_ptr() as *mut libc::c_void,
                self.buf.len(),
                0,
            )
        };
        if n < 0 {
            let err = Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::EAGAIN) | Some(libc::EINTR) => Ok(None),
                _ => Err(err),
            };
        }

        let Some(event) = parse_uevent(&self.buf[..n as usize]) else {
            return Ok(None);
        };
        let Some(notice) = self.filter.notice_for(&event) else {
            trace!(action = event.action, devpath = event.devpath, "uevent filtered out");
            return Ok(None);
        };

        if !self.settle.is_zero() && self.wait_readable(Some(self.settle))? {
            return Ok(None);
        }
        Ok(Some(notice))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::DeviceAction;

    fn message(header: &str, fields: &[&str]) -> Vec<u8> {
        let mut buf = header.as_bytes().to_vec();
        buf.push(0);
        for field in fields {
            buf.extend_from_slice(field.as_bytes());
            buf.push(0);
        }
        buf
    }

    #[test]
    fn test_parse_kernel_message() {
        let buf = message(
            "add@/devices/pci0000:00/usb1/1-2",
            &[
                "ACTION=add",
                "DEVPATH=/devices/pci0000:00/usb1/1-2",
                "SUBSYSTEM=usb",
                "DEVTYPE=usb_device",
                "DEVNAME=bus/usb/001/004",
                "SEQNUM=2411",
            ],
        );
        let event = parse_uevent(&buf).unwrap();
        assert_eq!(event.action, "add");
        assert_eq!(event.devpath, "/devices/pci0000:00/usb1/1-2");
        assert_eq!(event.subsystem, Some("usb"));
        assert_eq!(event.devtype, Some("usb_device"));
        assert_eq!(event.devname, Some("bus/usb/001/004"));
    }

    #[test]
    fn test_parse_rejects_headerless_message() {
        assert!(parse_uevent(b"libudev\0\xfe\xed").is_none());
        assert!(parse_uevent(b"").is_none());
    }

    #[test]
    fn test_filter_matches_usb_devices_only() {
        let filter = UeventFilter::from_config(&MonitorConfig::default());

        let usb = message(
            "remove@/devices/usb1/1-2",
            &["SUBSYSTEM=usb", "DEVTYPE=usb_device"],
        );
        let notice = filter.notice_for(&parse_uevent(&usb).unwrap()).unwrap();
        assert_eq!(notice.action, DeviceAction::Removed);
        assert_eq!(notice.devices[0].id, "/devices/usb1/1-2");

        let interface = message(
            "add@/devices/usb1/1-2/1-2:1.0",
            &["SUBSYSTEM=usb", "DEVTYPE=usb_interface"],
        );
        assert!(filter.notice_for(&parse_uevent(&interface).unwrap()).is_none());

        let tty = message("add@/devices/virtual/tty/ttyS0", &["SUBSYSTEM=tty"]);
        assert!(filter.notice_for(&parse_uevent(&tty).unwrap()).is_none());
    }

    #[test]
    fn test_wake_interrupts_blocked_receive() {
        use std::time::{Duration, Instant};

        let mut source = match UeventSource::new(&MonitorConfig::default()) {
            Ok(source) => source,
            Err(e) => {
                println!("Skipping: netlink uevent socket unavailable: {e}");
                return;
            }
        };
        let waker = source.waker();
        let listener = std::thread::spawn(move || {
            let start = Instant::now();
            (source.next_notice(), start.elapsed())
        });

        std::thread::sleep(Duration::from_millis(50));
        waker.wake().unwrap();
        let (result, elapsed) = listener.join().unwrap();
        assert!(matches!(result, Ok(None)), "unexpected result: {result:?}");
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_filter_ignores_other_actions() {
        let filter = UeventFilter::from_config(&MonitorConfig::default());
        let bind = message(
            "bind@/devices/usb1/1-2",
            &["SUBSYSTEM=usb", "DEVTYPE=usb_device"],
        );
        assert!(filter.notice_for(&parse_uevent(&bind).unwrap()).is_none());
    }
}
