//! epoll data backend with an eventfd wake descriptor.

use super::unix::{self, OwnedFd};
use super::{Backend, ReadStatus, Wake, Waker};
use crate::line::LineStatus;
use crate::role::RoleSet;
use std::io::{Error, Result};
use std::os::unix::io::RawFd;
use std::sync::Arc;

const PORT_TOKEN: u64 = 1;
const WAKE_TOKEN: u64 = 2;

/// An eventfd counter; writing to it wakes the epoll set it belongs to.
#[derive(Debug)]
pub struct EventFd {
    fd: OwnedFd,
}

impl EventFd {
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) };
        if fd < 0 {
            return Err(Error::last_os_error());
        }
        Ok(EventFd { fd: OwnedFd(fd) })
    }

    pub fn raw(&self) -> RawFd {
        self.fd.0
    }

    pub fn signal(&self) -> Result<()> {
        let one: u64 = 1;
        let n = unsafe {
            libc::write(
                self.fd.0,
                &one as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = Error::last_os_error();
            // Counter saturated: a wake is already pending.
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }

    /// Reset the counter so level-triggered epoll stops reporting it.
    pub fn drain(&self) {
        let mut value: u64 = 0;
        unsafe {
            libc::read(
                self.fd.0,
                &mut value as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
    }
}

/// Wakes an [`EpollBackend`] through its eventfd.
#[derive(Debug, Clone)]
pub struct EventFdWaker(Arc<EventFd>);

impl EventFdWaker {
    pub fn new(fd: Arc<EventFd>) -> Self {
        Self(fd)
    }
}

impl Waker for EventFdWaker {
    fn wake(&self) -> Result<()> {
        self.0.signal()
    }
}

/// Waits for the port to become readable, level-triggered.
#[derive(Debug)]
pub struct EpollBackend {
    port: RawFd,
    epoll: OwnedFd,
    wake: Arc<EventFd>,
}

impl EpollBackend {
    /// Build the epoll set over `port` and a fresh eventfd.
    pub fn new(port: RawFd) -> Result<(Self, EventFdWaker)> {
        let wake = Arc::new(EventFd::new()?);

        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(Error::last_os_error());
        }
        let epoll = OwnedFd(epfd);

        let port_events = (libc::EPOLLIN | libc::EPOLLPRI | libc::EPOLLERR | libc::EPOLLHUP) as u32;
        add(epoll.0, port, port_events, PORT_TOKEN)?;
        add(epoll.0, wake.raw(), libc::EPOLLIN as u32, WAKE_TOKEN)?;

        let waker = EventFdWaker::new(Arc::clone(&wake));
        Ok((EpollBackend { port, epoll, wake }, waker))
    }
}

fn add(epfd: RawFd, fd: RawFd, events: u32, token: u64) -> Result<()> {
    let mut ev = libc::epoll_event { events, u64: token };
    let res = unsafe { libc::epoll_ctl(epfd, libc::EPOLL_CTL_ADD, fd, &mut ev) };
    if res < 0 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

impl Backend for EpollBackend {
    fn wait(&mut self) -> Wake {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; 2];
        let n = unsafe { libc::epoll_wait(self.epoll.0, events.as_mut_ptr(), 2, -1) };
        if n < 0 {
            let errno = unix::last_errno();
            return if errno == libc::EINTR {
                Wake::Spurious
            } else {
                Wake::Error(errno)
            };
        }

        let mut woken = false;
        let mut port_flags = 0u32;
        for ev in &events[..n as usize] {
            let token = ev.u64;
            let flags = ev.events;
            if token == WAKE_TOKEN {
                self.wake.drain();
                woken = true;
            } else if token == PORT_TOKEN {
                port_flags |= flags;
            }
        }

        if woken {
            return Wake::Exit;
        }
        let failure = (libc::EPOLLERR | libc::EPOLLHUP) as u32;
        if port_flags & failure != 0 {
            return Wake::Error(port_flags as i32);
        }
        if port_flags & (libc::EPOLLIN | libc::EPOLLPRI) as u32 != 0 {
            return Wake::Ready(RoleSet::DATA);
        }
        Wake::Spurious
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        unix::read_fd(self.port, buf)
    }

    fn line_status(&mut self) -> Result<LineStatus> {
        unix::modem_status(self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::super::unix::test_pipe::Pipe;
    use super::*;

    #[test]
    fn test_readable_port_reports_data() {
        let pipe = Pipe::new();
        let (mut backend, _waker) = EpollBackend::new(pipe.read.0).unwrap();

        pipe.feed(b"hello");
        assert_eq!(backend.wait(), Wake::Ready(RoleSet::DATA));

        let mut buf = [0u8; 64];
        assert_eq!(backend.read(&mut buf), ReadStatus::Complete(5));
        assert_eq!(&buf[..5], b"hello");
    }

    #[test]
    fn test_waker_interrupts_wait() {
        let pipe = Pipe::new();
        let (mut backend, waker) = EpollBackend::new(pipe.read.0).unwrap();

        let handle = std::thread::spawn(move || backend.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        waker.wake().unwrap();

        assert_eq!(handle.join().unwrap(), Wake::Exit);
    }

    #[test]
    fn test_wake_takes_priority_over_data() {
        let pipe = Pipe::new();
        let (mut backend, waker) = EpollBackend::new(pipe.read.0).unwrap();

        pipe.feed(b"x");
        waker.wake().unwrap();
        assert_eq!(backend.wait(), Wake::Exit);
        // Drained wake, data still pending.
        assert_eq!(backend.wait(), Wake::Ready(RoleSet::DATA));
    }

    #[test]
    fn test_hangup_reports_error() {
        let pipe = Pipe::new();
        let Pipe { read, write } = pipe;
        let (mut backend, _waker) = EpollBackend::new(read.0).unwrap();
        drop(write);

        match backend.wait() {
            Wake::Error(flags) => assert_ne!(flags as u32 & libc::EPOLLHUP as u32, 0),
            other => panic!("expected error wake, got {:?}", other),
        }
    }
}
