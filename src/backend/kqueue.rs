//! kqueue data backend with a self-pipe wake.

use super::unix::{self, OwnedFd};
use super::{Backend, ReadStatus, Wake, Waker};
use crate::line::LineStatus;
use crate::role::RoleSet;
use std::io::{Error, Result};
use std::os::unix::io::RawFd;
use std::sync::Arc;

fn read_filter(fd: RawFd) -> libc::kevent {
    // Field sets differ between the BSDs; start from zero and fill what we use.
    let mut ev: libc::kevent = unsafe { std::mem::zeroed() };
    ev.ident = fd as _;
    ev.filter = libc::EVFILT_READ;
    ev.flags = (libc::EV_ADD | libc::EV_ENABLE) as _;
    ev
}

/// Both ends of the wake pipe. One byte written to `write` wakes the kqueue.
#[derive(Debug)]
pub struct WakePipe {
    read: OwnedFd,
    write: OwnedFd,
}

impl WakePipe {
    fn new() -> Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } < 0 {
            return Err(Error::last_os_error());
        }
        let pipe = WakePipe {
            read: OwnedFd(fds[0]),
            write: OwnedFd(fds[1]),
        };
        for fd in fds {
            unsafe {
                libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC);
                let flags = libc::fcntl(fd, libc::F_GETFL);
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }
        }
        Ok(pipe)
    }

    fn drain(&self) {
        let mut buf = [0u8; 64];
        loop {
            let n = unsafe {
                libc::read(self.read.0, buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n <= 0 {
                break;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipeWaker(Arc<WakePipe>);

impl Waker for PipeWaker {
    fn wake(&self) -> Result<()> {
        let byte = 1u8;
        let n = unsafe { libc::write(self.0.write.0, &byte as *const u8 as *const libc::c_void, 1) };
        if n < 0 {
            let err = Error::last_os_error();
            // Pipe full: wakes are already queued.
            if err.raw_os_error() == Some(libc::EAGAIN) {
                return Ok(());
            }
            return Err(err);
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct KqueueBackend {
    port: RawFd,
    kq: OwnedFd,
    wake: Arc<WakePipe>,
}

impl KqueueBackend {
    pub fn new(port: RawFd) -> Result<(Self, PipeWaker)> {
        let wake = Arc::new(WakePipe::new()?);

        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(Error::last_os_error());
        }
        let kq = OwnedFd(kq);

        let changes = [read_filter(port), read_filter(wake.read.0)];
        let res = unsafe {
            libc::kevent(
                kq.0,
                changes.as_ptr(),
                changes.len() as _,
                std::ptr::null_mut(),
                0,
                std::ptr::null(),
            )
        };
        if res < 0 {
            return Err(Error::last_os_error());
        }

        let waker = PipeWaker(Arc::clone(&wake));
        Ok((KqueueBackend { port, kq, wake }, waker))
    }
}

impl Backend for KqueueBackend {
    fn wait(&mut self) -> Wake {
        let mut events: [libc::kevent; 2] = unsafe { std::mem::zeroed() };
        let n = unsafe {
            libc::kevent(
                self.kq.0,
                std::ptr::null(),
                0,
                events.as_mut_ptr(),
                events.len() as _,
                std::ptr::null(),
            )
        };
        if n < 0 {
            let errno = unix::last_errno();
            return if errno == libc::EINTR {
                Wake::Spurious
            } else {
                Wake::Error(errno)
            };
        }

        let mut woken = false;
        let mut readable = false;
        let mut error = None;
        for ev in &events[..n as usize] {
            let ident = ev.ident as RawFd;
            if ident == self.wake.read.0 {
                self.wake.drain();
                woken = true;
            } else if ident == self.port {
                if ev.flags & (libc::EV_ERROR as u16) != 0 {
                    error = Some(ev.data as i32);
                } else {
                    readable = true;
                }
            }
        }

        if woken {
            Wake::Exit
        } else if let Some(code) = error {
            Wake::Error(code)
        } else if readable {
            Wake::Ready(RoleSet::DATA)
        } else {
            Wake::Spurious
        }
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
        let (mut backend, _waker) = KqueueBackend::new(pipe.read.0).unwrap();

        pipe.feed(b"abc");
        assert_eq!(backend.wait(), Wake::Ready(RoleSet::DATA));

        let mut buf = [0u8; 16];
        assert_eq!(backend.read(&mut buf), ReadStatus::Complete(3));
    }

    #[test]
    fn test_waker_interrupts_wait() {
        let pipe = Pipe::new();
        let (mut backend, waker) = KqueueBackend::new(pipe.read.0).unwrap();

        let handle = std::thread::spawn(move || backend.wait());
        std::thread::sleep(std::time::Duration::from_millis(20));
        waker.wake().unwrap();

        assert_eq!(handle.join().unwrap(), Wake::Exit);
    }
}
