//! Fixed-interval status polling for platforms without a blocking line-change wait.

use super::{Backend, ReadStatus, Wake, Waker};
use crate::line::LineStatus;
use crate::role::RoleSet;
use parking_lot::{Condvar, Mutex};
use std::io::Result;
use std::time::{Duration, Instant};

/// An interruptible sleep of a fixed interval.
#[derive(Debug)]
pub struct Ticker {
    interval: Duration,
    woken: Mutex<bool>,
    cond: Condvar,
}

/// Result of [`Ticker::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Elapsed,
    Woken,
}

impl Ticker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            woken: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Sleep one interval unless woken first.
    pub fn tick(&self) -> Tick {
        self.sleep(self.interval)
    }

    /// Sleep for `duration` unless woken first.
    pub fn sleep(&self, duration: Duration) -> Tick {
        let deadline = Instant::now() + duration;
        let mut woken = self.woken.lock();
        while !*woken {
            if self.cond.wait_until(&mut woken, deadline).timed_out() {
                break;
            }
        }
        if std::mem::take(&mut *woken) {
            Tick::Woken
        } else {
            Tick::Elapsed
        }
    }

    pub fn notify(&self) {
        *self.woken.lock() = true;
        self.cond.notify_all();
    }
}

impl Waker for Ticker {
    fn wake(&self) -> Result<()> {
        self.notify();
        Ok(())
    }
}

/// Reports a line change opportunity every tick; the listener decides whether
/// the status actually changed.
pub struct PolledStatusBackend<F> {
    ticker: std::sync::Arc<Ticker>,
    read_status: F,
}

impl<F> PolledStatusBackend<F>
where
    F: FnMut() -> Result<LineStatus> + Send,
{
    pub fn new(ticker: std::sync::Arc<Ticker>, read_status: F) -> Self {
        Self {
            ticker,
            read_status,
        }
    }
}

impl<F> Backend for PolledStatusBackend<F>
where
    F: FnMut() -> Result<LineStatus> + Send,
{
    fn wait(&mut self) -> Wake {
        match self.ticker.tick() {
            Tick::Woken => Wake::Exit,
            Tick::Elapsed => Wake::Ready(RoleSet::EVENT),
        }
    }

    fn read(&mut self, _buf: &mut [u8]) -> ReadStatus {
        ReadStatus::Empty
    }

    fn line_status(&mut self) -> Result<LineStatus> {
        (self.read_status)()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_tick_elapses() {
        let ticker = Ticker::new(Duration::from_millis(10));
        let start = Instant::now();
        assert_eq!(ticker.tick(), Tick::Elapsed);
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn test_notify_cuts_sleep_short() {
        let ticker = Arc::new(Ticker::new(Duration::from_secs(30)));
        let sleeper = {
            let ticker = Arc::clone(&ticker);
            thread::spawn(move || ticker.tick())
        };
        thread::sleep(Duration::from_millis(20));
        ticker.notify();
        assert_eq!(sleeper.join().unwrap(), Tick::Woken);
    }

    #[test]
    fn test_wake_before_tick_is_remembered() {
        let ticker = Ticker::new(Duration::from_secs(30));
        ticker.wake().unwrap();
        assert_eq!(ticker.tick(), Tick::Woken);
    }

    #[test]
    fn test_polled_backend_reports_event_role() {
        let ticker = Arc::new(Ticker::new(Duration::from_millis(1)));
        let mut backend = PolledStatusBackend::new(Arc::clone(&ticker), || {
            Ok(LineStatus {
                cts: true,
                ..LineStatus::default()
            })
        });
        assert_eq!(backend.wait(), Wake::Ready(RoleSet::EVENT));
        assert!(backend.line_status().unwrap().cts);

        ticker.notify();
        assert_eq!(backend.wait(), Wake::Exit);
    }
}
