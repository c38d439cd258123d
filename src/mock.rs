//! In-memory driver, sinks and hot-plug source for exercising the listener
//! threads without hardware.
//!
//! A [`MockDriver`] hands out [`MockBackend`]s whose readiness is scripted
//! through a [`MockPort`]. Data steps go to whichever thread serves the data
//! role, line changes to the one serving the event role.
//!
//! ```
//! use serial_com_listener::mock::{MockDriver, MockRead, RecordingSink};
//! use serial_com_listener::{ListenerManager, PortHandle};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let driver = Arc::new(MockDriver::per_role());
//! let manager = ListenerManager::with_driver(driver.clone());
//! let handle = PortHandle::from_raw(3);
//! let sink = Arc::new(RecordingSink::new());
//!
//! manager.register_data_listener(handle, sink.clone()).unwrap();
//! driver.port(handle).feed(vec![MockRead::Data(b"ping".to_vec())]);
//!
//! assert!(sink.wait_for(Duration::from_secs(1), |d| !d.is_empty()));
//! assert_eq!(sink.data(), b"ping");
//! ```

use crate::backend::{
    Backend, Driver, OpenRequest, Opened, ReadStatus, ThreadLayout, Wake, Waker,
};
use crate::config::MonitorConfig;
use crate::error::SinkError;
use crate::handle::PortHandle;
use crate::line::{EventDelivery, LineEvents, LineStatus};
use crate::monitor::{
    DeviceNotice, HotplugProvider, HotplugSource, PresenceProbe, ProbeVerdict,
};
use crate::role::{Role, RoleSet};
use crate::sink::{ListenerSink, PortEvent, PortEventSink, RuntimeAttach};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One scripted result of [`Backend::read`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRead {
    /// Bytes that complete the notification.
    Data(Vec<u8>),
    /// Bytes with more still pending.
    Partial(Vec<u8>),
    Interrupted,
    Fail(i32),
}

#[derive(Debug, Clone)]
enum Step {
    Readable(Vec<MockRead>),
    LineChange(LineStatus),
    WaitError(i32),
}

#[derive(Debug, Default)]
struct PortState {
    data: VecDeque<Step>,
    event: VecDeque<Step>,
    lines: LineStatus,
}

#[derive(Debug, Default)]
struct PortShared {
    state: Mutex<PortState>,
    cond: Condvar,
}

/// Scripting handle for one mock port.
#[derive(Debug, Clone)]
pub struct MockPort {
    shared: Arc<PortShared>,
}

impl MockPort {
    /// Make the port readable once; the reads are replayed in order, then
    /// the port reports empty.
    pub fn feed(&self, reads: Vec<MockRead>) {
        self.push(Role::Data, Step::Readable(reads));
    }

    /// Change the control lines and signal the event thread.
    pub fn set_lines(&self, lines: LineStatus) {
        self.push(Role::Event, Step::LineChange(lines));
    }

    /// Make the next `count` waits of the thread serving `role` fail with `code`.
    pub fn wait_errors(&self, role: Role, code: i32, count: usize) {
        let mut state = self.shared.state.lock();
        let queue = match role {
            Role::Data => &mut state.data,
            Role::Event => &mut state.event,
        };
        queue.extend(std::iter::repeat(Step::WaitError(code)).take(count));
        drop(state);
        self.shared.cond.notify_all();
    }

    /// Last line status a backend picked up.
    pub fn lines(&self) -> LineStatus {
        self.shared.state.lock().lines
    }

    /// Steps not yet consumed by any backend.
    pub fn pending_steps(&self) -> usize {
        let state = self.shared.state.lock();
        state.data.len() + state.event.len()
    }

    fn push(&self, role: Role, step: Step) {
        let mut state = self.shared.state.lock();
        match role {
            Role::Data => state.data.push_back(step),
            Role::Event => state.event.push_back(step),
        }
        drop(state);
        self.shared.cond.notify_all();
    }
}

/// Backend that blocks on its port's script.
pub struct MockBackend {
    port: Arc<PortShared>,
    woken: Arc<AtomicBool>,
    mask: Arc<Mutex<RoleSet>>,
    reads: VecDeque<MockRead>,
    lines: LineStatus,
    live: Arc<AtomicUsize>,
}

impl Backend for MockBackend {
    fn wait(&mut self) -> Wake {
        let mut state = self.port.state.lock();
        loop {
            if self.woken.swap(false, Ordering::AcqRel) {
                return Wake::Exit;
            }
            let mask = *self.mask.lock();
            let step = if mask.contains(Role::Data) && !state.data.is_empty() {
                state.data.pop_front()
            } else if mask.contains(Role::Event) {
                state.event.pop_front()
            } else {
                None
            };
            match step {
                Some(Step::Readable(reads)) => {
                    self.reads = reads.into();
                    return Wake::Ready(RoleSet::DATA);
                }
                Some(Step::LineChange(lines)) => {
                    state.lines = lines;
                    self.lines = lines;
                    return Wake::Ready(RoleSet::EVENT);
                }
                Some(Step::WaitError(code)) => return Wake::Error(code),
                None => self.port.cond.wait(&mut state),
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> ReadStatus {
        let copy = |buf: &mut [u8], bytes: &[u8]| {
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            n
        };
        match self.reads.pop_front() {
            Some(MockRead::Data(bytes)) => ReadStatus::Complete(copy(buf, &bytes)),
            Some(MockRead::Partial(bytes)) => ReadStatus::Partial(copy(buf, &bytes)),
            Some(MockRead::Interrupted) => ReadStatus::Interrupted,
            Some(MockRead::Fail(code)) => ReadStatus::Failed(code),
            None => ReadStatus::Empty,
        }
    }

    fn line_status(&mut self) -> io::Result<LineStatus> {
        Ok(self.lines)
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MockWaker {
    handle: PortHandle,
    port: Arc<PortShared>,
    woken: Arc<AtomicBool>,
    mask: Arc<Mutex<RoleSet>>,
    log: Arc<Mutex<Vec<(PortHandle, RoleSet)>>>,
}

impl Waker for MockWaker {
    fn wake(&self) -> io::Result<()> {
        let _state = self.port.state.lock();
        self.woken.store(true, Ordering::Release);
        self.port.cond.notify_all();
        Ok(())
    }

    fn set_roles(&self, roles: RoleSet) -> io::Result<()> {
        let _state = self.port.state.lock();
        *self.mask.lock() = roles;
        self.log.lock().push((self.handle, roles));
        self.port.cond.notify_all();
        Ok(())
    }
}

#[derive(Default)]
struct DriverState {
    ports: HashMap<PortHandle, MockPort>,
    failures: VecDeque<i32>,
    opens: usize,
}

/// Driver backed by scripted in-memory ports.
pub struct MockDriver {
    layout: ThreadLayout,
    delivery: EventDelivery,
    unsupported: Option<Role>,
    state: Mutex<DriverState>,
    live: Arc<AtomicUsize>,
    masks: Arc<Mutex<Vec<(PortHandle, RoleSet)>>>,
}

impl MockDriver {
    pub fn new(layout: ThreadLayout) -> Self {
        Self {
            layout,
            delivery: EventDelivery::OnChange,
            unsupported: None,
            state: Mutex::new(DriverState::default()),
            live: Arc::new(AtomicUsize::new(0)),
            masks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// One thread per role, like the Unix backends.
    pub fn per_role() -> Self {
        Self::new(ThreadLayout::PerRole)
    }

    /// One thread per handle, like the Windows backend.
    pub fn shared() -> Self {
        Self::new(ThreadLayout::Shared)
    }

    pub fn with_delivery(mut self, delivery: EventDelivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn without_role(mut self, role: Role) -> Self {
        self.unsupported = Some(role);
        self
    }

    /// Scripting handle for `handle`, created on first use.
    pub fn port(&self, handle: PortHandle) -> MockPort {
        self.state
            .lock()
            .ports
            .entry(handle)
            .or_insert_with(|| MockPort {
                shared: Arc::new(PortShared::default()),
            })
            .clone()
    }

    /// Make the next backend open fail with `errno`.
    pub fn fail_next_open(&self, errno: i32) {
        self.state.lock().failures.push_back(errno);
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().opens
    }

    /// Backends opened and not yet dropped.
    pub fn live_backends(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Every wait mask applied, at open and on later updates.
    pub fn mask_log(&self) -> Vec<(PortHandle, RoleSet)> {
        self.masks.lock().clone()
    }
}

impl Driver for MockDriver {
    fn layout(&self) -> ThreadLayout {
        self.layout
    }

    fn supports(&self, role: Role) -> bool {
        self.unsupported != Some(role)
    }

    fn open(&self, request: &OpenRequest) -> io::Result<Opened> {
        let port = {
            let mut state = self.state.lock();
            if let Some(errno) = state.failures.pop_front() {
                return Err(io::Error::from_raw_os_error(errno));
            }
            state.opens += 1;
            drop(state);
            self.port(request.handle)
        };

        let roles = request.serves.intersection(request.active);
        self.masks.lock().push((request.handle, roles));
        let woken = Arc::new(AtomicBool::new(false));
        let mask = Arc::new(Mutex::new(roles));
        self.live.fetch_add(1, Ordering::SeqCst);

        let backend = MockBackend {
            port: Arc::clone(&port.shared),
            woken: Arc::clone(&woken),
            mask: Arc::clone(&mask),
            reads: VecDeque::new(),
            lines: LineStatus::default(),
            live: Arc::clone(&self.live),
        };
        let waker = MockWaker {
            handle: request.handle,
            port: port.shared,
            woken,
            mask,
            log: Arc::clone(&self.masks),
        };
        Ok(Opened {
            backend: Box::new(backend),
            waker: Arc::new(waker),
            delivery: self.delivery,
        })
    }

    fn line_status(&self, handle: PortHandle) -> io::Result<LineStatus> {
        let state = self.state.lock();
        match state.ports.get(&handle) {
            Some(port) => Ok(port.lines()),
            None => Err(io::Error::from_raw_os_error(9)),
        }
    }
}

/// What a [`RecordingSink`] received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Data(Vec<u8>),
    DataError(i32),
    Event(LineEvents),
}

/// How a [`RecordingSink`] misbehaves on its next delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFault {
    Reject,
    Panic,
}

type Hook = Box<dyn Fn(&Delivery) + Send + Sync>;

/// Sink that records every delivery and lets tests wait for them.
#[derive(Default)]
pub struct RecordingSink {
    deliveries: Mutex<Vec<Delivery>>,
    cond: Condvar,
    attached: AtomicUsize,
    detached: AtomicUsize,
    refuse_attach: AtomicBool,
    fault: Mutex<Option<SinkFault>>,
    hook: Mutex<Option<Hook>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_attach(&self) {
        self.refuse_attach.store(true, Ordering::SeqCst);
    }

    /// Fault on the next delivery only; that delivery is not recorded.
    pub fn fault_once(&self, fault: SinkFault) {
        *self.fault.lock() = Some(fault);
    }

    /// Run `hook` on the listener thread after each recorded delivery.
    pub fn on_delivery<F>(&self, hook: F)
    where
        F: Fn(&Delivery) + Send + Sync + 'static,
    {
        *self.hook.lock() = Some(Box::new(hook));
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// All delivered bytes, concatenated.
    pub fn data(&self) -> Vec<u8> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Data(bytes) => Some(bytes.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }

    pub fn data_buffers(&self) -> usize {
        self.count(|d| matches!(d, Delivery::Data(_)))
    }

    pub fn errors(&self) -> Vec<i32> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::DataError(code) => Some(*code),
                _ => None,
            })
            .collect()
    }

    pub fn events(&self) -> Vec<LineEvents> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|d| match d {
                Delivery::Event(events) => Some(*events),
                _ => None,
            })
            .collect()
    }

    pub fn attach_count(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }

    pub fn detach_count(&self) -> usize {
        self.detached.load(Ordering::SeqCst)
    }

    /// Block until `done` holds for the deliveries so far, or `timeout` passes.
    pub fn wait_for<F>(&self, timeout: Duration, done: F) -> bool
    where
        F: Fn(&[Delivery]) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut deliveries = self.deliveries.lock();
        while !done(&deliveries) {
            if self.cond.wait_until(&mut deliveries, deadline).timed_out() {
                return done(&deliveries);
            }
        }
        true
    }

    fn count<F: Fn(&Delivery) -> bool>(&self, pred: F) -> usize {
        self.deliveries.lock().iter().filter(|d| pred(d)).count()
    }

    fn record(&self, delivery: Delivery) -> Result<(), SinkError> {
        match self.fault.lock().take() {
            Some(SinkFault::Reject) => return Err(SinkError::rejected("scripted rejection")),
            Some(SinkFault::Panic) => panic!("scripted sink panic"),
            None => {}
        }
        self.deliveries.lock().push(delivery.clone());
        self.cond.notify_all();
        if let Some(hook) = self.hook.lock().as_ref() {
            hook(&delivery);
        }
        Ok(())
    }
}

impl RuntimeAttach for RecordingSink {
    fn attach(&self) -> Result<(), SinkError> {
        if self.refuse_attach.load(Ordering::SeqCst) {
            return Err(SinkError::attach("runtime refused thread"));
        }
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach(&self) {
        self.detached.fetch_add(1, Ordering::SeqCst);
    }
}

impl ListenerSink for RecordingSink {
    fn deliver_data(&self, data: &[u8]) -> Result<(), SinkError> {
        self.record(Delivery::Data(data.to_vec()))
    }

    fn deliver_data_error(&self, code: i32) -> Result<(), SinkError> {
        self.record(Delivery::DataError(code))
    }

    fn deliver_event(&self, events: LineEvents) -> Result<(), SinkError> {
        self.record(Delivery::Event(events))
    }
}

/// Records hot-plug notifications.
#[derive(Default)]
pub struct RecordingPortSink {
    events: Mutex<Vec<PortEvent>>,
    cond: Condvar,
}

impl RecordingPortSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PortEvent> {
        self.events.lock().clone()
    }

    /// Block until at least `count` events arrived, or `timeout` passes.
    pub fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while events.len() < count {
            if self.cond.wait_until(&mut events, deadline).timed_out() {
                return events.len() >= count;
            }
        }
        true
    }
}

impl RuntimeAttach for RecordingPortSink {}

impl PortEventSink for RecordingPortSink {
    fn on_port_event(&self, event: PortEvent) -> Result<(), SinkError> {
        self.events.lock().push(event);
        self.cond.notify_all();
        Ok(())
    }
}

/// Probe returning a verdict set by the test.
pub struct MockProbe {
    verdict: Mutex<ProbeVerdict>,
    calls: AtomicUsize,
}

impl MockProbe {
    pub fn new(verdict: ProbeVerdict) -> Self {
        Self {
            verdict: Mutex::new(verdict),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set(&self, verdict: ProbeVerdict) {
        *self.verdict.lock() = verdict;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PresenceProbe for MockProbe {
    fn probe(&self, _port: &str) -> ProbeVerdict {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.lock().clone()
    }
}

#[derive(Default)]
struct HotplugState {
    notices: VecDeque<DeviceNotice>,
    woken: bool,
    subscriptions: usize,
}

#[derive(Default)]
struct HotplugShared {
    state: Mutex<HotplugState>,
    cond: Condvar,
}

/// Provider whose sources replay notices pushed by the test.
pub struct MockHotplug {
    shared: Arc<HotplugShared>,
    reports_existing: bool,
    fail_open: Mutex<Option<i32>>,
    probe: Arc<MockProbe>,
}

impl MockHotplug {
    /// `reports_existing` controls whether the first `Added` notice is treated
    /// as the initial enumeration.
    pub fn new(reports_existing: bool, probe: Arc<MockProbe>) -> Self {
        Self {
            shared: Arc::new(HotplugShared::default()),
            reports_existing,
            fail_open: Mutex::new(None),
            probe,
        }
    }

    pub fn push(&self, notice: DeviceNotice) {
        self.shared.state.lock().notices.push_back(notice);
        self.shared.cond.notify_all();
    }

    pub fn fail_next_open(&self, errno: i32) {
        *self.fail_open.lock() = Some(errno);
    }

    /// Notices queued and not yet taken by a source.
    pub fn pending(&self) -> usize {
        self.shared.state.lock().notices.len()
    }

    pub fn subscriptions(&self) -> usize {
        self.shared.state.lock().subscriptions
    }
}

impl HotplugProvider for MockHotplug {
    fn open_source(&self, _config: &MonitorConfig) -> io::Result<Box<dyn HotplugSource>> {
        if let Some(errno) = self.fail_open.lock().take() {
            return Err(io::Error::from_raw_os_error(errno));
        }
        self.shared.state.lock().subscriptions += 1;
        Ok(Box::new(MockHotplugSource {
            shared: Arc::clone(&self.shared),
            reports_existing: self.reports_existing,
        }))
    }

    fn probe(&self) -> Arc<dyn PresenceProbe> {
        self.probe.clone()
    }
}

struct MockHotplugSource {
    shared: Arc<HotplugShared>,
    reports_existing: bool,
}

struct MockHotplugWaker(Arc<HotplugShared>);

impl Waker for MockHotplugWaker {
    fn wake(&self) -> io::Result<()> {
        self.0.state.lock().woken = true;
        self.0.cond.notify_all();
        Ok(())
    }
}

impl HotplugSource for MockHotplugSource {
    fn reports_existing(&self) -> bool {
        self.reports_existing
    }

    fn waker(&self) -> Arc<dyn Waker> {
        Arc::new(MockHotplugWaker(Arc::clone(&self.shared)))
    }

    fn next_notice(&mut self) -> io::Result<Option<DeviceNotice>> {
        let mut state = self.shared.state.lock();
        loop {
            if std::mem::take(&mut state.woken) {
                return Ok(None);
            }
            if let Some(notice) = state.notices.pop_front() {
                return Ok(Some(notice));
            }
            self.shared.cond.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventsConfig;

    const ENODEV: i32 = 19;

    fn request(handle: PortHandle, roles: RoleSet) -> OpenRequest {
        OpenRequest {
            handle,
            serves: roles,
            active: roles,
            events: EventsConfig::default(),
        }
    }

    #[test]
    fn test_backend_replays_reads() {
        let driver = MockDriver::per_role();
        let handle = PortHandle::from_raw(1);
        let Opened { mut backend, .. } = driver.open(&request(handle, RoleSet::DATA)).unwrap();

        driver.port(handle).feed(vec![
            MockRead::Partial(b"ab".to_vec()),
            MockRead::Data(b"c".to_vec()),
        ]);
        assert_eq!(backend.wait(), Wake::Ready(RoleSet::DATA));

        let mut buf = [0u8; 8];
        assert_eq!(backend.read(&mut buf), ReadStatus::Partial(2));
        assert_eq!(backend.read(&mut buf), ReadStatus::Complete(1));
        assert_eq!(backend.read(&mut buf), ReadStatus::Empty);
    }

    #[test]
    fn test_waker_and_live_count() {
        let driver = MockDriver::per_role();
        let handle = PortHandle::from_raw(2);
        let Opened {
            mut backend, waker, ..
        } = driver.open(&request(handle, RoleSet::EVENT)).unwrap();
        assert_eq!(driver.live_backends(), 1);

        // Data steps are not for an event-only backend.
        driver.port(handle).feed(vec![MockRead::Data(vec![1])]);
        waker.wake().unwrap();
        assert_eq!(backend.wait(), Wake::Exit);
        assert_eq!(driver.port(handle).pending_steps(), 1);

        drop(backend);
        assert_eq!(driver.live_backends(), 0);
    }

    #[test]
    fn test_failed_open() {
        let driver = MockDriver::per_role();
        driver.fail_next_open(ENODEV);
        let err = driver
            .open(&request(PortHandle::from_raw(3), RoleSet::DATA))
            .err()
            .unwrap();
        assert_eq!(err.raw_os_error(), Some(ENODEV));
        assert_eq!(driver.open_count(), 0);
    }
}
