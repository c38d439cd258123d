//! Port presence monitoring.
//!
//! A [`PortMonitor`] owns one thread that pulls [`DeviceNotice`]s from a
//! [`HotplugSource`] and turns them into [`PortEvent`]s for the monitored port:
//!
//! * the first `Added` notice from a source that reports already-present
//!   devices is the initial enumeration and is not delivered;
//! * every later `Added` notice is delivered once;
//! * a `Removed` notice is delivered only if a [`PresenceProbe`] confirms the
//!   monitored port path is gone.

pub mod enumerate;
pub mod probe;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub mod uevent;

pub use probe::{FsProbe, PresenceProbe, ProbeVerdict};

use crate::backend::Waker;
use crate::config::{ListenerConfig, MonitorConfig};
use crate::error::{os_code, ListenerError, ERR_INIT_FAILED};
use crate::init::InitSignal;
use crate::looper::ErrorThrottle;
use crate::sink::{guarded, panic_message, PortEvent, PortEventSink, SinkAttachment};
use crate::worker::Worker;
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Pause after a failed [`HotplugSource::next_notice`] before trying again.
const SOURCE_ERROR_PAUSE: Duration = Duration::from_millis(100);

/// A device reported by a hot-plug source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    /// Stable identifier within the source (device path or port name).
    pub id: String,
    /// Serial port name, when the source knows it.
    pub port_name: Option<String>,
    pub subsystem: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAction {
    Added,
    Removed,
}

/// One hot-plug notification; yields at most one [`PortEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNotice {
    pub action: DeviceAction,
    pub devices: Vec<DeviceInfo>,
}

impl DeviceNotice {
    pub fn added(devices: Vec<DeviceInfo>) -> Self {
        Self {
            action: DeviceAction::Added,
            devices,
        }
    }

    pub fn removed(devices: Vec<DeviceInfo>) -> Self {
        Self {
            action: DeviceAction::Removed,
            devices,
        }
    }
}

/// Blocking stream of device notices, owned by a monitor thread.
pub trait HotplugSource: Send {
    /// Whether the first `Added` notice describes devices present at subscription.
    fn reports_existing(&self) -> bool;

    /// Waker that makes a blocked [`next_notice`](Self::next_notice) return `Ok(None)`.
    fn waker(&self) -> Arc<dyn Waker>;

    /// Block for the next relevant notice. `Ok(None)` means woken or nothing relevant.
    fn next_notice(&mut self) -> io::Result<Option<DeviceNotice>>;
}

/// Creates hot-plug sources and presence probes.
pub trait HotplugProvider: Send + Sync {
    /// Subscribe to device notifications. Runs on the monitor thread.
    fn open_source(&self, config: &MonitorConfig) -> io::Result<Box<dyn HotplugSource>>;

    fn probe(&self) -> Arc<dyn PresenceProbe>;
}

/// Kernel uevents on Linux, port enumeration elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeHotplug;

impl HotplugProvider for NativeHotplug {
    #[cfg(any(target_os = "linux", target_os = "android"))]
    fn open_source(&self, config: &MonitorConfig) -> io::Result<Box<dyn HotplugSource>> {
        match uevent::UeventSource::new(config) {
            Ok(source) => Ok(Box::new(source)),
            Err(e) => {
                warn!(error = %e, "uevent subscription failed; falling back to port enumeration");
                Ok(Box::new(enumerate::EnumerationSource::native(config)))
            }
        }
    }

    #[cfg(not(any(target_os = "linux", target_os = "android")))]
    fn open_source(&self, config: &MonitorConfig) -> io::Result<Box<dyn HotplugSource>> {
        Ok(Box::new(enumerate::EnumerationSource::native(config)))
    }

    fn probe(&self) -> Arc<dyn PresenceProbe> {
        Arc::new(FsProbe)
    }
}

/// A device the monitor has seen attached and not yet seen leave.
#[derive(Debug)]
pub struct DriverRef {
    pub device: DeviceInfo,
    pub attached_at: Instant,
}

impl Drop for DriverRef {
    fn drop(&mut self) {
        trace!(device = %self.device.id, "driver reference released");
    }
}

struct MonitorState {
    port: String,
    sink: Arc<dyn PortEventSink>,
    probe: Arc<dyn PresenceProbe>,
    tracked: HashMap<String, DriverRef>,
    initial_pending: bool,
}

impl MonitorState {
    fn handle(&mut self, notice: DeviceNotice) {
        match notice.action {
            DeviceAction::Added => {
                let now = Instant::now();
                for device in notice.devices {
                    self.tracked.insert(
                        device.id.clone(),
                        DriverRef {
                            device,
                            attached_at: now,
                        },
                    );
                }
                if std::mem::take(&mut self.initial_pending) {
                    debug!(port = %self.port, tracked = self.tracked.len(), "initial enumeration suppressed");
                    return;
                }
                info!(port = %self.port, "device added");
                let sink = &self.sink;
                guarded("port_event", || sink.on_port_event(PortEvent::Added));
            }
            DeviceAction::Removed => {
                for device in &notice.devices {
                    if let Some(reference) = self.tracked.remove(&device.id) {
                        debug!(
                            device = %device.id,
                            attached_for = ?reference.attached_at.elapsed(),
                            "device detached"
                        );
                    }
                }
                match self.probe.probe(&self.port) {
                    ProbeVerdict::Present => {
                        debug!(port = %self.port, "removal notice but port still present; ignoring");
                    }
                    ProbeVerdict::Ambiguous(reason) => {
                        warn!(port = %self.port, %reason, "cannot confirm port removal; ignoring");
                    }
                    ProbeVerdict::Removed => {
                        info!(port = %self.port, "device removed");
                        let sink = &self.sink;
                        guarded("port_event", || sink.on_port_event(PortEvent::Removed));
                    }
                }
            }
        }
    }
}

impl Drop for MonitorState {
    fn drop(&mut self) {
        if !self.tracked.is_empty() {
            debug!(port = %self.port, count = self.tracked.len(), "releasing tracked devices");
        }
    }
}

/// A running presence monitor for one port.
pub struct PortMonitor {
    port: String,
    worker: Worker,
    join_timeout: Duration,
    wake_retry: Duration,
}

impl PortMonitor {
    /// Start monitoring `port`, blocking until the source is subscribed.
    pub fn start(
        port: impl Into<String>,
        sink: Arc<dyn PortEventSink>,
        provider: Arc<dyn HotplugProvider>,
        config: &MonitorConfig,
        listener: &ListenerConfig,
    ) -> Result<Self, ListenerError> {
        let port = port.into();
        let exit = Arc::new(AtomicBool::new(false));
        let init: Arc<InitSignal<Arc<dyn Waker>>> = Arc::new(InitSignal::new());
        let name = format!("serial-monitor-{}", short_name(&port));

        let thread = {
            let ctx = MonitorContext {
                port: port.clone(),
                sink,
                provider,
                config: config.clone(),
                exit: Arc::clone(&exit),
            };
            let init = Arc::clone(&init);
            thread::Builder::new()
                .name(name.clone())
                .spawn(move || ctx.run(&init))
                .map_err(ListenerError::Spawn)?
        };

        match init.wait() {
            Ok(waker) => {
                info!(%port, "port monitor started");
                Ok(Self {
                    port,
                    worker: Worker::new(name, exit, waker, thread),
                    join_timeout: listener.join_timeout(),
                    wake_retry: listener.wake_retry(),
                })
            }
            Err(code) => {
                if thread.join().is_err() {
                    warn!(%port, "port monitor panicked during setup");
                }
                Err(ListenerError::MonitorInitFailed { port, code })
            }
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    /// Stop the monitor thread and release everything it tracked.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.worker.stop(self.join_timeout, self.wake_retry);
        info!(port = %self.port, "port monitor stopped");
    }
}

impl Drop for PortMonitor {
    fn drop(&mut self) {
        if self.worker.is_running() {
            self.shutdown();
        }
    }
}

fn short_name(port: &str) -> &str {
    port.rsplit(['/', '\\']).next().unwrap_or(port)
}

struct MonitorContext {
    port: String,
    sink: Arc<dyn PortEventSink>,
    provider: Arc<dyn HotplugProvider>,
    config: MonitorConfig,
    exit: Arc<AtomicBool>,
}

impl MonitorContext {
    fn run(self, init: &InitSignal<Arc<dyn Waker>>) {
        let port = self.port.clone();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.serve(init))) {
            error!(%port, panic = %panic_message(payload.as_ref()), "port monitor panicked");
            init.complete(Err(ERR_INIT_FAILED));
        }
    }

    fn serve(self, init: &InitSignal<Arc<dyn Waker>>) {
        let MonitorContext {
            port,
            sink,
            provider,
            config,
            exit,
        } = self;

        let _attachment = match SinkAttachment::attach(&*sink) {
            Ok(guard) => guard,
            Err(e) => {
                warn!(%port, error = %e, "port sink attach failed");
                init.complete(Err(ERR_INIT_FAILED));
                return;
            }
        };

        let mut source = match provider.open_source(&config) {
            Ok(source) => source,
            Err(e) => {
                warn!(%port, error = %e, "hot-plug subscription failed");
                init.complete(Err(os_code(&e)));
                return;
            }
        };
        init.complete(Ok(source.waker()));

        let mut state = MonitorState {
            port,
            sink: Arc::clone(&sink),
            probe: provider.probe(),
            tracked: HashMap::new(),
            initial_pending: source.reports_existing(),
        };
        let mut errors = ErrorThrottle::new(100);

        while !exit.load(Ordering::Acquire) {
            match source.next_notice() {
                Ok(Some(notice)) => {
                    if exit.load(Ordering::Acquire) {
                        break;
                    }
                    state.handle(notice);
                }
                Ok(None) => {}
                Err(e) => {
                    if errors.record() {
                        warn!(port = %state.port, error = %e, "hot-plug source keeps failing");
                    } else {
                        debug!(port = %state.port, error = %e, "hot-plug source error");
                    }
                    thread::sleep(SOURCE_ERROR_PAUSE);
                }
            }
        }
        debug!(port = %state.port, "port monitor loop exiting");
    }
}
