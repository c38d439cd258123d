//! The listener loop run by every worker thread.
//!
//! One [`Looper`] serves whichever roles its backend reports ready: the data
//! role reads and delivers bytes, the event role reads the control lines and
//! delivers a [`LineEvents`] mask. The exit flag is checked after every wake,
//! before any port access.

pub mod assembler;

pub use assembler::{Chunk, ErrorThrottle, ReadAssembler};

use crate::backend::{Backend, Wake};
use crate::config::ListenerConfig;
use crate::handle::PortHandle;
use crate::line::{EventDelivery, LineEvents};
use crate::role::{AtomicRoleSet, Role, RoleSet};
use crate::sink::{guarded, ListenerSink};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Per-handle switches the control surface can flip while a loop runs.
#[derive(Debug)]
pub struct LooperControls {
    paused: AtomicBool,
    event_mask: AtomicU8,
}

impl Default for LooperControls {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            event_mask: AtomicU8::new(LineEvents::ALL.bits()),
        }
    }
}

impl LooperControls {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_event_mask(&self, mask: LineEvents) {
        self.event_mask.store(mask.bits(), Ordering::Release);
    }

    pub fn event_mask(&self) -> LineEvents {
        LineEvents::from_bits(self.event_mask.load(Ordering::Acquire))
    }
}

/// Everything a worker thread hands its loop.
pub struct Looper {
    handle: PortHandle,
    backend: Box<dyn Backend>,
    sink: Arc<dyn ListenerSink>,
    exit: Arc<AtomicBool>,
    serves: RoleSet,
    active: Arc<AtomicRoleSet>,
    controls: Arc<LooperControls>,
    delivery: EventDelivery,
    assembler: ReadAssembler,
    throttle: ErrorThrottle,
    backoff: Option<std::time::Duration>,
    previous: LineEvents,
}

impl Looper {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        handle: PortHandle,
        backend: Box<dyn Backend>,
        sink: Arc<dyn ListenerSink>,
        exit: Arc<AtomicBool>,
        serves: RoleSet,
        active: Arc<AtomicRoleSet>,
        controls: Arc<LooperControls>,
        delivery: EventDelivery,
        config: &ListenerConfig,
    ) -> Self {
        Self {
            handle,
            backend,
            sink,
            exit,
            serves,
            active,
            controls,
            delivery,
            assembler: ReadAssembler::new(config.read_chunk_size, config.partial_buffer_capacity),
            throttle: ErrorThrottle::new(config.error_threshold),
            backoff: config.error_backoff(),
            previous: LineEvents::NONE,
        }
    }

    /// Run until the exit flag is set. Consumes the loop; the backend is
    /// dropped (closing its descriptors) on return.
    pub fn run(mut self) {
        debug!(handle = %self.handle, roles = %self.serves, delivery = ?self.delivery, "listener loop started");
        while !self.exit.load(Ordering::Acquire) {
            let wake = self.backend.wait();
            if self.exit.load(Ordering::Acquire) {
                break;
            }
            match wake {
                Wake::Ready(ready) => {
                    self.throttle.reset();
                    let ready = ready_roles(ready, self.serves, self.active.load());
                    if ready.contains(Role::Data) {
                        self.service_data();
                    }
                    if ready.contains(Role::Event) {
                        self.service_events();
                    }
                }
                Wake::Error(code) => self.on_wait_error(code),
                Wake::Exit | Wake::Spurious => {
                    trace!(handle = %self.handle, ?wake, "woken without work");
                }
            }
        }
        debug!(handle = %self.handle, roles = %self.serves, "listener loop exiting");
    }

    fn service_data(&mut self) {
        let Self {
            backend,
            sink,
            assembler,
            controls,
            handle,
            ..
        } = self;
        let paused = controls.is_paused();
        assembler.drain(
            |buf| backend.read(buf),
            |chunk| match chunk {
                Chunk::Data(bytes) if paused => {
                    trace!(handle = %handle, len = bytes.len(), "data delivery paused, dropping");
                }
                Chunk::Data(bytes) => {
                    guarded("data", || sink.deliver_data(bytes));
                }
                Chunk::Error(code) => {
                    debug!(handle = %handle, code, "read failed");
                    guarded("data_error", || sink.deliver_data_error(code));
                }
            },
        );
    }

    fn service_events(&mut self) {
        let status = match self.backend.line_status() {
            Ok(status) => status,
            Err(e) => {
                warn!(handle = %self.handle, error = %e, "failed to read line status");
                return;
            }
        };
        let events = status.events() & self.controls.event_mask();
        if self.delivery == EventDelivery::OnChange && events == self.previous {
            return;
        }
        self.previous = events;
        trace!(handle = %self.handle, %events, "delivering line event");
        let sink = &self.sink;
        guarded("event", || sink.deliver_event(events));
    }

    fn on_wait_error(&mut self, code: i32) {
        if self.throttle.record() {
            warn!(handle = %self.handle, code, "sustained wait errors on port");
            if self.active.contains(Role::Data) && self.serves.contains(Role::Data) {
                let sink = &self.sink;
                guarded("data_error", || sink.deliver_data_error(code));
            }
        }
        if let Some(backoff) = self.backoff {
            std::thread::sleep(backoff);
        }
    }
}

/// Roles the loop should service for a wake: reported, served by this thread,
/// and still registered.
fn ready_roles(reported: RoleSet, serves: RoleSet, active: RoleSet) -> RoleSet {
    reported.intersection(serves).intersection(active)
}
