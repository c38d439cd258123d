//! Map from open port handles to the listener threads serving them.
//!
//! All bookkeeping happens under one mutex. Registering blocks until the new
//! thread has reported through its init handshake; unregistering the last role
//! a thread serves stops and joins it before returning. Joins run with the
//! mutex released, so a sink may call back into the registry while its thread
//! is being stopped. Until that join finishes the roles it served stay
//! reserved and a new registration for them waits.

mod spawn;

use crate::backend::{Driver, ThreadLayout, Waker};
use crate::config::{EventsConfig, ListenerConfig};
use crate::error::ListenerError;
use crate::handle::PortHandle;
use crate::line::LineEvents;
use crate::looper::LooperControls;
use crate::role::{AtomicRoleSet, Role, RoleSet};
use crate::sink::ListenerSink;
use crate::worker::Worker;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Snapshot of one handle's registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationInfo {
    pub handle: PortHandle,
    #[serde(serialize_with = "serialize_roles")]
    pub roles: RoleSet,
    /// Listener threads currently alive for the handle.
    pub threads: usize,
    pub paused: bool,
    pub event_mask: LineEvents,
}

fn serialize_roles<S: serde::Serializer>(roles: &RoleSet, s: S) -> Result<S::Ok, S::Error> {
    s.collect_seq(roles.iter())
}

struct Slot {
    serves: RoleSet,
    sink: Arc<dyn ListenerSink>,
    worker: Worker,
}

#[derive(Default)]
struct Registration {
    active: Arc<AtomicRoleSet>,
    controls: Arc<LooperControls>,
    slots: Vec<Slot>,
    /// Roles of threads told to exit whose join has not finished.
    stopping: Vec<RoleSet>,
}

impl Registration {
    fn is_idle(&self) -> bool {
        self.active.load().is_empty() && self.slots.is_empty() && self.stopping.is_empty()
    }

    fn is_stopping(&self, role: Role) -> bool {
        self.stopping.iter().any(|roles| roles.contains(role))
    }

    /// Move the slot out of the table and reserve its roles until joined.
    fn retire(&mut self, index: usize) -> Slot {
        let slot = self.slots.remove(index);
        self.stopping.push(slot.serves);
        slot
    }
}

/// Process-wide table of listener registrations.
pub struct HandleRegistry {
    driver: Arc<dyn Driver>,
    listener: ListenerConfig,
    events: EventsConfig,
    entries: Mutex<HashMap<PortHandle, Registration>>,
    stopped: Condvar,
}

impl HandleRegistry {
    pub fn new(driver: Arc<dyn Driver>, listener: ListenerConfig, events: EventsConfig) -> Self {
        Self {
            driver,
            listener,
            events,
            entries: Mutex::new(HashMap::new()),
            stopped: Condvar::new(),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn find(&self, handle: PortHandle) -> Option<RegistrationInfo> {
        let entries = self.entries.lock();
        entries.get(&handle).map(|entry| RegistrationInfo {
            handle,
            roles: entry.active.load(),
            threads: entry.slots.iter().filter(|s| s.worker.is_running()).count()
                + entry.stopping.len(),
            paused: entry.controls.is_paused(),
            event_mask: entry.controls.event_mask(),
        })
    }

    /// Handles with at least one registered role.
    pub fn handles(&self) -> Vec<PortHandle> {
        let mut handles: Vec<_> = self.entries.lock().keys().copied().collect();
        handles.sort();
        handles
    }

    /// Start serving `role` for `handle`, delivering to `sink`.
    pub fn register(
        &self,
        handle: PortHandle,
        sink: Arc<dyn ListenerSink>,
        role: Role,
    ) -> Result<(), ListenerError> {
        if !self.driver.supports(role) {
            return Err(ListenerError::Unsupported(role));
        }

        let mut entries = self.entries.lock();
        while entries.get(&handle).is_some_and(|e| e.is_stopping(role)) {
            self.stopped.wait(&mut entries);
        }
        let entry = entries.entry(handle).or_default();
        if entry.active.contains(role) {
            return Err(ListenerError::AlreadyRegistered { handle, role });
        }

        let result = match self.driver.layout() {
            ThreadLayout::PerRole => self.spawn_slot(handle, entry, sink, role, RoleSet::of(role)),
            ThreadLayout::Shared => {
                let existing = entry
                    .slots
                    .first()
                    .map(|slot| (Arc::clone(&slot.sink), Arc::clone(slot.worker.waker())));
                match existing {
                    Some((current, waker)) => {
                        self.widen(handle, &entry.active, &current, &sink, &*waker, role)
                    }
                    None => self.spawn_slot(handle, entry, sink, role, RoleSet::ALL),
                }
            }
        };

        if entry.is_idle() {
            entries.remove(&handle);
        }
        result
    }

    /// Stop serving `role` for `handle`.
    pub fn unregister(&self, handle: PortHandle, role: Role) -> Result<(), ListenerError> {
        let mut entries = self.entries.lock();
        let entry = match entries.get_mut(&handle) {
            Some(entry) if entry.active.contains(role) => entry,
            _ => return Err(ListenerError::NotRegistered { handle, role }),
        };

        let remaining = entry.active.remove(role);
        let mut retired = None;
        if let Some(index) = entry.slots.iter().position(|s| s.serves.contains(role)) {
            if entry.slots[index].serves.intersects(remaining) {
                let slot = &entry.slots[index];
                if let Err(e) = slot.worker.waker().set_roles(remaining) {
                    warn!(%handle, %role, error = %e, "failed to narrow wait mask");
                }
                info!(%handle, %role, remaining = %remaining, "listener role removed");
            } else {
                retired = Some(entry.retire(index));
            }
        }

        if entry.is_idle() {
            entries.remove(&handle);
        }
        drop(entries);

        if let Some(slot) = retired {
            self.stop_retired(handle, slot);
        }
        Ok(())
    }

    /// Controls shared with the loops serving `handle`.
    pub(crate) fn controls(&self, handle: PortHandle) -> Option<Arc<LooperControls>> {
        self.entries
            .lock()
            .get(&handle)
            .map(|entry| Arc::clone(&entry.controls))
    }

    /// Stop every listener thread.
    pub fn shutdown(&self) {
        let mut retired = Vec::new();
        {
            let mut entries = self.entries.lock();
            for (handle, entry) in entries.iter_mut() {
                for role in entry.active.load().iter() {
                    entry.active.remove(role);
                }
                while !entry.slots.is_empty() {
                    retired.push((*handle, entry.retire(0)));
                }
            }
        }
        let count = retired.len();
        for (handle, slot) in retired {
            self.stop_retired(handle, slot);
        }
        if count > 0 {
            info!(threads = count, "listeners shut down");
        }
    }

    /// Join a retired thread with the mutex released, then release its roles.
    fn stop_retired(&self, handle: PortHandle, mut slot: Slot) {
        slot.worker
            .stop(self.listener.join_timeout(), self.listener.wake_retry());
        info!(%handle, roles = %slot.serves, worker = slot.worker.name(), "listener stopped");

        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&handle) {
            if let Some(pos) = entry.stopping.iter().position(|r| *r == slot.serves) {
                entry.stopping.remove(pos);
            }
            if entry.is_idle() {
                entries.remove(&handle);
            }
        }
        drop(entries);
        self.stopped.notify_all();
    }

    fn widen(
        &self,
        handle: PortHandle,
        active: &AtomicRoleSet,
        current: &Arc<dyn ListenerSink>,
        sink: &Arc<dyn ListenerSink>,
        waker: &dyn Waker,
        role: Role,
    ) -> Result<(), ListenerError> {
        if !same_sink(current, sink) {
            return Err(ListenerError::SinkMismatch(handle));
        }
        let roles = active.add(role);
        if let Err(e) = waker.set_roles(roles) {
            active.remove(role);
            return Err(ListenerError::Setup(e));
        }
        info!(%handle, %role, roles = %roles, "listener role added to shared thread");
        Ok(())
    }

    fn spawn_slot(
        &self,
        handle: PortHandle,
        entry: &mut Registration,
        sink: Arc<dyn ListenerSink>,
        role: Role,
        serves: RoleSet,
    ) -> Result<(), ListenerError> {
        entry.active.add(role);
        let params = spawn::SpawnParams {
            handle,
            driver: Arc::clone(&self.driver),
            sink: Arc::clone(&sink),
            serves,
            active: Arc::clone(&entry.active),
            controls: Arc::clone(&entry.controls),
            listener: self.listener.clone(),
            events: self.events.clone(),
        };
        match spawn::start(params) {
            Ok(worker) => {
                info!(%handle, %role, worker = worker.name(), "listener started");
                entry.slots.push(Slot {
                    serves,
                    sink,
                    worker,
                });
                Ok(())
            }
            Err(e) => {
                entry.active.remove(role);
                warn!(%handle, %role, error = %e, "listener failed to start");
                Err(e)
            }
        }
    }
}

impl Drop for HandleRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn same_sink(a: &Arc<dyn ListenerSink>, b: &Arc<dyn ListenerSink>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
