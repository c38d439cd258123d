//! The control surface: register and unregister listeners, tune delivery, and
//! start or stop presence monitors.

use crate::backend::{Driver, NativeDriver};
use crate::config::{Config, ListenerConfig, MonitorConfig};
use crate::error::ListenerError;
use crate::handle::PortHandle;
use crate::line::{LineEvents, LineStatus};
use crate::monitor::{HotplugProvider, NativeHotplug, PortMonitor};
use crate::registry::{HandleRegistry, RegistrationInfo};
use crate::role::{Role, RoleSet};
use crate::sink::{ListenerSink, PortEventSink};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

static GLOBAL: Lazy<ListenerManager> = Lazy::new(|| ListenerManager::from_config(&Config::default()));

/// Owns the handle registry and the running port monitors.
pub struct ListenerManager {
    registry: HandleRegistry,
    hotplug: Arc<dyn HotplugProvider>,
    listener: ListenerConfig,
    monitor: MonitorConfig,
    monitors: Mutex<HashMap<String, PortMonitor>>,
}

impl ListenerManager {
    /// Native backends and hot-plug sources with default settings.
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    pub fn from_config(config: &Config) -> Self {
        Self::with_parts(Arc::new(NativeDriver), Arc::new(NativeHotplug), config)
    }

    /// Custom driver, native hot-plug, default settings.
    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self::with_parts(driver, Arc::new(NativeHotplug), &Config::default())
    }

    pub fn with_parts(
        driver: Arc<dyn Driver>,
        hotplug: Arc<dyn HotplugProvider>,
        config: &Config,
    ) -> Self {
        Self {
            registry: HandleRegistry::new(
                driver,
                config.listener.clone(),
                config.events.clone(),
            ),
            hotplug,
            listener: config.listener.clone(),
            monitor: config.monitor.clone(),
            monitors: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide manager with native backends and default settings.
    pub fn global() -> &'static ListenerManager {
        &GLOBAL
    }

    pub fn register_data_listener(
        &self,
        handle: PortHandle,
        sink: Arc<dyn ListenerSink>,
    ) -> Result<(), ListenerError> {
        self.registry.register(handle, sink, Role::Data)
    }

    pub fn register_event_listener(
        &self,
        handle: PortHandle,
        sink: Arc<dyn ListenerSink>,
    ) -> Result<(), ListenerError> {
        self.registry.register(handle, sink, Role::Event)
    }

    pub fn unregister_data_listener(&self, handle: PortHandle) -> Result<(), ListenerError> {
        self.registry.unregister(handle, Role::Data)
    }

    pub fn unregister_event_listener(&self, handle: PortHandle) -> Result<(), ListenerError> {
        self.registry.unregister(handle, Role::Event)
    }

    /// Restrict which control lines are reported for `handle`.
    pub fn set_event_mask(&self, handle: PortHandle, mask: LineEvents) -> Result<(), ListenerError> {
        let controls = self.controls(handle, Role::Event)?;
        controls.set_event_mask(mask);
        info!(%handle, %mask, "event mask updated");
        Ok(())
    }

    pub fn event_mask(&self, handle: PortHandle) -> Result<LineEvents, ListenerError> {
        Ok(self.controls(handle, Role::Event)?.event_mask())
    }

    /// Keep reading `handle` but drop what arrives until resumed.
    pub fn pause_data_delivery(&self, handle: PortHandle) -> Result<(), ListenerError> {
        self.controls(handle, Role::Data)?.pause();
        info!(%handle, "data delivery paused");
        Ok(())
    }

    pub fn resume_data_delivery(&self, handle: PortHandle) -> Result<(), ListenerError> {
        self.controls(handle, Role::Data)?.resume();
        info!(%handle, "data delivery resumed");
        Ok(())
    }

    /// Current control line state, read directly from the port.
    pub fn line_status(&self, handle: PortHandle) -> Result<LineStatus, ListenerError> {
        Ok(self.registry.driver().line_status(handle)?)
    }

    /// Start watching `port_name` for removal and re-insertion.
    pub fn start_port_monitor(
        &self,
        port_name: &str,
        sink: Arc<dyn PortEventSink>,
    ) -> Result<(), ListenerError> {
        let mut monitors = self.monitors.lock();
        if let Some(existing) = monitors.get(port_name) {
            if existing.is_running() {
                return Err(ListenerError::MonitorRunning(port_name.to_string()));
            }
        }
        let monitor = PortMonitor::start(
            port_name,
            sink,
            Arc::clone(&self.hotplug),
            &self.monitor,
            &self.listener,
        )?;
        // A finished monitor left in the map is replaced here and dropped.
        monitors.insert(port_name.to_string(), monitor);
        Ok(())
    }

    pub fn stop_port_monitor(&self, port_name: &str) -> Result<(), ListenerError> {
        let monitor = self
            .monitors
            .lock()
            .remove(port_name)
            .ok_or_else(|| ListenerError::MonitorNotRunning(port_name.to_string()))?;
        monitor.stop();
        Ok(())
    }

    /// Ports with a presence monitor.
    pub fn monitored_ports(&self) -> Vec<String> {
        let mut ports: Vec<_> = self.monitors.lock().keys().cloned().collect();
        ports.sort();
        ports
    }

    /// Roles currently registered for `handle`.
    pub fn active_roles(&self, handle: PortHandle) -> RoleSet {
        self.registry
            .find(handle)
            .map_or(RoleSet::EMPTY, |info| info.roles)
    }

    pub fn find(&self, handle: PortHandle) -> Option<RegistrationInfo> {
        self.registry.find(handle)
    }

    pub fn handles(&self) -> Vec<PortHandle> {
        self.registry.handles()
    }

    /// Stop every listener and monitor.
    pub fn shutdown(&self) {
        let monitors: Vec<PortMonitor> = self.monitors.lock().drain().map(|(_, m)| m).collect();
        for monitor in monitors {
            monitor.stop();
        }
        self.registry.shutdown();
    }

    fn controls(
        &self,
        handle: PortHandle,
        role: Role,
    ) -> Result<Arc<crate::looper::LooperControls>, ListenerError> {
        self.registry
            .controls(handle)
            .ok_or(ListenerError::NotRegistered { handle, role })
    }
}

impl Default for ListenerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ListenerManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}
