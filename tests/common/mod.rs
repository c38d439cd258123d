//! Shared test utilities for the listener integration tests.
//!
//! - Managers wired to a [`MockDriver`] or [`MockHotplug`]
//! - Config tuned for fast joins
//! - Wait helpers with a bounded deadline

#![allow(dead_code)]

use serial_com_listener::config::Config;
use serial_com_listener::line::LineStatus;
use serial_com_listener::mock::{MockDriver, MockHotplug, MockProbe, RecordingSink};
use serial_com_listener::monitor::{DeviceInfo, ProbeVerdict};
use serial_com_listener::{ListenerManager, PortHandle};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound for anything a test waits on.
pub const DEADLINE: Duration = Duration::from_secs(2);

/// Defaults with a short join timeout so a stuck worker fails fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.listener.join_timeout_ms = 500;
    config.listener.wake_retry_ms = 5;
    config
}

/// A manager over `driver` with a hot-plug provider that never fires.
pub fn manager_with(driver: Arc<MockDriver>) -> ListenerManager {
    let hotplug = Arc::new(MockHotplug::new(
        true,
        Arc::new(MockProbe::new(ProbeVerdict::Present)),
    ));
    ListenerManager::with_parts(driver, hotplug, &test_config())
}

pub fn manager_with_hotplug(hotplug: Arc<MockHotplug>) -> ListenerManager {
    ListenerManager::with_parts(Arc::new(MockDriver::per_role()), hotplug, &test_config())
}

pub fn handle(raw: i64) -> PortHandle {
    PortHandle::from_raw(raw)
}

pub fn sink() -> Arc<RecordingSink> {
    Arc::new(RecordingSink::new())
}

pub fn cts(on: bool) -> LineStatus {
    LineStatus {
        cts: on,
        ..LineStatus::default()
    }
}

pub fn usb_device(id: &str) -> DeviceInfo {
    DeviceInfo {
        id: id.to_string(),
        port_name: None,
        subsystem: "usb".to_string(),
    }
}

/// Poll `check` until it holds or [`DEADLINE`] passes.
pub fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    let deadline = Instant::now() + DEADLINE;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    check()
}

/// Give listener threads a moment to drain queued steps.
pub fn settle(port: &serial_com_listener::mock::MockPort) {
    assert!(eventually(|| port.pending_steps() == 0), "steps not consumed");
    std::thread::sleep(Duration::from_millis(20));
}
