//! Environment helpers for hardware tests.

use serial_com_listener::port::{NativePort, PortSettings};
use std::env;

/// Test port configuration from environment.
pub struct TestPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    /// TX wired to RX.
    pub loopback: bool,
}

impl TestPortConfig {
    pub fn from_env() -> Option<Self> {
        let port_name = env::var("TEST_PORT").ok()?;
        let baud_rate = env::var("TEST_BAUD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9600);
        let loopback = env::var("TEST_LOOPBACK").ok().as_deref() == Some("1");
        Some(Self {
            port_name,
            baud_rate,
            loopback,
        })
    }

    pub fn open(&self) -> NativePort {
        let settings = PortSettings::default().with_baud_rate(self.baud_rate);
        NativePort::open(&self.port_name, settings)
            .unwrap_or_else(|e| panic!("failed to open {}: {}", self.port_name, e))
    }
}

/// `None` (and a note on stdout) when no test port is configured.
pub fn test_port() -> Option<TestPortConfig> {
    let config = TestPortConfig::from_env();
    if config.is_none() {
        println!("Skipping hardware test: TEST_PORT not set");
    }
    config
}
