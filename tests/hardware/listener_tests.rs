//! Listener threads on a real port.
//!
//! ```bash
//! export TEST_PORT=/dev/ttyUSB0   # or COM3
//! export TEST_BAUD=115200         # optional, default: 9600
//! export TEST_LOOPBACK=1          # if TX and RX are wired together
//! cargo test --features hardware-tests -- --ignored
//! ```

use super::utils::test_port;
use serial_com_listener::mock::{Delivery, RecordingSink};
use serial_com_listener::ListenerManager;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
#[ignore]
fn test_register_and_unregister_on_real_port() {
    let Some(config) = test_port() else { return };
    let port = config.open();
    let manager = ListenerManager::new();
    let sink = Arc::new(RecordingSink::new());

    manager.register_data_listener(port.handle(), sink.clone()).unwrap();
    manager.register_event_listener(port.handle(), sink.clone()).unwrap();

    let status = manager.line_status(port.handle()).unwrap();
    println!("{}: {:?}", config.port_name, status);

    let start = Instant::now();
    manager.unregister_event_listener(port.handle()).unwrap();
    manager.unregister_data_listener(port.handle()).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(sink.attach_count(), sink.detach_count());
}

#[cfg(unix)]
#[test]
#[ignore]
fn test_loopback_data_is_delivered() {
    let Some(config) = test_port() else { return };
    if !config.loopback {
        println!("Skipping: TEST_LOOPBACK not set");
        return;
    }
    let port = config.open();
    let manager = ListenerManager::new();
    let sink = Arc::new(RecordingSink::new());
    manager.register_data_listener(port.handle(), sink.clone()).unwrap();

    let payload = b"serial-listen loopback\r\n";
    let written = unsafe {
        libc::write(
            port.handle().fd(),
            payload.as_ptr() as *const libc::c_void,
            payload.len(),
        )
    };
    assert_eq!(written, payload.len() as isize);

    assert!(sink.wait_for(Duration::from_secs(2), |deliveries| {
        received(deliveries) >= payload.len()
    }));
    assert_eq!(sink.data(), payload);
    manager.unregister_data_listener(port.handle()).unwrap();
}

#[cfg(unix)]
fn received(deliveries: &[Delivery]) -> usize {
    deliveries
        .iter()
        .map(|d| match d {
            Delivery::Data(bytes) => bytes.len(),
            _ => 0,
        })
        .sum()
}
