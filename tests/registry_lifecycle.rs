//! Register/unregister lifecycle against the mock driver.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serial_com_listener::mock::{Delivery, MockDriver, MockRead};
use serial_com_listener::{ListenerError, ListenerManager, Role, RoleSet, ERR_INIT_FAILED};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_one_worker_per_role() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = manager_with(driver.clone());
    let h = handle(10);
    let sink = sink();

    manager.register_data_listener(h, sink.clone()).unwrap();
    manager.register_event_listener(h, sink.clone()).unwrap();
    assert_eq!(driver.live_backends(), 2);

    let info = manager.find(h).unwrap();
    assert_eq!(info.roles, RoleSet::ALL);
    assert_eq!(info.threads, 2);

    manager.unregister_data_listener(h).unwrap();
    assert_eq!(driver.live_backends(), 1);
    assert_eq!(manager.active_roles(h), RoleSet::EVENT);

    manager.unregister_event_listener(h).unwrap();
    assert_eq!(driver.live_backends(), 0);
    assert!(manager.find(h).is_none());
    assert_eq!(sink.attach_count(), 2);
    assert_eq!(sink.detach_count(), 2);
}

#[test]
fn test_duplicate_and_missing_registrations() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = manager_with(driver.clone());
    let h = handle(11);

    manager.register_data_listener(h, sink()).unwrap();
    assert!(matches!(
        manager.register_data_listener(h, sink()),
        Err(ListenerError::AlreadyRegistered { role: Role::Data, .. })
    ));
    assert!(matches!(
        manager.unregister_event_listener(h),
        Err(ListenerError::NotRegistered { role: Role::Event, .. })
    ));
    assert!(matches!(
        manager.unregister_data_listener(handle(99)),
        Err(ListenerError::NotRegistered { .. })
    ));
    assert_eq!(driver.open_count(), 1);
}

#[test]
fn test_setup_failure_reports_errno() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = manager_with(driver.clone());
    let h = handle(12);

    driver.fail_next_open(9);
    let err = manager.register_data_listener(h, sink()).unwrap_err();
    assert!(matches!(err, ListenerError::InitFailed { code: -9, .. }));
    assert_eq!(err.code(), -9);
    assert!(manager.find(h).is_none());

    // The failed attempt leaves nothing behind.
    manager.register_data_listener(h, sink()).unwrap();
    assert_eq!(manager.active_roles(h), RoleSet::DATA);
}

#[test]
fn test_attach_failure_reports_init_code() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = manager_with(driver.clone());
    let sink = sink();
    sink.refuse_attach();

    let err = manager.register_event_listener(handle(13), sink.clone()).unwrap_err();
    assert_eq!(err.code(), ERR_INIT_FAILED);
    assert_eq!(driver.open_count(), 0);
    assert_eq!(sink.detach_count(), 0);
}

#[test]
fn test_unsupported_role() {
    let driver = Arc::new(MockDriver::per_role().without_role(Role::Data));
    let manager = manager_with(driver);
    assert!(matches!(
        manager.register_data_listener(handle(14), sink()),
        Err(ListenerError::Unsupported(Role::Data))
    ));
}

#[test]
fn test_shared_layout_widens_and_narrows_one_thread() {
    let driver = Arc::new(MockDriver::shared());
    let manager = manager_with(driver.clone());
    let h = handle(20);
    let sink = sink();

    manager.register_data_listener(h, sink.clone()).unwrap();
    manager.register_event_listener(h, sink.clone()).unwrap();
    assert_eq!(driver.open_count(), 1);
    assert_eq!(manager.find(h).unwrap().threads, 1);

    manager.unregister_data_listener(h).unwrap();
    assert_eq!(driver.live_backends(), 1);

    manager.unregister_event_listener(h).unwrap();
    assert_eq!(driver.live_backends(), 0);
    assert_eq!(
        driver.mask_log(),
        vec![(h, RoleSet::DATA), (h, RoleSet::ALL), (h, RoleSet::EVENT)]
    );
}

#[test]
fn test_shared_layout_rejects_second_sink() {
    let driver = Arc::new(MockDriver::shared());
    let manager = manager_with(driver.clone());
    let h = handle(21);

    manager.register_data_listener(h, sink()).unwrap();
    assert!(matches!(
        manager.register_event_listener(h, sink()),
        Err(ListenerError::SinkMismatch(_))
    ));
    assert_eq!(manager.active_roles(h), RoleSet::DATA);
}

#[test]
fn test_unregister_is_prompt() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = manager_with(driver.clone());
    let h = handle(30);
    manager.register_data_listener(h, sink()).unwrap();
    manager.register_event_listener(h, sink()).unwrap();

    let start = Instant::now();
    manager.unregister_data_listener(h).unwrap();
    manager.unregister_event_listener(h).unwrap();
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(driver.live_backends(), 0);
}

#[test]
fn test_sink_can_unregister_its_own_listener() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = Arc::new(manager_with(driver.clone()));
    let h = handle(31);
    let sink = sink();
    {
        let manager = Arc::downgrade(&manager);
        sink.on_delivery(move |delivery| {
            if let (Delivery::Data(_), Some(manager)) = (delivery, manager.upgrade()) {
                manager.unregister_data_listener(h).unwrap();
            }
        });
    }

    manager.register_data_listener(h, sink.clone()).unwrap();
    driver.port(h).feed(vec![MockRead::Data(b"bye".to_vec())]);

    assert!(eventually(|| manager.find(h).is_none()));
    assert!(eventually(|| driver.live_backends() == 0));
    assert_eq!(sink.data(), b"bye");
}

#[test]
fn test_sink_can_query_while_its_listener_stops() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = Arc::new(manager_with(driver.clone()));
    let h = handle(32);
    let sink = sink();
    let in_callback = Arc::new(AtomicBool::new(false));
    {
        let manager = Arc::downgrade(&manager);
        let in_callback = Arc::clone(&in_callback);
        sink.on_delivery(move |_| {
            in_callback.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
            if let Some(manager) = manager.upgrade() {
                let _ = manager.find(h);
            }
        });
    }

    manager.register_data_listener(h, sink.clone()).unwrap();
    driver.port(h).feed(vec![MockRead::Data(b"busy".to_vec())]);
    assert!(eventually(|| in_callback.load(Ordering::SeqCst)));

    let start = Instant::now();
    manager.unregister_data_listener(h).unwrap();
    // Well inside the 500 ms join timeout: the thread was joined, not abandoned.
    assert!(start.elapsed() < Duration::from_millis(300));
    assert_eq!(driver.live_backends(), 0);
    assert!(manager.find(h).is_none());
}

#[test]
fn test_register_waits_for_a_stopping_listener() {
    let driver = Arc::new(MockDriver::per_role());
    let manager = Arc::new(manager_with(driver.clone()));
    let h = handle(33);
    let sink = sink();
    let stalled = Arc::new(AtomicBool::new(false));
    {
        let stalled = Arc::clone(&stalled);
        sink.on_delivery(move |_| {
            if !stalled.swap(true, Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(150));
            }
        });
    }

    manager.register_data_listener(h, sink.clone()).unwrap();
    driver.port(h).feed(vec![MockRead::Data(b"slow".to_vec())]);
    assert!(eventually(|| stalled.load(Ordering::SeqCst)));

    let stopper = {
        let manager = Arc::clone(&manager);
        std::thread::spawn(move || manager.unregister_data_listener(h))
    };
    assert!(eventually(|| manager
        .find(h)
        .is_some_and(|info| info.roles.is_empty())));

    manager.register_data_listener(h, sink.clone()).unwrap();
    assert_eq!(driver.live_backends(), 1);
    assert_eq!(manager.find(h).unwrap().threads, 1);
    stopper.join().unwrap().unwrap();
    assert_eq!(driver.open_count(), 2);
}

#[test]
fn test_drop_stops_everything() {
    let driver = Arc::new(MockDriver::per_role());
    {
        let manager: ListenerManager = manager_with(driver.clone());
        manager.register_data_listener(handle(40), sink()).unwrap();
        manager.register_event_listener(handle(41), sink()).unwrap();
        assert_eq!(driver.live_backends(), 2);
    }
    assert_eq!(driver.live_backends(), 0);
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Register(Role),
    Unregister(Role),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Register(Role::Data)),
        Just(Op::Register(Role::Event)),
        Just(Op::Unregister(Role::Data)),
        Just(Op::Unregister(Role::Event)),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_interleavings_keep_one_worker_per_active_role(
        ops in prop::collection::vec(op(), 1..12),
        shared in any::<bool>(),
    ) {
        let driver = Arc::new(if shared { MockDriver::shared() } else { MockDriver::per_role() });
        let manager = manager_with(driver.clone());
        let h = handle(50);
        let sink = sink();
        let mut model = RoleSet::EMPTY;

        for op in ops {
            match op {
                Op::Register(role) => {
                    let result = match role {
                        Role::Data => manager.register_data_listener(h, sink.clone()),
                        Role::Event => manager.register_event_listener(h, sink.clone()),
                    };
                    prop_assert_eq!(result.is_ok(), !model.contains(role));
                    model = model.with(role);
                }
                Op::Unregister(role) => {
                    let result = match role {
                        Role::Data => manager.unregister_data_listener(h),
                        Role::Event => manager.unregister_event_listener(h),
                    };
                    prop_assert_eq!(result.is_ok(), model.contains(role));
                    model = model.without(role);
                }
            }

            prop_assert_eq!(manager.active_roles(h), model);
            let expected_threads = match (shared, model.is_empty()) {
                (_, true) => 0,
                (true, false) => 1,
                (false, false) => model.len(),
            };
            prop_assert_eq!(driver.live_backends(), expected_threads);
        }

        manager.shutdown();
        prop_assert_eq!(driver.live_backends(), 0);
    }
}
