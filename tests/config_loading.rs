//! Configuration file resolution and environment overrides.
//!
//! These tests mutate process environment variables and run serially.

use pretty_assertions::assert_eq;
use serial_com_listener::config::{ConfigError, ConfigLoader, DeliveryPolicy, LogFormat};
use serial_com_listener::Config;
use serial_test::serial;
use std::env;
use std::io::Write;

const VARS: &[&str] = &[
    "SERIAL_LISTENER_CONFIG",
    "SERIAL_LISTENER_LISTENER_ERROR_THRESHOLD",
    "SERIAL_LISTENER_EVENTS_DELIVERY",
    "SERIAL_LISTENER_LOGGING_FORMAT",
    "SERIAL_LISTENER_MONITOR_SUBSYSTEM",
];

fn clear_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_config_path_from_env() {
    clear_env();
    let file = config_file(
        r#"
[listener]
read_chunk_size = 512
partial_buffer_capacity = 2048

[events]
delivery = "always"
"#,
    );
    env::set_var("SERIAL_LISTENER_CONFIG", file.path());

    let loader = ConfigLoader::load().unwrap();
    assert_eq!(loader.config_path.as_deref(), Some(file.path()));
    assert_eq!(loader.config.listener.read_chunk_size, 512);
    assert_eq!(loader.config.listener.partial_buffer_capacity, 2048);
    assert_eq!(loader.config.events.delivery, DeliveryPolicy::Always);
    // Untouched sections keep their defaults.
    assert_eq!(loader.config.monitor, Config::default().monitor);
    clear_env();
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    let file = config_file("[listener]\nerror_threshold = 10\n");
    env::set_var("SERIAL_LISTENER_LISTENER_ERROR_THRESHOLD", "25");
    env::set_var("SERIAL_LISTENER_EVENTS_DELIVERY", "on_change");
    env::set_var("SERIAL_LISTENER_LOGGING_FORMAT", "json");
    env::set_var("SERIAL_LISTENER_MONITOR_SUBSYSTEM", "tty");

    let config = ConfigLoader::load_from(file.path()).unwrap().into_config();
    assert_eq!(config.listener.error_threshold, 25);
    assert_eq!(config.events.delivery, DeliveryPolicy::OnChange);
    assert_eq!(config.logging.format, LogFormat::Json);
    assert_eq!(config.monitor.subsystem, "tty");
    clear_env();
}

#[test]
#[serial]
fn test_bad_override_is_an_error() {
    clear_env();
    let file = config_file("");
    env::set_var("SERIAL_LISTENER_LISTENER_ERROR_THRESHOLD", "lots");

    let err = ConfigLoader::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Env { .. }), "unexpected error: {err}");

    // The lenient loader falls back to defaults instead.
    let loader = ConfigLoader::with_defaults();
    assert_eq!(loader.config.listener.error_threshold, 100);
    clear_env();
}

#[test]
#[serial]
fn test_invalid_values_are_rejected() {
    clear_env();
    let file = config_file("[listener]\nread_chunk_size = 4096\npartial_buffer_capacity = 1024\n");
    let err = ConfigLoader::load_from(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { .. }), "unexpected error: {err}");
}

#[test]
#[serial]
fn test_save_and_reload() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("serial-listener.toml");

    let mut loader = ConfigLoader::with_defaults();
    loader.config.listener.join_timeout_ms = 750;
    loader.save_to(&path).unwrap();

    let mut reloaded = ConfigLoader::load_from(&path).unwrap();
    assert_eq!(reloaded.config.listener.join_timeout_ms, 750);

    std::fs::write(&path, "[listener]\njoin_timeout_ms = 900\n").unwrap();
    reloaded.reload().unwrap();
    assert_eq!(reloaded.config.listener.join_timeout_ms, 900);
}
