//! Configuration for the listener subsystem.
//!
//! TOML-based configuration with environment variable overrides.
//!
//! # Configuration Resolution
//!
//! 1. `SERIAL_LISTENER_CONFIG` environment variable (explicit path)
//! 2. `./serial-listener.toml` (current directory)
//! 3. `serial-listener.toml` in the platform config directory
//! 4. Built-in defaults (no file required)
//!
//! # Environment Overrides
//!
//! The pattern is `SERIAL_LISTENER_<SECTION>_<KEY>`, for example
//! `SERIAL_LISTENER_LISTENER_ERROR_THRESHOLD=50` or
//! `SERIAL_LISTENER_EVENTS_DELIVERY=on_change`.
//!
//! # Example
//!
//! ```rust,no_run
//! use serial_com_listener::config::ConfigLoader;
//!
//! let loader = ConfigLoader::load()?;
//! println!("chunk size: {}", loader.config().listener.read_chunk_size);
//! # Ok::<(), serial_com_listener::config::ConfigError>(())
//! ```

mod error;
mod loader;
mod schema;

pub use error::{ConfigError, ConfigResult};
pub use loader::{
    get_default_config_dir, get_default_config_path, resolve_config_path, ConfigLoader,
};
pub use schema::{
    Config, DeliveryPolicy, EventsConfig, ListenerConfig, LogFormat, LoggingConfig,
    MonitorConfig,
};
