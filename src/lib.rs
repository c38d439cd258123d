//! Serial COM Listener Library
//!
//! Native core of a serial port listener: background threads that wait on an
//! open port and push received bytes and control line changes to a sink, plus
//! a presence monitor that reports when a port is unplugged or plugged back in.
//!
//! # Modules
//!
//! - `manager`: the control surface ([`ListenerManager`])
//! - `registry`: handle to listener thread bookkeeping
//! - `backend`: per-OS readiness waits (epoll, kqueue, TIOCMIWAIT, overlapped comm events)
//! - `looper`: the listener loop, read reassembly and error throttling
//! - `monitor`: port presence monitoring over kernel uevents or port enumeration
//! - `sink`: traits the caller implements to receive deliveries
//! - `port`: opening ports in the mode the backends expect
//! - `config`: configuration management with TOML support
//! - `logging`: `tracing` subscriber setup for binaries
//! - `mock`: in-memory driver, sinks and hot-plug source for tests

pub mod backend;
pub mod config;
pub mod error;
pub mod handle;
pub mod line;
pub mod logging;
pub mod looper;
pub mod manager;
pub mod mock;
pub mod monitor;
pub mod port;
pub mod registry;
pub mod role;
pub mod sink;

mod init;
mod worker;

pub use backend::{Driver, NativeDriver, ThreadLayout};
pub use error::{ListenerError, SinkError, ERR_INIT_FAILED};
pub use handle::PortHandle;
pub use line::{EventDelivery, LineEvents, LineStatus};
pub use manager::ListenerManager;
pub use monitor::{HotplugProvider, NativeHotplug, PortMonitor};
pub use port::{NativePort, PortError, PortSettings};
pub use registry::{HandleRegistry, RegistrationInfo};
pub use role::{Role, RoleSet};
pub use sink::{ListenerSink, PortEvent, PortEventSink, RuntimeAttach};

pub use config::{Config, ConfigError, ConfigLoader, ConfigResult};
