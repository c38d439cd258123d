//! Opening serial ports for listening.
//!
//! The listener subsystem only borrows a [`PortHandle`](crate::PortHandle);
//! [`NativePort`] is one way to get one.

pub mod error;
pub mod native;
pub mod settings;

pub use error::PortError;
pub use native::NativePort;
pub use settings::{DataBits, FlowControl, Parity, PortSettings, StopBits};

/// Ports the OS currently knows about.
pub fn available_ports() -> Result<Vec<serialport::SerialPortInfo>, PortError> {
    Ok(serialport::available_ports()?)
}
