//! Errors raised while opening a port for listening.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortError {
    /// No device answers to the name.
    #[error("serial port not found: {0}")]
    NotFound(String),

    /// Someone else holds the port, or we lack permission.
    #[error("serial port busy or not accessible: {0}")]
    Busy(String),

    /// The requested line settings are invalid or were refused by the driver.
    #[error("invalid port settings: {0}")]
    Settings(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl PortError {
    pub fn settings(message: impl Into<String>) -> Self {
        Self::Settings(message.into())
    }

    /// Map a `serialport` open failure for `port_name`.
    pub(crate) fn from_open(port_name: &str, err: serialport::Error) -> Self {
        match err.kind() {
            serialport::ErrorKind::NoDevice => Self::NotFound(port_name.to_string()),
            serialport::ErrorKind::InvalidInput => Self::Settings(err.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                Self::NotFound(port_name.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied) => {
                Self::Busy(port_name.to_string())
            }
            _ => Self::Serial(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_error_mapping() {
        let err = PortError::from_open(
            "/dev/ttyACM3",
            serialport::Error::new(serialport::ErrorKind::NoDevice, "gone"),
        );
        assert_eq!(err.to_string(), "serial port not found: /dev/ttyACM3");

        let err = PortError::from_open(
            "COM4",
            serialport::Error::new(
                serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied),
                "denied",
            ),
        );
        assert!(matches!(err, PortError::Busy(_)));

        let err = PortError::from_open(
            "COM4",
            serialport::Error::new(serialport::ErrorKind::InvalidInput, "bad baud"),
        );
        assert!(matches!(err, PortError::Settings(_)));
    }
}
