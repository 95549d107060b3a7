pub mod interface;
pub mod protocol;

pub use interface::{SerialBackend, SystemSerial, BAUD_RATE};
pub use protocol::{StopCommand, TCODE_IDENTIFIER, STOP_COMMAND};

use serde::{Deserialize, Serialize};

/// A serial port the host currently exposes, re-enumerated on every scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialDeviceInfo {
    pub port_name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl SerialDeviceInfo {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            vid: None,
            pid: None,
            serial_number: None,
            manufacturer: None,
            product: None,
        }
    }

    /// One-line description used by the interactive port listing
    pub fn describe(&self) -> String {
        format!(
            "{} / {} / {} / {}",
            self.port_name,
            self.manufacturer.as_deref().unwrap_or("-"),
            self.serial_number.as_deref().unwrap_or("-"),
            self.product.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerialError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialport error: {0}")]
    SerialportError(#[from] serialport::Error),
}

pub type Result<T> = std::result::Result<T, SerialError>;
