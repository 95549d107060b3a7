use std::time::Duration;

use async_trait::async_trait;
use serialport::SerialPortType;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::{Result, SerialDeviceInfo, SerialError};

/// TCode firmware talks at a fixed rate
pub const BAUD_RATE: u32 = 115200;

/// Source of serial candidates and the streams behind them.
///
/// Discovery only ever talks to ports through this trait, so tests can swap
/// the operating system's ports for in-memory pipes.
#[async_trait]
pub trait SerialBackend: Send + Sync + 'static {
    type Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Enumerate every port the host currently exposes
    fn list_candidates(&self) -> Result<Vec<SerialDeviceInfo>>;

    /// Open a candidate for reading and writing
    async fn open(&self, candidate: &SerialDeviceInfo) -> Result<Self::Transport>;
}

/// Serial ports of the running host, opened through tokio-serial
#[derive(Debug, Clone)]
pub struct SystemSerial {
    baud_rate: u32,
}

impl SystemSerial {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }
}

impl Default for SystemSerial {
    fn default() -> Self {
        Self::new(BAUD_RATE)
    }
}

#[async_trait]
impl SerialBackend for SystemSerial {
    type Transport = SerialStream;

    fn list_candidates(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut candidates = Vec::with_capacity(ports.len());

        for port in ports {
            let mut info = SerialDeviceInfo::new(port.port_name);
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                info.vid = Some(usb_info.vid);
                info.pid = Some(usb_info.pid);
                info.serial_number = usb_info.serial_number;
                info.manufacturer = usb_info.manufacturer;
                info.product = usb_info.product;
            }
            candidates.push(info);
        }

        Ok(candidates)
    }

    async fn open(&self, candidate: &SerialDeviceInfo) -> Result<SerialStream> {
        let stream = tokio_serial::new(&candidate.port_name, self.baud_rate)
            .timeout(Duration::from_millis(1000))
            .open_native_async()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", candidate.port_name, e)))?;

        log::info!("Port {} is open.", candidate.port_name);
        Ok(stream)
    }
}
