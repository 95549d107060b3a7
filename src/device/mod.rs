pub mod manager;
pub mod models;
pub mod probe;

pub use manager::DeviceManager;
pub use models::*;
pub use probe::{probe, probe_candidate, ProbeOutcome};

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found")]
    NotFound,

    #[error("Device already connected")]
    AlreadyConnected,

    #[error("Serial communication error: {0}")]
    SerialError(#[from] crate::serial::SerialError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
