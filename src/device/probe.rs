use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::time::timeout;

use crate::serial::protocol::parse_identification;
use crate::serial::{SerialBackend, SerialDeviceInfo};

/// Result of listening to one candidate for an identification line
#[derive(Debug)]
pub enum ProbeOutcome<T> {
    /// The candidate identified itself; the open transport goes to the caller
    Matched {
        candidate: SerialDeviceInfo,
        version: String,
        transport: BufReader<T>,
    },
    NoMatch {
        candidate: SerialDeviceInfo,
    },
}

impl<T> ProbeOutcome<T> {
    pub fn is_match(&self) -> bool {
        matches!(self, ProbeOutcome::Matched { .. })
    }

    pub fn capability_version(&self) -> Option<&str> {
        match self {
            ProbeOutcome::Matched { version, .. } => Some(version.as_str()),
            ProbeOutcome::NoMatch { .. } => None,
        }
    }
}

/// Open `candidate` through `backend` and probe it.
/// A port that fails to open is simply not a match.
pub async fn probe_candidate<B: SerialBackend>(
    backend: &B,
    candidate: SerialDeviceInfo,
    wait: Duration,
) -> ProbeOutcome<B::Transport> {
    match backend.open(&candidate).await {
        Ok(transport) => probe(candidate, transport, wait).await,
        Err(e) => {
            log::info!("Error opening port {}: {}", candidate.port_name, e);
            ProbeOutcome::NoMatch { candidate }
        }
    }
}

/// Listen on an open transport for up to `wait` for an identification line.
///
/// Non-matching transports are closed before returning.
pub async fn probe<T>(candidate: SerialDeviceInfo, transport: T, wait: Duration) -> ProbeOutcome<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(transport);

    match timeout(wait, read_identification(&candidate.port_name, &mut reader)).await {
        Ok(Some(version)) => {
            log::info!("Port {} identified as TCode v{}", candidate.port_name, version);
            return ProbeOutcome::Matched {
                candidate,
                version,
                transport: reader,
            };
        }
        Ok(None) => log::debug!("Port {} went away before identifying", candidate.port_name),
        Err(_) => log::debug!("Port {} did not identify within {:?}", candidate.port_name, wait),
    }

    close_transport(&candidate.port_name, reader).await;
    ProbeOutcome::NoMatch { candidate }
}

async fn read_identification<R>(port_name: &str, reader: &mut R) -> Option<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return None,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                log::info!("Port {} said: {}", port_name, line.trim_end());
                if let Some(version) = parse_identification(&line) {
                    return Some(version);
                }
            }
            Err(e) => {
                log::info!("Error reading port {}: {}", port_name, e);
                return None;
            }
        }
    }
}

/// Best-effort close; failures are logged and the transport is dropped either way
pub async fn close_transport<T>(port_name: &str, mut transport: T)
where
    T: AsyncWrite + Unpin,
{
    match transport.shutdown().await {
        Ok(()) => log::info!("Port {} is closed.", port_name),
        Err(e) => log::info!("Error closing port {}: {}", port_name, e),
    }
}
