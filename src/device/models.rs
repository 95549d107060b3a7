use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, watch, Mutex};
use uuid::Uuid;

use crate::serial::Result;

type DeviceWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// The serial device currently adopted by discovery.
///
/// Only the write side of the transport lives here; the read side belongs to
/// the reader task that watches for disconnection.
pub struct ActiveDevice {
    port_name: String,
    version: String,
    supports_native_stop: bool,
    bound_at: DateTime<Utc>,
    writer: Mutex<DeviceWriter>,
}

impl ActiveDevice {
    pub fn new<W>(port_name: String, version: String, supports_native_stop: bool, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            port_name,
            version,
            supports_native_stop,
            bound_at: Utc::now(),
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn supports_native_stop(&self) -> bool {
        self.supports_native_stop
    }

    pub fn bound_at(&self) -> DateTime<Utc> {
        self.bound_at
    }

    /// Write one TCode line to the device
    pub async fn send_tcode(&self, code: &str) -> Result<()> {
        log::info!("sending TCode: {}", code);
        let line = format!("{}\n", code);
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

impl fmt::Debug for ActiveDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveDevice")
            .field("port_name", &self.port_name)
            .field("version", &self.version)
            .field("supports_native_stop", &self.supports_native_stop)
            .field("bound_at", &self.bound_at)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the binding state: the adopted device, if any
pub type Binding = Option<Arc<ActiveDevice>>;

/// Read-only view of the binding published by the discovery loop
#[derive(Debug, Clone)]
pub struct BindingHandle {
    rx: watch::Receiver<Binding>,
}

impl BindingHandle {
    pub(crate) fn new(rx: watch::Receiver<Binding>) -> Self {
        Self { rx }
    }

    /// A handle that never sees a device
    pub fn unbound() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    pub fn current(&self) -> Binding {
        self.rx.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// Wait until the binding satisfies `predicate`.
    /// Returns `None` if the discovery loop has gone away first.
    pub async fn wait_for<F>(&mut self, mut predicate: F) -> Option<Binding>
    where
        F: FnMut(&Binding) -> bool,
    {
        self.rx
            .wait_for(|binding| predicate(binding))
            .await
            .ok()
            .map(|binding| (*binding).clone())
    }
}

/// Status changes surfaced to whatever presents the bridge to a user
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    DeviceBound {
        port: String,
        version: String,
        supports_native_stop: bool,
    },
    DeviceUnbound {
        port: String,
    },
    ClientConnected {
        id: Uuid,
        peer: String,
    },
    ClientDisconnected {
        id: Uuid,
    },
    /// The position indicator should show `percent` without moving the device
    PositionReset {
        percent: f64,
    },
    /// Whether manual position control should accept input
    ManualControl {
        enabled: bool,
    },
}

pub type EventSender = broadcast::Sender<BridgeEvent>;

pub fn event_channel(capacity: usize) -> (EventSender, broadcast::Receiver<BridgeEvent>) {
    broadcast::channel(capacity)
}

/// Publish without caring whether anyone listens
pub fn publish(events: &EventSender, event: BridgeEvent) {
    if events.send(event).is_err() {
        log::trace!("No bridge event subscribers");
    }
}
