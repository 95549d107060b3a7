use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use crate::serial::protocol::supports_native_stop;
use crate::serial::{SerialBackend, SerialDeviceInfo};
use super::probe::{close_transport, probe_candidate, ProbeOutcome};
use super::{
    publish, ActiveDevice, Binding, BindingHandle, BridgeEvent, DeviceError, EventSender, Result,
};

/// Version recorded for a port adopted without probing
pub const UNKNOWN_VERSION: &str = "unknown";

/// Discovery state machine.
///
/// Unbound: scan every `scan_interval`, probing all candidates concurrently,
/// each on its own task.
/// Bound: hold exactly one device until its transport closes.
///
/// The manager owns the only sender of the binding cell; everything else
/// observes it through [`BindingHandle`].
pub struct DeviceManager<B: SerialBackend> {
    backend: Arc<B>,
    scan_interval: Duration,
    probe_timeout: Duration,
    binding_tx: watch::Sender<Binding>,
    close_rx: Option<oneshot::Receiver<()>>,
    events: EventSender,
}

impl<B: SerialBackend> DeviceManager<B> {
    pub fn new(backend: B, scan_interval: Duration, probe_timeout: Duration, events: EventSender) -> Self {
        let (binding_tx, _) = watch::channel(None);
        Self {
            backend: Arc::new(backend),
            scan_interval,
            probe_timeout,
            binding_tx,
            close_rx: None,
            events,
        }
    }

    pub fn binding(&self) -> BindingHandle {
        BindingHandle::new(self.binding_tx.subscribe())
    }

    pub fn active_device(&self) -> Binding {
        self.binding_tx.borrow().clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding_tx.borrow().is_some()
    }

    /// Scan forever: tick, hold the device while bound, wait an interval, repeat
    pub async fn run(mut self) {
        log::info!("Starting serial discovery (interval {:?})", self.scan_interval);
        loop {
            self.tick().await;
            if self.is_bound() {
                self.wait_for_close().await;
            }
            tokio::time::sleep(self.scan_interval).await;
        }
    }

    /// One discovery cycle. Does nothing while a live device is bound.
    pub async fn tick(&mut self) {
        self.discard_if_closed();
        if self.is_bound() {
            return;
        }

        let candidates = match self.backend.list_candidates() {
            Ok(candidates) => candidates,
            Err(e) => {
                log::warn!("Failed to enumerate serial ports: {}", e);
                return;
            }
        };
        log::debug!("Probing {} serial candidates", candidates.len());

        // One task per port so a slow open cannot hold up the others
        let mut probes = JoinSet::new();
        for candidate in candidates {
            let backend = Arc::clone(&self.backend);
            let wait = self.probe_timeout;
            probes.spawn(async move { probe_candidate(backend.as_ref(), candidate, wait).await });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(outcome) => {
                    self.handle_outcome(outcome).await;
                }
                Err(e) => log::warn!("Probe task failed: {}", e),
            }
        }
    }

    /// Apply one probe outcome. The first match seen while unbound wins;
    /// any later match is closed. Returns whether the outcome was adopted.
    pub async fn handle_outcome(&mut self, outcome: ProbeOutcome<B::Transport>) -> bool {
        let (candidate, version, transport) = match outcome {
            ProbeOutcome::Matched { candidate, version, transport } => (candidate, version, transport),
            ProbeOutcome::NoMatch { .. } => return false,
        };

        if let Some(active) = self.active_device() {
            log::info!("We already have TCode port at: {}", active.port_name());
            close_transport(&candidate.port_name, transport).await;
            return false;
        }

        self.bind(candidate, version, transport);
        true
    }

    /// Bind a user-chosen port without listening for identification
    pub async fn adopt_fixed(&mut self, candidate: SerialDeviceInfo) -> Result<()> {
        self.discard_if_closed();
        if self.is_bound() {
            return Err(DeviceError::AlreadyConnected);
        }

        let transport = self.backend.open(&candidate).await?;
        self.bind(candidate, UNKNOWN_VERSION.to_string(), transport);
        Ok(())
    }

    /// Wait for the bound transport to close, then return to unbound.
    /// Returns immediately when nothing is bound.
    pub async fn wait_for_close(&mut self) {
        if let Some(close_rx) = self.close_rx.take() {
            // A dropped sender means the reader task ended, which is a close as well
            let _ = close_rx.await;
            self.transition(None);
        }
    }

    fn discard_if_closed(&mut self) {
        let closed = match self.close_rx.as_mut() {
            Some(close_rx) => !matches!(close_rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)),
            None => false,
        };
        if closed {
            self.close_rx = None;
            self.transition(None);
        }
    }

    fn bind<T>(&mut self, candidate: SerialDeviceInfo, version: String, transport: T)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        log::info!("TCode version: {}", version);
        let native_stop = supports_native_stop(&version);
        if native_stop {
            log::info!("TCode device supports STOP command");
        }

        let (read_half, write_half) = tokio::io::split(transport);
        let (close_tx, close_rx) = oneshot::channel();
        spawn_device_reader(candidate.port_name.clone(), read_half, close_tx);

        let device = ActiveDevice::new(candidate.port_name, version, native_stop, write_half);
        self.close_rx = Some(close_rx);
        self.transition(Some(Arc::new(device)));
    }

    /// The single place the binding changes
    fn transition(&mut self, next: Binding) {
        let previous = self.binding_tx.send_replace(next.clone());

        match (previous, next) {
            (None, Some(device)) => {
                log::info!("Setting TCode port to: {}", device.port_name());
                publish(
                    &self.events,
                    BridgeEvent::DeviceBound {
                        port: device.port_name().to_string(),
                        version: device.version().to_string(),
                        supports_native_stop: device.supports_native_stop(),
                    },
                );
            }
            (Some(device), None) => {
                let held = chrono::Utc::now() - device.bound_at();
                log::info!(
                    "TCode port {} disconnected after {}s",
                    device.port_name(),
                    held.num_seconds()
                );
                publish(
                    &self.events,
                    BridgeEvent::DeviceUnbound {
                        port: device.port_name().to_string(),
                    },
                );
                publish(&self.events, BridgeEvent::ManualControl { enabled: true });
            }
            (Some(previous), Some(next)) => {
                log::warn!(
                    "Binding replaced {} with {} without disconnect",
                    previous.port_name(),
                    next.port_name()
                );
            }
            (None, None) => {}
        }
    }
}

/// Drain device output until the transport closes, then fire `close_tx`
fn spawn_device_reader<R>(port_name: String, reader: R, close_tx: oneshot::Sender<()>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    log::debug!("Port {} reached end of stream", port_name);
                    break;
                }
                Ok(_) => log::debug!("Port {} data: {}", port_name, String::from_utf8_lossy(&buf).trim_end()),
                Err(e) => {
                    log::info!("Port {} read error: {}", port_name, e);
                    break;
                }
            }
        }
        let _ = close_tx.send(());
    });
}
