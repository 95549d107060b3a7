#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{duplex, AsyncReadExt, BufReader, DuplexStream};
use tokio::time::timeout;

use tcode_bridge_lib::device::{event_channel, BridgeEvent, DeviceManager, EventSender, ProbeOutcome};
use tcode_bridge_lib::serial::{SerialBackend, SerialDeviceInfo, SerialError};

/// In-memory stand-in for the host's serial ports.
/// Each port is one end of a duplex pipe; the test keeps the device end.
#[derive(Clone, Default)]
pub struct MockBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    names: Mutex<Vec<String>>,
    unopened: Mutex<HashMap<String, DuplexStream>>,
    stalls: Mutex<HashMap<String, Duration>>,
    opens: AtomicUsize,
}

impl MockBackend {
    /// Plug in a port and return its device end
    pub fn add_port(&self, name: &str) -> DuplexStream {
        let (host, device) = duplex(1024);
        self.inner.unopened.lock().unwrap().insert(name.to_string(), host);
        self.inner.names.lock().unwrap().push(name.to_string());
        device
    }

    /// A port whose open blocks the calling thread for `stall`, like a
    /// driver that is slow to give up the device
    pub fn add_stalling_port(&self, name: &str, stall: Duration) -> DuplexStream {
        self.inner.stalls.lock().unwrap().insert(name.to_string(), stall);
        self.add_port(name)
    }

    /// A port that is listed but refuses to open
    pub fn add_busy_port(&self, name: &str) {
        self.inner.names.lock().unwrap().push(name.to_string());
    }

    pub fn remove_port(&self, name: &str) {
        self.inner.names.lock().unwrap().retain(|n| n != name);
        self.inner.unopened.lock().unwrap().remove(name);
    }

    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SerialBackend for MockBackend {
    type Transport = DuplexStream;

    fn list_candidates(&self) -> Result<Vec<SerialDeviceInfo>, SerialError> {
        let names = self.inner.names.lock().unwrap();
        Ok(names.iter().map(|name| SerialDeviceInfo::new(name.as_str())).collect())
    }

    async fn open(&self, candidate: &SerialDeviceInfo) -> Result<DuplexStream, SerialError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        let stall = self.inner.stalls.lock().unwrap().get(&candidate.port_name).copied();
        if let Some(stall) = stall {
            std::thread::sleep(stall);
        }
        self.inner
            .unopened
            .lock()
            .unwrap()
            .remove(&candidate.port_name)
            .ok_or_else(|| SerialError::ConnectionFailed(format!("{} is busy", candidate.port_name)))
    }
}

pub const PROBE_TIMEOUT: Duration = Duration::from_millis(100);
pub const SCAN_INTERVAL: Duration = Duration::from_millis(30);

pub fn manager(backend: &MockBackend) -> (DeviceManager<MockBackend>, tokio::sync::broadcast::Receiver<BridgeEvent>) {
    let (events, rx) = event_channel(64);
    (manager_with_events(backend, events), rx)
}

pub fn manager_with_events(backend: &MockBackend, events: EventSender) -> DeviceManager<MockBackend> {
    DeviceManager::new(backend.clone(), SCAN_INTERVAL, PROBE_TIMEOUT, events)
}

/// A matched probe outcome over a fresh pipe; returns the device end too
pub fn matched(port: &str, version: &str) -> (ProbeOutcome<DuplexStream>, DuplexStream) {
    let (host, device) = duplex(1024);
    let outcome = ProbeOutcome::Matched {
        candidate: SerialDeviceInfo::new(port),
        version: version.to_string(),
        transport: BufReader::new(host),
    };
    (outcome, device)
}

/// Read whatever the bridge wrote to a device within a short window
pub async fn read_device(device: &mut DuplexStream) -> Option<String> {
    let mut buf = [0u8; 256];
    match timeout(Duration::from_millis(200), device.read(&mut buf)).await {
        Ok(Ok(n)) => Some(String::from_utf8_lossy(&buf[..n]).to_string()),
        _ => None,
    }
}

pub fn drain(rx: &mut tokio::sync::broadcast::Receiver<BridgeEvent>) -> Vec<BridgeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
