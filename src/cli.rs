use std::io::{BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use tokio::sync::broadcast;

use crate::config::{BridgeSettings, ConfigError};
use crate::device::{BridgeEvent, DeviceError, Result};
use crate::serial::SerialDeviceInfo;

#[derive(Parser, Debug, Default)]
#[command(name = "tcode-bridge")]
#[command(about = "Bridges Buttplug WebSocket clients to a TCode serial device")]
pub struct Cli {
    /// TOML settings file; flags below override its values
    #[arg(long, env = "TCODE_BRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// WebSocket listen port
    #[arg(long, env = "TCODE_BRIDGE_PORT")]
    pub port: Option<u16>,

    /// Serial baud rate
    #[arg(long, env = "TCODE_BRIDGE_BAUD_RATE")]
    pub baud_rate: Option<u32>,

    /// Delay between serial scans while no device is bound
    #[arg(long, env = "TCODE_BRIDGE_SCAN_INTERVAL_MS")]
    pub scan_interval_ms: Option<u64>,

    /// How long a port gets to identify itself
    #[arg(long, env = "TCODE_BRIDGE_PROBE_TIMEOUT_MS")]
    pub probe_timeout_ms: Option<u64>,

    #[arg(long, env = "TCODE_BRIDGE_HEARTBEAT_INTERVAL_MS")]
    pub heartbeat_interval_ms: Option<u64>,

    /// Name reported in ServerInfo replies
    #[arg(long, env = "TCODE_BRIDGE_SERVER_NAME")]
    pub server_name: Option<String>,

    /// Choose the serial port from a numbered list instead of probing
    #[arg(long)]
    pub select_port: bool,
}

impl Cli {
    pub fn settings(&self) -> std::result::Result<BridgeSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => BridgeSettings::load(path)?,
            None => BridgeSettings::default(),
        };

        if let Some(port) = self.port {
            settings.listen_port = port;
        }
        if let Some(baud_rate) = self.baud_rate {
            settings.baud_rate = baud_rate;
        }
        if let Some(ms) = self.scan_interval_ms {
            settings.scan_interval_ms = ms;
        }
        if let Some(ms) = self.probe_timeout_ms {
            settings.probe_timeout_ms = ms;
        }
        if let Some(ms) = self.heartbeat_interval_ms {
            settings.heartbeat_interval_ms = ms;
        }
        if let Some(name) = &self.server_name {
            settings.server_name = name.clone();
        }

        settings.validate()?;
        Ok(settings)
    }
}

/// Numbered port prompt. Re-asks until the answer is in range;
/// end of input or an empty list is an error.
pub fn prompt_for_port<R, W>(
    candidates: &[SerialDeviceInfo],
    input: &mut R,
    output: &mut W,
) -> Result<SerialDeviceInfo>
where
    R: BufRead,
    W: Write,
{
    if candidates.is_empty() {
        writeln!(output, "No serial ports available.")?;
        return Err(DeviceError::NotFound);
    }

    writeln!(output)?;
    writeln!(output, "Available COM ports:")?;
    for (idx, candidate) in candidates.iter().enumerate() {
        writeln!(output, " {}) {}", idx + 1, candidate.describe())?;
    }
    writeln!(output)?;

    let mut line = String::new();
    loop {
        write!(output, "Which port is TCode device? (1 - {}) ", candidates.len())?;
        output.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Err(DeviceError::NotFound);
        }

        match line.trim().parse::<usize>() {
            Ok(choice) if (1..=candidates.len()).contains(&choice) => {
                return Ok(candidates[choice - 1].clone());
            }
            _ => writeln!(output, "Please enter a number between 1 and {}.", candidates.len())?,
        }
    }
}

/// Console stand-in for the status panel
pub async fn print_status_events(mut events: broadcast::Receiver<BridgeEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", status_line(&event)),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                log::debug!("Status printer skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

pub fn status_line(event: &BridgeEvent) -> String {
    match event {
        BridgeEvent::DeviceBound { port, version, supports_native_stop } => format!(
            "TCode device: yes ({}, v{}{})",
            port,
            version,
            if *supports_native_stop { ", native stop" } else { "" }
        ),
        BridgeEvent::DeviceUnbound { .. } => "TCode device: no".to_string(),
        BridgeEvent::ClientConnected { peer, .. } => format!("Script player: yes ({})", peer),
        BridgeEvent::ClientDisconnected { .. } => "Script player: no".to_string(),
        BridgeEvent::PositionReset { percent } => format!("Position: {} %", percent),
        BridgeEvent::ManualControl { enabled: true } => "Manual control: enabled".to_string(),
        BridgeEvent::ManualControl { enabled: false } => "Manual control: disabled".to_string(),
    }
}
