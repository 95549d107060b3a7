use crate::device::{publish, BindingHandle, BridgeEvent, EventSender};
use crate::serial::protocol::{encode_linear, encode_stop};
use super::messages::{
    DeviceDescriptor, DeviceList, InboundMessage, LinearVector, OutboundReply, ServerInfo,
    MESSAGE_VERSION,
};

/// Maps inbound messages onto replies and TCode writes.
///
/// Every known message gets exactly one reply. Writes go to whatever device
/// is bound at that moment and are skipped when nothing is bound.
#[derive(Debug, Clone)]
pub struct ProtocolTranslator {
    server_name: String,
    binding: BindingHandle,
    events: EventSender,
}

impl ProtocolTranslator {
    pub fn new(server_name: impl Into<String>, binding: BindingHandle, events: EventSender) -> Self {
        Self {
            server_name: server_name.into(),
            binding,
            events,
        }
    }

    pub async fn handle(&self, message: InboundMessage) -> Option<OutboundReply> {
        log::info!("{} {:?}", message.tag(), message);

        match message {
            InboundMessage::RequestServerInfo { id } => Some(OutboundReply::ServerInfo(ServerInfo {
                id,
                server_name: self.server_name.clone(),
                message_version: MESSAGE_VERSION,
                max_ping_time: 0,
            })),
            InboundMessage::RequestDeviceList { id } => Some(OutboundReply::DeviceList(DeviceList {
                id,
                devices: vec![DeviceDescriptor::tcode()],
            })),
            // Scanning never stops, so there is nothing to start
            InboundMessage::StartScanning { id } => Some(OutboundReply::ok(id)),
            InboundMessage::LinearCmd { id, vectors, .. } => {
                self.linear(vectors.first()).await;
                Some(OutboundReply::ok(id))
            }
            InboundMessage::StopDeviceCmd { id, .. } => {
                self.stop().await;
                Some(OutboundReply::ok(id))
            }
            InboundMessage::Unknown { tag } => {
                log::info!("noop for {}", tag);
                None
            }
        }
    }

    async fn linear(&self, vector: Option<&LinearVector>) {
        let Some(vector) = vector else {
            log::warn!("LinearCmd without vectors, nothing to send");
            return;
        };

        publish(&self.events, BridgeEvent::ManualControl { enabled: false });
        self.send_tcode(&encode_linear(vector.position, vector.duration)).await;
    }

    async fn stop(&self) {
        let native_stop = self
            .binding
            .current()
            .map_or(false, |device| device.supports_native_stop());
        let stop = encode_stop(native_stop);

        publish(&self.events, BridgeEvent::ManualControl { enabled: true });
        if let Some(percent) = stop.ui_reset {
            publish(&self.events, BridgeEvent::PositionReset { percent });
        }
        self.send_tcode(&stop.command).await;
    }

    async fn send_tcode(&self, code: &str) {
        let Some(device) = self.binding.current() else {
            log::debug!("No TCode device bound, dropping {}", code);
            return;
        };

        if let Err(e) = device.send_tcode(code).await {
            log::info!("Error on write to {}: {}", device.port_name(), e);
        }
    }
}
