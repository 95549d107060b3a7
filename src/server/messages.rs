//! Buttplug v2 message subset understood by the bridge.
//!
//! A frame is a JSON array of objects, each object mapping a message tag to
//! its body, e.g. `[{"RequestServerInfo": {"Id": 1, ...}}]`. Replies go out
//! the same way, one reply per frame.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{ProtocolError, Result};
use crate::serial::protocol::parse_leading_number;

pub const MESSAGE_VERSION: u32 = 2;
pub const DEVICE_NAME: &str = "TCode device";
pub const DEVICE_INDEX: u32 = 0;

/// One entry of `LinearCmd.Vectors`.
///
/// Players are loose about number types here: `Position` and `Duration` may
/// arrive as floats or numeric strings. Durations are rounded to whole ms.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LinearVector {
    #[serde(default)]
    pub index: u32,
    #[serde(deserialize_with = "loose_number")]
    pub position: f64,
    #[serde(deserialize_with = "loose_millis")]
    pub duration: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IdOnly {
    id: u32,
}

/// Everything but `Id`; decoded separately so a bad body still gets its reply
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LinearCmdBody {
    #[serde(default)]
    device_index: u32,
    vectors: Vec<LinearVector>,
}

fn loose_number<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().ok_or_else(|| de::Error::custom("number out of range")),
        Value::String(text) => {
            parse_leading_number(&text).ok_or_else(|| de::Error::custom(format!("not a number: {:?}", text)))
        }
        other => Err(de::Error::custom(format!("expected a number, got {}", other))),
    }
}

fn loose_millis<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = loose_number(deserializer)?;
    if !millis.is_finite() || millis < 0.0 {
        return Err(de::Error::custom(format!("invalid duration {}", millis)));
    }
    Ok(millis.round().min(u32::MAX as f64) as u32)
}

/// Inbound message, decoded once from a tag and its body
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    RequestServerInfo { id: u32 },
    RequestDeviceList { id: u32 },
    StartScanning { id: u32 },
    LinearCmd { id: u32, device_index: u32, vectors: Vec<LinearVector> },
    StopDeviceCmd { id: u32, device_index: u32 },
    Unknown { tag: String },
}

impl InboundMessage {
    pub fn decode(tag: &str, body: Value) -> Result<Self> {
        let message = match tag {
            "RequestServerInfo" => InboundMessage::RequestServerInfo { id: body_of::<IdOnly>(tag, body)?.id },
            "RequestDeviceList" => InboundMessage::RequestDeviceList { id: body_of::<IdOnly>(tag, body)?.id },
            "StartScanning" => InboundMessage::StartScanning { id: body_of::<IdOnly>(tag, body)?.id },
            "LinearCmd" => {
                let id = body_of::<IdOnly>(tag, body.clone())?.id;
                match body_of::<LinearCmdBody>(tag, body) {
                    Ok(body) => InboundMessage::LinearCmd {
                        id,
                        device_index: body.device_index,
                        vectors: body.vectors,
                    },
                    Err(e) => {
                        log::warn!("{}; replying without moving", e);
                        InboundMessage::LinearCmd {
                            id,
                            device_index: DEVICE_INDEX,
                            vectors: Vec::new(),
                        }
                    }
                }
            }
            "StopDeviceCmd" => InboundMessage::StopDeviceCmd {
                id: body_of::<IdOnly>(tag, body.clone())?.id,
                device_index: body.get("DeviceIndex").and_then(Value::as_u64).map_or(DEVICE_INDEX, |i| i as u32),
            },
            other => InboundMessage::Unknown { tag: other.to_string() },
        };
        Ok(message)
    }

    pub fn tag(&self) -> &str {
        match self {
            InboundMessage::RequestServerInfo { .. } => "RequestServerInfo",
            InboundMessage::RequestDeviceList { .. } => "RequestDeviceList",
            InboundMessage::StartScanning { .. } => "StartScanning",
            InboundMessage::LinearCmd { .. } => "LinearCmd",
            InboundMessage::StopDeviceCmd { .. } => "StopDeviceCmd",
            InboundMessage::Unknown { tag } => tag,
        }
    }
}

fn body_of<T: serde::de::DeserializeOwned>(tag: &str, body: Value) -> Result<T> {
    serde_json::from_value(body).map_err(|e| ProtocolError::MalformedMessage {
        tag: tag.to_string(),
        reason: e.to_string(),
    })
}

/// Parse a frame into its message objects, keeping their order.
/// Tags within one object come back in the order they were written.
pub fn parse_frame(text: &str) -> Result<Vec<(String, Value)>> {
    let objects: Vec<Map<String, Value>> =
        serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame(e.to_string()))?;

    Ok(objects.into_iter().flat_map(|object| object.into_iter()).collect())
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub id: u32,
    pub server_name: String,
    pub message_version: u32,
    pub max_ping_time: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceList {
    pub id: u32,
    pub devices: Vec<DeviceDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceDescriptor {
    pub device_name: String,
    pub device_index: u32,
    pub device_messages: DeviceMessages,
}

impl DeviceDescriptor {
    /// The one device the bridge ever advertises
    pub fn tcode() -> Self {
        Self {
            device_name: DEVICE_NAME.to_string(),
            device_index: DEVICE_INDEX,
            device_messages: DeviceMessages {
                linear_cmd: FeatureCount { feature_count: 1 },
                stop_device_cmd: NoAttributes {},
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceMessages {
    pub linear_cmd: FeatureCount,
    pub stop_device_cmd: NoAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct FeatureCount {
    pub feature_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NoAttributes {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OkReply {
    pub id: u32,
}

/// Outbound reply; serializes externally tagged, e.g. `{"Ok": {"Id": 1}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum OutboundReply {
    ServerInfo(ServerInfo),
    DeviceList(DeviceList),
    Ok(OkReply),
}

impl OutboundReply {
    pub fn ok(id: u32) -> Self {
        OutboundReply::Ok(OkReply { id })
    }

    pub fn id(&self) -> u32 {
        match self {
            OutboundReply::ServerInfo(info) => info.id,
            OutboundReply::DeviceList(list) => list.id,
            OutboundReply::Ok(ok) => ok.id,
        }
    }

    /// Serialize as a one-element reply batch
    pub fn to_frame(&self) -> Result<String> {
        serde_json::to_string(&[self]).map_err(|e| ProtocolError::Encode(e.to_string()))
    }
}
