//! 入站事件与出站命令携带的载荷类型。
//!
//! Payload types carried by inbound events and outbound commands.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A voltage sample for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoltagePayload {
    pub device_id: String,
    pub voltage: f64,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A current sample for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentPayload {
    pub device_id: String,
    pub current: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// A power sample for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerPayload {
    pub device_id: String,
    pub power: f64,
    #[serde(default)]
    pub power_factor: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Online/offline transitions of a field device (not of this client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConnectionPayload {
    pub device_id: String,
    pub connected: bool,
    #[serde(default)]
    pub signal_strength: Option<i32>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// 领域告警的严重级别。
///
/// Severity of a domain alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertPayload {
    pub id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub severity: AlertSeverity,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub level: NotificationLevel,
}

/// Result of a previously emitted [`HardwareCommand`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResultPayload {
    pub command_id: String,
    pub device_id: String,
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorPayload {
    pub device_id: String,
    pub sensor: String,
    pub value: f64,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload {
    pub device_id: String,
    pub relay: String,
    pub state: bool,
}

/// Server acknowledgement of a `room:join`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPayload {
    pub room: String,
}

/// 服务器在握手之外推送的错误。
///
/// An error pushed by the server outside of the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorPayload {
    pub message: String,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub code: Option<String>,
}

/// Heartbeat body shared by `ping` and `pong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    pub timestamp: u64,
}

/// 发往现场设备的命令。
///
/// A command addressed to a field device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareCommand {
    pub command_id: String,
    pub device_id: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
}
