//! 带类型的入站事件、出站命令及其线上表示。
//!
//! 入站流量是一个封闭的事件种类集合，每个种类恰好对应一种载荷类型。处理器通过实现
//! [`Event`] 的标记类型注册，因此 `VoltageUpdate` 的处理器只会收到 [`VoltagePayload`]。
//!
//! Typed inbound events, outbound commands and their wire representation.
//!
//! Inbound traffic is a closed set of event kinds, each with exactly one payload
//! type. Handlers are registered against a marker type implementing [`Event`], so
//! a handler for `VoltageUpdate` can only ever receive a [`VoltagePayload`].

pub mod payload;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub use payload::{
    AlertPayload, AlertSeverity, CommandResultPayload, CurrentPayload, DeviceConnectionPayload,
    HardwareCommand, HeartbeatPayload, NotificationLevel, NotificationPayload, PowerPayload,
    RelayPayload, RoomPayload, SensorPayload, ServerErrorPayload, VoltagePayload,
};

/// Wire name of the heartbeat request.
pub const PING_EVENT: &str = "ping";
/// Wire name of the heartbeat reply.
pub const PONG_EVENT: &str = "pong";

/// 传输层承载的具名消息。
///
/// A named message as carried by the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

impl WireMessage {
    pub fn new(event: impl Into<String>, payload: Value) -> Self {
        Self {
            event: event.into(),
            payload,
        }
    }

    /// Builds a message from any serializable payload.
    pub fn encode<P: Serialize>(event: impl Into<String>, payload: &P) -> Result<Self> {
        Ok(Self::new(event, serde_json::to_value(payload)?))
    }
}

/// 入站事件种类的封闭集合。
///
/// The closed set of inbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    VoltageUpdate,
    CurrentUpdate,
    PowerUpdate,
    ConnectionUpdate,
    Alert,
    Notification,
    HardwareCommandResult,
    SensorUpdate,
    RelayUpdate,
    RoomJoined,
    ServerError,
}

impl EventKind {
    pub const ALL: [EventKind; 11] = [
        EventKind::VoltageUpdate,
        EventKind::CurrentUpdate,
        EventKind::PowerUpdate,
        EventKind::ConnectionUpdate,
        EventKind::Alert,
        EventKind::Notification,
        EventKind::HardwareCommandResult,
        EventKind::SensorUpdate,
        EventKind::RelayUpdate,
        EventKind::RoomJoined,
        EventKind::ServerError,
    ];

    /// 线上使用的事件名。
    /// The event name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::VoltageUpdate => "voltage:update",
            EventKind::CurrentUpdate => "current:update",
            EventKind::PowerUpdate => "power:update",
            EventKind::ConnectionUpdate => "connection:update",
            EventKind::Alert => "alert",
            EventKind::Notification => "notification",
            EventKind::HardwareCommandResult => "hardware:command_result",
            EventKind::SensorUpdate => "hardware:sensor_update",
            EventKind::RelayUpdate => "hardware:relay_update",
            EventKind::RoomJoined => "room:joined",
            EventKind::ServerError => "error",
        }
    }

    /// 根据线上事件名查找种类。
    /// Looks up a kind by its wire name.
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已解码的入站事件。
///
/// A decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    VoltageUpdate(VoltagePayload),
    CurrentUpdate(CurrentPayload),
    PowerUpdate(PowerPayload),
    ConnectionUpdate(DeviceConnectionPayload),
    Alert(AlertPayload),
    Notification(NotificationPayload),
    HardwareCommandResult(CommandResultPayload),
    SensorUpdate(SensorPayload),
    RelayUpdate(RelayPayload),
    RoomJoined(RoomPayload),
    ServerError(ServerErrorPayload),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::VoltageUpdate(_) => EventKind::VoltageUpdate,
            InboundEvent::CurrentUpdate(_) => EventKind::CurrentUpdate,
            InboundEvent::PowerUpdate(_) => EventKind::PowerUpdate,
            InboundEvent::ConnectionUpdate(_) => EventKind::ConnectionUpdate,
            InboundEvent::Alert(_) => EventKind::Alert,
            InboundEvent::Notification(_) => EventKind::Notification,
            InboundEvent::HardwareCommandResult(_) => EventKind::HardwareCommandResult,
            InboundEvent::SensorUpdate(_) => EventKind::SensorUpdate,
            InboundEvent::RelayUpdate(_) => EventKind::RelayUpdate,
            InboundEvent::RoomJoined(_) => EventKind::RoomJoined,
            InboundEvent::ServerError(_) => EventKind::ServerError,
        }
    }

    /// 将线上消息解码为带类型的形式。
    ///
    /// Decodes a wire message into its typed form.
    pub fn decode(message: &WireMessage) -> Result<Self> {
        let kind = EventKind::from_wire(&message.event)
            .ok_or_else(|| Error::UnknownEvent(message.event.clone()))?;
        let body = message.payload.clone();
        let event = match kind {
            EventKind::VoltageUpdate => InboundEvent::VoltageUpdate(serde_json::from_value(body)?),
            EventKind::CurrentUpdate => InboundEvent::CurrentUpdate(serde_json::from_value(body)?),
            EventKind::PowerUpdate => InboundEvent::PowerUpdate(serde_json::from_value(body)?),
            EventKind::ConnectionUpdate => {
                InboundEvent::ConnectionUpdate(serde_json::from_value(body)?)
            }
            EventKind::Alert => InboundEvent::Alert(serde_json::from_value(body)?),
            EventKind::Notification => InboundEvent::Notification(serde_json::from_value(body)?),
            EventKind::HardwareCommandResult => {
                InboundEvent::HardwareCommandResult(serde_json::from_value(body)?)
            }
            EventKind::SensorUpdate => InboundEvent::SensorUpdate(serde_json::from_value(body)?),
            EventKind::RelayUpdate => InboundEvent::RelayUpdate(serde_json::from_value(body)?),
            EventKind::RoomJoined => InboundEvent::RoomJoined(serde_json::from_value(body)?),
            EventKind::ServerError => InboundEvent::ServerError(serde_json::from_value(body)?),
        };
        Ok(event)
    }
}

/// 带类型的事件：将 [`EventKind`] 绑定到其载荷类型。
///
/// A typed event: binds an [`EventKind`] to its payload type.
pub trait Event: Send + Sync + 'static {
    const KIND: EventKind;
    type Payload: Clone + Send + Sync + 'static;

    /// Borrows the payload if `event` is of this kind.
    fn payload(event: &InboundEvent) -> Option<&Self::Payload>;
}

macro_rules! typed_events {
    ($($(#[$meta:meta])* $marker:ident => $payload:ty;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub struct $marker;

            impl Event for $marker {
                const KIND: EventKind = EventKind::$marker;
                type Payload = $payload;

                fn payload(event: &InboundEvent) -> Option<&$payload> {
                    match event {
                        InboundEvent::$marker(payload) => Some(payload),
                        _ => None,
                    }
                }
            }
        )*
    };
}

typed_events! {
    /// `voltage:update`
    VoltageUpdate => VoltagePayload;
    /// `current:update`
    CurrentUpdate => CurrentPayload;
    /// `power:update`
    PowerUpdate => PowerPayload;
    /// `connection:update`
    ConnectionUpdate => DeviceConnectionPayload;
    /// `alert`
    Alert => AlertPayload;
    /// `notification`
    Notification => NotificationPayload;
    /// `hardware:command_result`
    HardwareCommandResult => CommandResultPayload;
    /// `hardware:sensor_update`
    SensorUpdate => SensorPayload;
    /// `hardware:relay_update`
    RelayUpdate => RelayPayload;
    /// `room:joined`
    RoomJoined => RoomPayload;
    /// `error`
    ServerError => ServerErrorPayload;
}

/// 从客户端发往服务器的命令。
///
/// Commands sent from the client to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundCommand {
    Hardware(HardwareCommand),
    JoinRoom { room: String },
    LeaveRoom { room: String },
    Ping { timestamp: u64 },
}

impl OutboundCommand {
    pub fn event_name(&self) -> &'static str {
        match self {
            OutboundCommand::Hardware(_) => "hardware:command",
            OutboundCommand::JoinRoom { .. } => "room:join",
            OutboundCommand::LeaveRoom { .. } => "room:leave",
            OutboundCommand::Ping { .. } => PING_EVENT,
        }
    }

    pub fn encode(&self) -> Result<WireMessage> {
        let name = self.event_name();
        match self {
            OutboundCommand::Hardware(command) => WireMessage::encode(name, command),
            OutboundCommand::JoinRoom { room } | OutboundCommand::LeaveRoom { room } => {
                WireMessage::encode(name, &RoomPayload { room: room.clone() })
            }
            OutboundCommand::Ping { timestamp } => WireMessage::encode(
                name,
                &HeartbeatPayload {
                    timestamp: *timestamp,
                },
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_names_round_trip_through_lookup() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_wire(kind.as_str()), Some(kind));
        }
        assert_eq!(EventKind::from_wire("pong"), None);
    }

    #[test]
    fn test_decode_voltage_update() {
        let message = WireMessage::new(
            "voltage:update",
            json!({ "deviceId": "dev-1", "voltage": 229.5, "timestamp": 1700 }),
        );
        let event = InboundEvent::decode(&message).unwrap();
        assert_eq!(event.kind(), EventKind::VoltageUpdate);
        let payload = VoltageUpdate::payload(&event).unwrap();
        assert_eq!(payload.device_id, "dev-1");
        assert_eq!(payload.voltage, 229.5);
        assert!(CurrentUpdate::payload(&event).is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_and_malformed() {
        let unknown = WireMessage::new("quote:update", json!({}));
        assert!(matches!(
            InboundEvent::decode(&unknown),
            Err(Error::UnknownEvent(name)) if name == "quote:update"
        ));

        let malformed = WireMessage::new("alert", json!({ "id": "a1" }));
        assert!(matches!(
            InboundEvent::decode(&malformed),
            Err(Error::Serialization(_))
        ));
    }

    #[test]
    fn test_alert_severity_is_lowercase_on_the_wire() {
        let message = WireMessage::new(
            "alert",
            json!({ "id": "a1", "severity": "critical", "message": "Overvoltage" }),
        );
        let event = InboundEvent::decode(&message).unwrap();
        let alert = Alert::payload(&event).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert!(alert.device_id.is_none());
    }

    #[test]
    fn test_outbound_command_encoding() {
        let join = OutboundCommand::JoinRoom {
            room: "site-7".into(),
        }
        .encode()
        .unwrap();
        assert_eq!(join.event, "room:join");
        assert_eq!(join.payload, json!({ "room": "site-7" }));

        let ping = OutboundCommand::Ping { timestamp: 42 }.encode().unwrap();
        assert_eq!(ping.event, PING_EVENT);
        assert_eq!(ping.payload, json!({ "timestamp": 42 }));

        let hardware = OutboundCommand::Hardware(HardwareCommand {
            command_id: "c1".into(),
            device_id: "relay-board".into(),
            action: "toggle".into(),
            params: json!({ "relay": "r2" }),
        })
        .encode()
        .unwrap();
        assert_eq!(hardware.event, "hardware:command");
        assert_eq!(hardware.payload["commandId"], "c1");
        assert_eq!(hardware.payload["params"]["relay"], "r2");
    }
}
