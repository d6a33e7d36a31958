//! Realtime channels and events for cargad -> client streaming

use carga_util::ShipmentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{API_VERSION, ChatMessage, TrackingPoint, TrackingSummary};

/// A realtime channel, scoped to one shipment.
///
/// Serialized by name: `tracking_<id>`, `shipment_<id>`, `chat_<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    /// New `shipment_tracking` rows
    Tracking(ShipmentId),
    /// Updates to the shipment's tracking summary
    Shipment(ShipmentId),
    /// New chat messages
    Chat(ShipmentId),
}

impl Channel {
    pub fn shipment_id(&self) -> &ShipmentId {
        match self {
            Channel::Tracking(id) | Channel::Shipment(id) | Channel::Chat(id) => id,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Tracking(id) => write!(f, "tracking_{}", id),
            Channel::Shipment(id) => write!(f, "shipment_{}", id),
            Channel::Chat(id) => write!(f, "chat_{}", id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChannelError(String);

impl fmt::Display for ParseChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid channel name: {}", self.0)
    }
}

impl std::error::Error for ParseChannelError {}

impl FromStr for Channel {
    type Err = ParseChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once('_')
            .filter(|(_, id)| !id.is_empty())
            .ok_or_else(|| ParseChannelError(s.to_string()))?;

        let id = ShipmentId::new(id);
        match kind {
            "tracking" => Ok(Channel::Tracking(id)),
            "shipment" => Ok(Channel::Shipment(id)),
            "chat" => Ok(Channel::Chat(id)),
            _ => Err(ParseChannelError(s.to_string())),
        }
    }
}

impl Serialize for Channel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Channel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Utc>,
    /// Channel the event was published on; `None` for daemon-wide events
    pub channel: Option<Channel>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(channel: Option<Channel>, payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: carga_util::now(),
            channel,
            payload,
        }
    }

    /// Daemon-wide event, delivered to every connected client
    pub fn broadcast(payload: EventPayload) -> Self {
        Self::new(None, payload)
    }
}

/// All possible events from the daemon to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A tracking row was inserted
    TrackingPointInserted(TrackingPoint),

    /// A shipment's tracking summary changed
    ShipmentUpdated(TrackingSummary),

    /// A chat message was inserted
    MessageInserted(ChatMessage),

    /// Daemon is shutting down
    Shutdown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names() {
        let id = ShipmentId::new("abc-123");
        assert_eq!(Channel::Tracking(id.clone()).to_string(), "tracking_abc-123");
        assert_eq!(Channel::Shipment(id.clone()).to_string(), "shipment_abc-123");
        assert_eq!(Channel::Chat(id).to_string(), "chat_abc-123");
    }

    #[test]
    fn channel_parse_keeps_underscores_in_id() {
        let parsed: Channel = "chat_ship_42".parse().unwrap();
        assert_eq!(parsed, Channel::Chat(ShipmentId::new("ship_42")));
    }

    #[test]
    fn channel_parse_rejects_unknown() {
        assert!("route_S1".parse::<Channel>().is_err());
        assert!("tracking_".parse::<Channel>().is_err());
        assert!("tracking".parse::<Channel>().is_err());
    }

    #[test]
    fn event_serialization() {
        let summary = TrackingSummary {
            shipment_id: ShipmentId::new("S1"),
            tracking_enabled: true,
            current_latitude: Some(14.6),
            current_longitude: Some(-90.5),
            last_location_update: Some(carga_util::now()),
            tracking_started_at: Some(carga_util::now()),
        };
        let event = Event::new(
            Some(Channel::Shipment(ShipmentId::new("S1"))),
            EventPayload::ShipmentUpdated(summary),
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""channel":"shipment_S1""#));

        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.api_version, API_VERSION);
        assert!(matches!(parsed.payload, EventPayload::ShipmentUpdated(_)));
    }
}
