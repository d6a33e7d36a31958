//! Shared types for the carga API

use carga_util::{ShipmentId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single normalized position fix.
///
/// Samples carry no timestamp; the store stamps them when the row is written.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingSample {
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    /// 1-sigma horizontal radius in meters
    pub accuracy: Option<f64>,
    /// Meters per second
    pub speed: Option<f64>,
    /// Degrees clockwise from true north
    pub heading: Option<f64>,
}

impl TrackingSample {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy: None,
            speed: None,
            heading: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    pub fn with_motion(mut self, speed: f64, heading: Option<f64>) -> Self {
        self.speed = Some(speed);
        self.heading = heading;
        self
    }

    pub fn coordinates(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

/// A persisted `shipment_tracking` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingPoint {
    pub id: i64,
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    #[serde(flatten)]
    pub sample: TrackingSample,
    pub recorded_at: DateTime<Utc>,
}

/// Tracking columns of a `shipments` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSummary {
    pub shipment_id: ShipmentId,
    pub tracking_enabled: bool,
    pub current_latitude: Option<f64>,
    pub current_longitude: Option<f64>,
    pub last_location_update: Option<DateTime<Utc>>,
    pub tracking_started_at: Option<DateTime<Utc>>,
}

/// A persisted `tracking_sessions` row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingSessionRecord {
    pub id: i64,
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Ordered route of a shipment with its cumulative distance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteView {
    pub shipment_id: ShipmentId,
    pub points: Vec<TrackingPoint>,
    pub distance_km: f64,
}

/// Live view of an in-process tracking session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    pub started_at: DateTime<Utc>,
    pub last_sample: Option<TrackingSample>,
    pub last_error: Option<String>,
    pub samples_seen: u64,
}

/// Combined status of a shipment's tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingStatus {
    pub shipment_id: ShipmentId,
    /// Whether this process holds an active watch for the shipment
    pub is_tracking: bool,
    pub session: Option<SessionInfo>,
    pub summary: Option<TrackingSummary>,
}

/// Role-specific profile data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum UserRole {
    /// Shipper publishing cargo
    Client {
        #[serde(default)]
        company_name: Option<String>,
    },
    /// Carrier moving cargo
    Transporter {
        vehicle_type: String,
        #[serde(default)]
        plate_number: Option<String>,
        #[serde(default)]
        capacity_kg: Option<f64>,
    },
}

impl UserRole {
    pub fn tag(&self) -> RoleTag {
        match self {
            UserRole::Client { .. } => RoleTag::Client,
            UserRole::Transporter { .. } => RoleTag::Transporter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleTag {
    Client,
    Transporter,
}

/// Marketplace user profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub role: UserRole,
}

/// A persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub shipment_id: ShipmentId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Chat message joined with its sender's profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessageView {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender_name: String,
    pub sender_role: Option<RoleTag>,
}
