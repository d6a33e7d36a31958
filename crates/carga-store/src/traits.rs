//! Store trait definitions

use async_trait::async_trait;
use carga_api::{ChatMessage, Profile, TrackingPoint, TrackingSample, TrackingSessionRecord, TrackingSummary};
use carga_util::{ShipmentId, UserId};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::{ChangeEvent, StoreResult};

/// A tracking row before insertion
#[derive(Debug, Clone)]
pub struct NewTrackingPoint {
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    pub sample: TrackingSample,
    /// Stamped by the store at insert when `None`
    pub recorded_at: Option<DateTime<Utc>>,
}

impl NewTrackingPoint {
    pub fn new(shipment_id: ShipmentId, transporter_id: UserId, sample: TrackingSample) -> Self {
        Self {
            shipment_id,
            transporter_id,
            sample,
            recorded_at: None,
        }
    }

    /// Use an explicit timestamp instead of the insert time
    pub fn at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }
}

/// A chat message before insertion
#[derive(Debug, Clone)]
pub struct NewChatMessage {
    pub shipment_id: ShipmentId,
    pub sender_id: UserId,
    pub content: String,
}

/// Tracking gateway
///
/// Every write that changes a realtime-visible row publishes a
/// [`ChangeEvent`] to subscribers after the write commits.
#[async_trait]
pub trait TrackingStore: Send + Sync {
    // Tracking points

    /// Append a tracking row
    async fn insert_tracking_point(&self, point: NewTrackingPoint) -> StoreResult<TrackingPoint>;

    /// All rows of a shipment, oldest first
    async fn list_tracking_points(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<TrackingPoint>>;

    // Shipment summary

    /// Mark tracking as started at `at` with an initial position
    async fn enable_tracking(
        &self,
        shipment_id: &ShipmentId,
        sample: &TrackingSample,
        at: DateTime<Utc>,
    ) -> StoreResult<TrackingSummary>;

    /// Move the current position. Ignored when `at` is older than the
    /// stored `last_location_update`; returns whether the row changed.
    async fn update_current_location(
        &self,
        shipment_id: &ShipmentId,
        sample: &TrackingSample,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn disable_tracking(&self, shipment_id: &ShipmentId) -> StoreResult<()>;

    async fn get_tracking_summary(&self, shipment_id: &ShipmentId) -> StoreResult<Option<TrackingSummary>>;

    // Tracking session records

    async fn open_tracking_session(
        &self,
        shipment_id: &ShipmentId,
        transporter_id: &UserId,
    ) -> StoreResult<TrackingSessionRecord>;

    /// Close the most recent active record for the pair, if any
    async fn close_tracking_session(
        &self,
        shipment_id: &ShipmentId,
        transporter_id: &UserId,
    ) -> StoreResult<Option<TrackingSessionRecord>>;

    async fn list_tracking_sessions(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<TrackingSessionRecord>>;

    /// Close every active record and clear every tracking flag.
    /// Returns the number of session records closed.
    async fn close_stale_sessions(&self) -> StoreResult<usize>;

    // Chat

    async fn insert_message(&self, message: NewChatMessage) -> StoreResult<ChatMessage>;

    /// Messages of a shipment, oldest first
    async fn list_messages(&self, shipment_id: &ShipmentId) -> StoreResult<Vec<ChatMessage>>;

    // Profiles

    async fn upsert_profile(&self, profile: &Profile) -> StoreResult<()>;

    async fn get_profile(&self, user_id: &UserId) -> StoreResult<Option<Profile>>;

    // Realtime

    /// Receive every change published after this call
    fn subscribe(&self) -> broadcast::Receiver<ChangeEvent>;

    // Health

    fn is_healthy(&self) -> bool;
}
