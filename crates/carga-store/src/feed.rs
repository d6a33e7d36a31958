//! Row-level change feed

use carga_api::{Channel, ChatMessage, Event, EventPayload, TrackingPoint, TrackingSummary};
use tokio::sync::broadcast;
use tracing::trace;

/// A committed change, addressed to its realtime channels
#[derive(Debug, Clone)]
pub enum ChangeEvent {
    /// INSERT on `shipment_tracking`
    TrackingPointInserted(TrackingPoint),
    /// UPDATE on `shipments`
    ShipmentUpdated(TrackingSummary),
    /// INSERT on `messages`
    MessageInserted(ChatMessage),
}

impl ChangeEvent {
    /// Channels the change is delivered on.
    ///
    /// Shipment updates also go to the tracking channel, so a tracking view
    /// sees `tracking_enabled` flip without a second subscription.
    pub fn channels(&self) -> Vec<Channel> {
        match self {
            ChangeEvent::TrackingPointInserted(point) => {
                vec![Channel::Tracking(point.shipment_id.clone())]
            }
            ChangeEvent::ShipmentUpdated(summary) => vec![
                Channel::Shipment(summary.shipment_id.clone()),
                Channel::Tracking(summary.shipment_id.clone()),
            ],
            ChangeEvent::MessageInserted(message) => vec![Channel::Chat(message.shipment_id.clone())],
        }
    }

    /// One event per channel
    pub fn into_events(self) -> Vec<Event> {
        let channels = self.channels();
        let payload = match self {
            ChangeEvent::TrackingPointInserted(point) => EventPayload::TrackingPointInserted(point),
            ChangeEvent::ShipmentUpdated(summary) => EventPayload::ShipmentUpdated(summary),
            ChangeEvent::MessageInserted(message) => EventPayload::MessageInserted(message),
        };
        channels
            .into_iter()
            .map(|channel| Event::new(Some(channel), payload.clone()))
            .collect()
    }
}

/// Broadcast fan-out of committed changes
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish to current subscribers. Having none is not an error.
    pub fn publish(&self, change: ChangeEvent) {
        let channels = change.channels();
        let receivers = self.tx.send(change).unwrap_or(0);
        trace!(channels = ?channels, receivers, "Change published");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(256)
    }
}
