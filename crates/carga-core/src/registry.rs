//! Process-wide registry of tracking sessions
//!
//! At most one session exists per shipment. The registry owns each session's
//! watch handle and pump task, so a session outlives whichever controller
//! started it.

use carga_api::{SessionInfo, TrackingSample};
use carga_geo_api::WatchHandle;
use carga_util::{ShipmentId, UserId};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::warn;

/// Live state shared by every controller attached to a shipment
#[derive(Debug, Clone, Default)]
pub struct TrackingState {
    pub current_location: Option<TrackingSample>,
    /// True only while a one-shot read is in flight
    pub is_getting_location: bool,
    /// Last sensor failure, as shown to the user
    pub error: Option<String>,
    pub samples_seen: u64,
}

pub type SharedState = Arc<Mutex<TrackingState>>;

/// An active tracking session
#[derive(Debug)]
pub struct TrackingSession {
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    pub watch_handle: WatchHandle,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub state: SharedState,
    stop_tx: Option<oneshot::Sender<()>>,
    pump: Option<JoinHandle<()>>,
}

impl TrackingSession {
    pub fn new(
        shipment_id: ShipmentId,
        transporter_id: UserId,
        watch_handle: WatchHandle,
        state: SharedState,
    ) -> Self {
        Self {
            shipment_id,
            transporter_id,
            watch_handle,
            is_active: true,
            started_at: carga_util::now(),
            state,
            stop_tx: None,
            pump: None,
        }
    }

    /// Attach the task draining this session's watch
    pub fn with_pump(mut self, stop_tx: oneshot::Sender<()>, pump: JoinHandle<()>) -> Self {
        self.stop_tx = Some(stop_tx);
        self.pump = Some(pump);
        self
    }

    /// Signal the pump and wait for it to finish its current sample
    pub async fn shutdown(mut self) {
        self.is_active = false;

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(pump) = self.pump.take()
            && let Err(e) = pump.await
        {
            warn!(shipment_id = %self.shipment_id, error = %e, "Tracking pump ended abnormally");
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            shipment_id: self.shipment_id.clone(),
            transporter_id: self.transporter_id.clone(),
            watch_handle: self.watch_handle.clone(),
            is_active: self.is_active,
            started_at: self.started_at,
            state: self.state.clone(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        let state = self.state.lock().unwrap();
        SessionInfo {
            shipment_id: self.shipment_id.clone(),
            transporter_id: self.transporter_id.clone(),
            started_at: self.started_at,
            last_sample: state.current_location,
            last_error: state.error.clone(),
            samples_seen: state.samples_seen,
        }
    }
}

/// Snapshot of a registered session
#[derive(Debug, Clone)]
pub struct SessionView {
    pub shipment_id: ShipmentId,
    pub transporter_id: UserId,
    pub watch_handle: WatchHandle,
    pub is_active: bool,
    pub started_at: DateTime<Utc>,
    pub state: SharedState,
}

/// What a stop found for a shipment
#[derive(Debug)]
pub enum StopTarget {
    /// A running session, now removed from the registry
    Session(TrackingSession),
    /// A start still in progress, now marked cancelled
    Starting(StartRelease),
    Idle,
}

#[derive(Debug)]
struct PendingStart {
    cancelled: bool,
    released: watch::Receiver<()>,
}

#[derive(Debug, Default)]
struct Inner {
    sessions: HashMap<ShipmentId, TrackingSession>,
    /// Shipments with a start in progress
    starting: HashMap<ShipmentId, PendingStart>,
}

impl Inner {
    fn set(&mut self, shipment_id: ShipmentId, session: TrackingSession) -> Option<TrackingSession> {
        self.sessions.insert(shipment_id, session)
    }

    fn delete(&mut self, shipment_id: &ShipmentId) -> Option<TrackingSession> {
        self.sessions.remove(shipment_id)
    }

    fn is_cancelled(&self, shipment_id: &ShipmentId) -> bool {
        self.starting
            .get(shipment_id)
            .is_some_and(|pending| pending.cancelled)
    }
}

/// Mutex-guarded map of shipment id to session
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: Mutex<Inner>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<SessionRegistry>> = OnceLock::new();

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry shared by the whole process
    pub fn global() -> Arc<SessionRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(SessionRegistry::new()))
            .clone()
    }

    pub fn get(&self, shipment_id: &ShipmentId) -> Option<SessionView> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(shipment_id).map(TrackingSession::view)
    }

    /// Insert or overwrite; the replaced session is returned for shutdown
    pub fn set(&self, shipment_id: ShipmentId, session: TrackingSession) -> Option<TrackingSession> {
        self.inner.lock().unwrap().set(shipment_id, session)
    }

    /// Remove a session. Absent ids are a no-op.
    pub fn delete(&self, shipment_id: &ShipmentId) -> Option<TrackingSession> {
        self.inner.lock().unwrap().delete(shipment_id)
    }

    /// Remove the running session, or cancel a start still in progress.
    ///
    /// Both checks happen under one lock, so a start either registered
    /// before this call and is returned, or sees the cancellation when it
    /// tries to register.
    pub fn take_for_stop(&self, shipment_id: &ShipmentId) -> StopTarget {
        let mut inner = self.inner.lock().unwrap();
        if let Some(session) = inner.delete(shipment_id) {
            return StopTarget::Session(session);
        }

        match inner.starting.get_mut(shipment_id) {
            Some(pending) => {
                pending.cancelled = true;
                StopTarget::Starting(StartRelease {
                    released: pending.released.clone(),
                })
            }
            None => StopTarget::Idle,
        }
    }

    pub fn is_active(&self, shipment_id: &ShipmentId) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .sessions
            .get(shipment_id)
            .is_some_and(|session| session.is_active)
    }

    pub fn session_info(&self, shipment_id: &ShipmentId) -> Option<SessionInfo> {
        let inner = self.inner.lock().unwrap();
        inner.sessions.get(shipment_id).map(TrackingSession::info)
    }

    pub fn sessions(&self) -> Vec<SessionInfo> {
        let inner = self.inner.lock().unwrap();
        let mut sessions: Vec<SessionInfo> =
            inner.sessions.values().map(TrackingSession::info).collect();
        sessions.sort_by(|a, b| a.shipment_id.cmp(&b.shipment_id));
        sessions
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reserve a shipment for starting.
    ///
    /// Returns `None` if a session is registered or another start holds the
    /// claim. The claim is released when dropped.
    pub fn claim(self: &Arc<Self>, shipment_id: &ShipmentId) -> Option<StartClaim> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains_key(shipment_id) || inner.starting.contains_key(shipment_id) {
            return None;
        }

        let (released_tx, released) = watch::channel(());
        inner.starting.insert(
            shipment_id.clone(),
            PendingStart {
                cancelled: false,
                released,
            },
        );

        Some(StartClaim {
            registry: self.clone(),
            shipment_id: shipment_id.clone(),
            _released: released_tx,
        })
    }
}

/// Exclusive right to start a session for one shipment
#[derive(Debug)]
pub struct StartClaim {
    registry: Arc<SessionRegistry>,
    shipment_id: ShipmentId,
    /// Closes when the claim is dropped, waking a waiting stop
    _released: watch::Sender<()>,
}

impl StartClaim {
    /// Whether a stop has arrived since the claim was taken
    pub fn is_cancelled(&self) -> bool {
        self.registry.inner.lock().unwrap().is_cancelled(&self.shipment_id)
    }

    /// Register the started session unless a stop cancelled this start.
    /// A cancelled session is handed back for the caller to release; on
    /// success any session it overwrote is returned.
    pub fn register(&self, session: TrackingSession) -> Result<Option<TrackingSession>, TrackingSession> {
        let mut inner = self.registry.inner.lock().unwrap();
        if inner.is_cancelled(&self.shipment_id) {
            return Err(session);
        }

        Ok(inner.set(self.shipment_id.clone(), session))
    }
}

impl Drop for StartClaim {
    fn drop(&mut self) {
        let mut inner = self.registry.inner.lock().unwrap();
        inner.starting.remove(&self.shipment_id);
    }
}

/// Resolves once a cancelled start has unwound and released its claim
#[derive(Debug)]
pub struct StartRelease {
    released: watch::Receiver<()>,
}

impl StartRelease {
    pub async fn wait(mut self) {
        // Nothing is ever sent; changed() fails once the sender is dropped
        while self.released.changed().await.is_ok() {}
    }
}
