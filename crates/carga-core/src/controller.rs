//! GPS tracking controller
//!
//! A controller is a per-view handle on one shipment's tracking. Sessions
//! live in the [`SessionRegistry`], not in the controller: dropping a
//! controller leaves its session running, and a new controller for the same
//! shipment attaches to the running session's live state.

use carga_api::TrackingSample;
use carga_geo_api::{LocationSampler, PositionOptions, SamplerError, WatchEvent, WatchHandle};
use carga_store::{NewTrackingPoint, TrackingStore};
use carga_util::{ShipmentId, UserId};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::{SessionRegistry, SharedState, StopTarget, TrackingSession, TrackingState};

/// Called with every sample the watch delivers
pub type LocationCallback = Arc<dyn Fn(&TrackingSample) + Send + Sync>;

/// Tracking errors surfaced to the caller
#[derive(Debug, Error)]
pub enum TrackingError {
    /// The one-shot read failed; nothing was started
    #[error("Could not get the current location: {0}")]
    Location(SamplerError),

    /// The continuous watch could not be opened; the start was rolled back
    #[error("Could not start location updates: {0}")]
    Watch(SamplerError),
}

impl TrackingError {
    pub fn sampler_error(&self) -> &SamplerError {
        match self {
            TrackingError::Location(e) | TrackingError::Watch(e) => e,
        }
    }
}

/// Result of [`TrackingController::start_tracking`]
#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    /// A new session began at this fix
    Started(TrackingSample),
    /// A session already exists; nothing was changed
    AlreadyTracking,
    /// A stop arrived while the start was in progress; nothing is left running
    Cancelled,
}

/// Result of [`TrackingController::stop_tracking`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    /// A start in progress was abandoned before it registered
    CancelledStart,
    NotTracking,
}

/// Sampler options used by a controller
#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub one_shot: PositionOptions,
    pub watch: PositionOptions,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            one_shot: PositionOptions::one_shot(),
            watch: PositionOptions::continuous(),
        }
    }
}

pub struct TrackingController {
    shipment_id: ShipmentId,
    transporter_id: UserId,
    sampler: Arc<dyn LocationSampler>,
    store: Arc<dyn TrackingStore>,
    registry: Arc<SessionRegistry>,
    options: ControllerOptions,
    state: SharedState,
    /// Handle of a watch this controller opened
    local_handle: Mutex<Option<WatchHandle>>,
    on_location_update: Option<LocationCallback>,
}

impl TrackingController {
    pub fn new(
        shipment_id: ShipmentId,
        transporter_id: UserId,
        sampler: Arc<dyn LocationSampler>,
        store: Arc<dyn TrackingStore>,
        registry: Arc<SessionRegistry>,
    ) -> Self {
        let state = match registry.get(&shipment_id) {
            Some(session) => {
                debug!(shipment_id = %shipment_id, "Attaching to running session");
                session.state
            }
            None => SharedState::default(),
        };

        Self {
            shipment_id,
            transporter_id,
            sampler,
            store,
            registry,
            options: ControllerOptions::default(),
            state,
            local_handle: Mutex::new(None),
            on_location_update: None,
        }
    }

    pub fn with_options(mut self, options: ControllerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn on_location_update(mut self, callback: LocationCallback) -> Self {
        self.on_location_update = Some(callback);
        self
    }

    pub fn shipment_id(&self) -> &ShipmentId {
        &self.shipment_id
    }

    pub fn current_location(&self) -> Option<TrackingSample> {
        self.state.lock().unwrap().current_location
    }

    pub fn is_getting_location(&self) -> bool {
        self.state.lock().unwrap().is_getting_location
    }

    pub fn error(&self) -> Option<String> {
        self.state.lock().unwrap().error.clone()
    }

    pub fn state(&self) -> TrackingState {
        self.state.lock().unwrap().clone()
    }

    /// Whether a session for this shipment is running anywhere in the process
    pub fn is_tracking(&self) -> bool {
        self.registry.is_active(&self.shipment_id)
    }

    /// One-shot read that updates the live state. Nothing is persisted.
    pub async fn get_current_location(&self) -> Result<TrackingSample, TrackingError> {
        self.read_location().await.map_err(TrackingError::Location)
    }

    async fn read_location(&self) -> Result<TrackingSample, SamplerError> {
        self.state.lock().unwrap().is_getting_location = true;

        let result = self.sampler.current_location(self.options.one_shot).await;

        let mut state = self.state.lock().unwrap();
        state.is_getting_location = false;
        match &result {
            Ok(sample) => {
                state.current_location = Some(*sample);
                state.error = None;
            }
            Err(e) => state.error = Some(e.to_string()),
        }
        result
    }

    /// Begin tracking this shipment.
    ///
    /// The initial fix must succeed. Persistence failures after that are
    /// logged and do not prevent the session from starting.
    pub async fn start_tracking(&self) -> Result<StartOutcome, TrackingError> {
        let Some(claim) = self.registry.claim(&self.shipment_id) else {
            debug!(shipment_id = %self.shipment_id, "Tracking already active");
            return Ok(StartOutcome::AlreadyTracking);
        };

        let initial = self.read_location().await.map_err(|e| {
            warn!(shipment_id = %self.shipment_id, error = %e, "Initial fix failed, tracking not started");
            TrackingError::Location(e)
        })?;

        if claim.is_cancelled() {
            info!(shipment_id = %self.shipment_id, "Stopped during initial fix, tracking not started");
            return Ok(StartOutcome::Cancelled);
        }

        let now = carga_util::now();
        let first_point =
            NewTrackingPoint::new(self.shipment_id.clone(), self.transporter_id.clone(), initial)
                .at(now);
        if let Err(e) = self.store.insert_tracking_point(first_point).await {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to save initial tracking point");
        }
        if let Err(e) = self.store.enable_tracking(&self.shipment_id, &initial, now).await {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to enable tracking on shipment");
        }
        if let Err(e) = self
            .store
            .open_tracking_session(&self.shipment_id, &self.transporter_id)
            .await
        {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to open tracking session record");
        }

        let watch = match self.sampler.watch(self.options.watch).await {
            Ok(watch) => watch,
            Err(e) => {
                warn!(shipment_id = %self.shipment_id, error = %e, "Failed to start location watch");
                self.state.lock().unwrap().error = Some(e.to_string());
                self.close_records(&self.transporter_id).await;
                return Err(TrackingError::Watch(e));
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let pump = Pump {
            shipment_id: self.shipment_id.clone(),
            transporter_id: self.transporter_id.clone(),
            store: self.store.clone(),
            state: self.state.clone(),
            on_location_update: self.on_location_update.clone(),
        };
        let pump = tokio::spawn(pump.run(watch.events, stop_rx));

        let session = TrackingSession::new(
            self.shipment_id.clone(),
            self.transporter_id.clone(),
            watch.handle.clone(),
            self.state.clone(),
        )
        .with_pump(stop_tx, pump);

        // The claim stays held until cleanup finishes, so the stop that
        // cancelled us returns only after these writes
        match claim.register(session) {
            Ok(replaced) => {
                *self.local_handle.lock().unwrap() = Some(watch.handle.clone());
                if let Some(replaced) = replaced {
                    // A direct set() raced this start
                    self.sampler.unwatch(&replaced.watch_handle);
                    replaced.shutdown().await;
                }
            }
            Err(session) => {
                self.sampler.unwatch(&session.watch_handle);
                session.shutdown().await;
                self.close_records(&self.transporter_id).await;
                info!(shipment_id = %self.shipment_id, "Stopped while starting, tracking released");
                return Ok(StartOutcome::Cancelled);
            }
        }

        info!(
            shipment_id = %self.shipment_id,
            transporter_id = %self.transporter_id,
            watch = %watch.handle,
            "Tracking started"
        );
        Ok(StartOutcome::Started(initial))
    }

    /// End tracking for this shipment, whoever started it.
    ///
    /// When this returns, the session's pump has exited and no further rows
    /// will be written for it. A start still in progress is cancelled and
    /// waited for.
    pub async fn stop_tracking(&self) -> StopOutcome {
        let session = match self.registry.take_for_stop(&self.shipment_id) {
            StopTarget::Session(session) => session,
            StopTarget::Starting(release) => {
                debug!(shipment_id = %self.shipment_id, "Stop requested during start, waiting for it to unwind");
                release.wait().await;
                info!(shipment_id = %self.shipment_id, "Pending start cancelled");
                return StopOutcome::CancelledStart;
            }
            StopTarget::Idle => {
                debug!(shipment_id = %self.shipment_id, "Stop requested with no active session");
                return StopOutcome::NotTracking;
            }
        };

        self.sampler.unwatch(&session.watch_handle);
        self.local_handle.lock().unwrap().take();

        let transporter_id = session.transporter_id.clone();
        let started_at = session.started_at;
        session.shutdown().await;

        self.close_records(&transporter_id).await;

        let elapsed = (carga_util::now() - started_at).to_std().unwrap_or_default();
        info!(
            shipment_id = %self.shipment_id,
            duration = %carga_util::format_duration(elapsed),
            "Tracking stopped"
        );
        StopOutcome::Stopped
    }

    async fn close_records(&self, transporter_id: &UserId) {
        if let Err(e) = self
            .store
            .close_tracking_session(&self.shipment_id, transporter_id)
            .await
        {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to close tracking session record");
        }
        if let Err(e) = self.store.disable_tracking(&self.shipment_id).await {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to disable tracking on shipment");
        }
    }
}

impl Drop for TrackingController {
    fn drop(&mut self) {
        let Some(handle) = self.local_handle.lock().unwrap().take() else {
            return;
        };

        let still_registered = self
            .registry
            .get(&self.shipment_id)
            .is_some_and(|session| session.is_active && session.watch_handle == handle);

        if !still_registered {
            self.sampler.unwatch(&handle);
        }
    }
}

/// Drains one session's watch into the live state and the store
struct Pump {
    shipment_id: ShipmentId,
    transporter_id: UserId,
    store: Arc<dyn TrackingStore>,
    state: SharedState,
    on_location_update: Option<LocationCallback>,
}

impl Pump {
    async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                _ = &mut stop_rx => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                WatchEvent::Sample(sample) => self.handle_sample(sample).await,
                WatchEvent::Error(e) => {
                    warn!(shipment_id = %self.shipment_id, error = %e, "Location watch error");
                    self.state.lock().unwrap().error = Some(e.to_string());
                }
            }
        }

        debug!(shipment_id = %self.shipment_id, "Tracking pump exited");
    }

    /// Writes are awaited in order, so the summary never moves backwards
    async fn handle_sample(&self, sample: TrackingSample) {
        {
            let mut state = self.state.lock().unwrap();
            state.current_location = Some(sample);
            state.samples_seen += 1;
        }

        if let Some(callback) = &self.on_location_update {
            callback(&sample);
        }

        let now = carga_util::now();
        let point =
            NewTrackingPoint::new(self.shipment_id.clone(), self.transporter_id.clone(), sample).at(now);
        if let Err(e) = self.store.insert_tracking_point(point).await {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to save tracking point");
        }

        if let Err(e) = self
            .store
            .update_current_location(&self.shipment_id, &sample, now)
            .await
        {
            warn!(shipment_id = %self.shipment_id, error = %e, "Failed to update current location");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carga_geo_api::MockSampler;
    use carga_store::SqliteStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixture {
        sampler: Arc<MockSampler>,
        store: Arc<SqliteStore>,
        registry: Arc<SessionRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                sampler: Arc::new(MockSampler::with_fix(TrackingSample::new(14.6349, -90.5069))),
                store: Arc::new(SqliteStore::in_memory().unwrap()),
                registry: Arc::new(SessionRegistry::new()),
            }
        }

        fn controller(&self, shipment: &str) -> TrackingController {
            TrackingController::new(
                ShipmentId::new(shipment),
                UserId::new("t-1"),
                self.sampler.clone(),
                self.store.clone(),
                self.registry.clone(),
            )
        }
    }

    /// Poll until the condition holds or a second passes
    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not met in time");
    }

    #[tokio::test]
    async fn start_registers_one_watch() {
        let fx = Fixture::new();
        let controller = fx.controller("S1");

        let outcome = controller.start_tracking().await.unwrap();
        assert_eq!(
            outcome,
            StartOutcome::Started(TrackingSample::new(14.6349, -90.5069))
        );
        assert!(controller.is_tracking());
        assert_eq!(fx.sampler.watch_count(), 1);
        assert_eq!(controller.current_location().unwrap().latitude, 14.6349);
        assert!(!controller.is_getting_location());

        controller.stop_tracking().await;
    }

    #[tokio::test]
    async fn second_start_is_a_no_op() {
        let fx = Fixture::new();
        let controller = fx.controller("S1");

        controller.start_tracking().await.unwrap();
        let again = controller.start_tracking().await.unwrap();

        assert_eq!(again, StartOutcome::AlreadyTracking);
        assert_eq!(fx.sampler.watch_count(), 1);
        assert_eq!(fx.registry.len(), 1);

        controller.stop_tracking().await;
    }

    #[tokio::test]
    async fn concurrent_starts_open_one_watch() {
        let fx = Fixture::new();
        let a = fx.controller("S1");
        let b = fx.controller("S1");

        let (ra, rb) = tokio::join!(a.start_tracking(), b.start_tracking());
        let outcomes = [ra.unwrap(), rb.unwrap()];

        assert_eq!(
            outcomes
                .iter()
                .filter(|o| matches!(o, StartOutcome::Started(_)))
                .count(),
            1
        );
        assert_eq!(fx.sampler.watch_count(), 1);

        a.stop_tracking().await;
    }

    #[tokio::test]
    async fn stop_without_session_is_a_no_op() {
        let fx = Fixture::new();
        let controller = fx.controller("S1");

        assert_eq!(controller.stop_tracking().await, StopOutcome::NotTracking);
        assert_eq!(fx.sampler.unwatch_count(), 0);
        assert!(
            fx.store
                .get_tracking_summary(&ShipmentId::new("S1"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn permission_denied_leaves_nothing_behind() {
        let fx = Fixture::new();
        fx.sampler.set_fail_current(Some(SamplerError::PermissionDenied));
        let controller = fx.controller("S1");

        let err = controller.start_tracking().await.unwrap_err();
        assert_eq!(err.sampler_error(), &SamplerError::PermissionDenied);

        assert!(fx.registry.get(&ShipmentId::new("S1")).is_none());
        assert_eq!(fx.sampler.watch_count(), 0);
        assert!(controller.error().is_some());
        assert!(!controller.is_getting_location());
        assert!(
            fx.store
                .list_tracking_points(&ShipmentId::new("S1"))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn start_persists_summary_row_and_session() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        let controller = fx.controller("S1");

        controller.start_tracking().await.unwrap();

        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert!(summary.tracking_enabled);
        assert!(summary.tracking_started_at.is_some());
        assert_eq!(fx.store.list_tracking_points(&id).await.unwrap().len(), 1);

        let records = fx.store.list_tracking_sessions(&id).await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].is_active);

        controller.stop_tracking().await;

        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert!(!summary.tracking_enabled);
        let records = fx.store.list_tracking_sessions(&id).await.unwrap();
        assert!(!records[0].is_active);
    }

    #[tokio::test]
    async fn samples_are_persisted_and_reported() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_by_callback = seen.clone();

        let controller = fx.controller("S1").on_location_update(Arc::new(move |_| {
            seen_by_callback.fetch_add(1, Ordering::SeqCst);
        }));
        controller.start_tracking().await.unwrap();

        fx.sampler.push_sample(TrackingSample::new(14.60, -90.55));
        fx.sampler.push_sample(TrackingSample::new(14.58, -90.65));

        eventually(|| seen.load(Ordering::SeqCst) == 2).await;
        controller.stop_tracking().await;

        let points = fx.store.list_tracking_points(&id).await.unwrap();
        assert_eq!(points.len(), 3);
        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert_eq!(summary.current_latitude, Some(14.58));
        assert_eq!(controller.current_location().unwrap().longitude, -90.65);
    }

    #[tokio::test]
    async fn sample_row_and_summary_share_one_timestamp() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        let controller = fx.controller("S1");
        controller.start_tracking().await.unwrap();

        let points = fx.store.list_tracking_points(&id).await.unwrap();
        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert_eq!(summary.last_location_update, Some(points[0].recorded_at));

        fx.sampler.push_sample(TrackingSample::new(14.60, -90.55));
        eventually(|| controller.state().samples_seen == 1).await;
        controller.stop_tracking().await;

        let points = fx.store.list_tracking_points(&id).await.unwrap();
        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(summary.last_location_update, Some(points[1].recorded_at));
    }

    #[tokio::test]
    async fn no_rows_after_stop_returns() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        let controller = fx.controller("S1");

        controller.start_tracking().await.unwrap();
        fx.sampler.push_sample(TrackingSample::new(14.60, -90.55));
        controller.stop_tracking().await;

        let after_stop = fx.store.list_tracking_points(&id).await.unwrap().len();

        // The sampler keeps pushing; nothing is listening any more
        assert_eq!(fx.sampler.push_sample(TrackingSample::new(14.50, -90.70)), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(fx.store.list_tracking_points(&id).await.unwrap().len(), after_stop);
        assert_eq!(fx.sampler.active_watches(), 0);
    }

    #[tokio::test]
    async fn stop_during_initial_fix_cancels_start() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        fx.sampler.set_current_delay(Some(Duration::from_millis(200)));
        let starter = fx.controller("S1");
        let stopper = fx.controller("S1");

        let (started, stopped) = tokio::join!(starter.start_tracking(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            stopper.stop_tracking().await
        });

        assert_eq!(started.unwrap(), StartOutcome::Cancelled);
        assert_eq!(stopped, StopOutcome::CancelledStart);

        assert!(fx.registry.is_empty());
        assert!(!starter.is_tracking());
        assert_eq!(fx.sampler.watch_count(), 0);
        assert!(fx.store.list_tracking_points(&id).await.unwrap().is_empty());

        // A later fix reaches nobody and writes nothing
        assert_eq!(fx.sampler.push_sample(TrackingSample::new(14.50, -90.70)), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fx.store.list_tracking_points(&id).await.unwrap().is_empty());
        assert!(fx.store.get_tracking_summary(&id).await.unwrap().is_none());

        // The shipment can be tracked again
        fx.sampler.set_current_delay(None);
        assert!(matches!(
            starter.start_tracking().await.unwrap(),
            StartOutcome::Started(_)
        ));
        assert_eq!(starter.stop_tracking().await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn stop_while_watch_opens_releases_it() {
        let fx = Fixture::new();
        let id = ShipmentId::new("S1");
        fx.sampler.set_watch_delay(Some(Duration::from_millis(200)));
        let starter = fx.controller("S1");
        let stopper = fx.controller("S1");

        let (started, stopped) = tokio::join!(starter.start_tracking(), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.stop_tracking().await
        });

        assert_eq!(started.unwrap(), StartOutcome::Cancelled);
        assert_eq!(stopped, StopOutcome::CancelledStart);

        // The watch opened after the stop arrived and was released before it returned
        assert_eq!(fx.sampler.watch_count(), 1);
        assert_eq!(fx.sampler.unwatch_count(), 1);
        assert_eq!(fx.sampler.active_watches(), 0);
        assert!(fx.registry.is_empty());

        let rows = fx.store.list_tracking_points(&id).await.unwrap().len();
        assert_eq!(rows, 1);
        let summary = fx.store.get_tracking_summary(&id).await.unwrap().unwrap();
        assert!(!summary.tracking_enabled);
        let records = fx.store.list_tracking_sessions(&id).await.unwrap();
        assert!(records.iter().all(|r| !r.is_active));

        assert_eq!(fx.sampler.push_sample(TrackingSample::new(14.50, -90.70)), 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.store.list_tracking_points(&id).await.unwrap().len(), rows);
    }

    #[tokio::test]
    async fn watch_error_keeps_session() {
        let fx = Fixture::new();
        let controller = fx.controller("S1");
        controller.start_tracking().await.unwrap();

        fx.sampler.push_error(SamplerError::Timeout);
        eventually(|| controller.error().is_some()).await;

        assert!(controller.is_tracking());
        assert_eq!(fx.sampler.active_watches(), 1);

        // Samples keep flowing after the error
        fx.sampler.push_sample(TrackingSample::new(14.61, -90.52));
        eventually(|| controller.state().samples_seen == 1).await;

        controller.stop_tracking().await;
    }

    #[tokio::test]
    async fn session_survives_controller_drop() {
        let fx = Fixture::new();

        {
            let controller = fx.controller("S1");
            controller.start_tracking().await.unwrap();
        }

        assert_eq!(fx.sampler.unwatch_count(), 0);
        assert_eq!(fx.sampler.active_watches(), 1);

        let remounted = fx.controller("S1");
        assert!(remounted.is_tracking());
        assert_eq!(remounted.current_location().unwrap().latitude, 14.6349);

        fx.sampler.push_sample(TrackingSample::new(14.59, -90.60));
        eventually(|| remounted.current_location().map(|s| s.latitude) == Some(14.59)).await;

        assert_eq!(remounted.stop_tracking().await, StopOutcome::Stopped);
        assert!(!remounted.is_tracking());
        assert_eq!(fx.sampler.unwatch_count(), 1);
    }

    #[tokio::test]
    async fn drop_after_foreign_stop_releases_stale_handle() {
        let fx = Fixture::new();
        let owner = fx.controller("S1");
        owner.start_tracking().await.unwrap();

        fx.controller("S1").stop_tracking().await;
        assert_eq!(fx.sampler.unwatch_count(), 1);

        drop(owner);
        // Repeat release is harmless and idempotent
        assert_eq!(fx.sampler.unwatch_count(), 2);
        assert_eq!(fx.sampler.active_watches(), 0);
    }

    #[tokio::test]
    async fn store_failures_do_not_block_start() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carga.db");
        let store = Arc::new(SqliteStore::open(&path).unwrap());

        let raw = rusqlite::Connection::open(&path).unwrap();
        raw.execute_batch(
            "DROP TABLE shipment_tracking; DROP TABLE shipments; DROP TABLE tracking_sessions;",
        )
        .unwrap();

        let sampler = Arc::new(MockSampler::with_fix(TrackingSample::new(14.6, -90.5)));
        let registry = Arc::new(SessionRegistry::new());
        let controller = TrackingController::new(
            ShipmentId::new("S1"),
            UserId::new("t-1"),
            sampler.clone(),
            store,
            registry.clone(),
        );

        let outcome = controller.start_tracking().await.unwrap();
        assert!(matches!(outcome, StartOutcome::Started(_)));
        assert!(registry.is_active(&ShipmentId::new("S1")));

        // Sample writes fail too, the session keeps going
        sampler.push_sample(TrackingSample::new(14.61, -90.51));
        eventually(|| controller.state().samples_seen == 1).await;

        assert_eq!(controller.stop_tracking().await, StopOutcome::Stopped);
    }

    #[tokio::test]
    async fn watch_failure_rolls_back() {
        let fx = Fixture::new();
        fx.sampler.set_fail_watch(Some(SamplerError::UnsupportedEnvironment("test".into())));
        let controller = fx.controller("S1");

        let err = controller.start_tracking().await.unwrap_err();
        assert!(matches!(err, TrackingError::Watch(_)));
        assert!(!controller.is_tracking());

        let summary = fx
            .store
            .get_tracking_summary(&ShipmentId::new("S1"))
            .await
            .unwrap()
            .unwrap();
        assert!(!summary.tracking_enabled);
    }

    #[tokio::test]
    async fn get_current_location_updates_state() {
        let fx = Fixture::new();
        let controller = fx.controller("S1");

        let sample = controller.get_current_location().await.unwrap();
        assert_eq!(controller.current_location(), Some(sample));
        assert!(controller.error().is_none());

        fx.sampler.queue_result(Err(SamplerError::Timeout));
        assert!(controller.get_current_location().await.is_err());
        assert_eq!(controller.error(), Some(SamplerError::Timeout.to_string()));
        assert!(!controller.is_getting_location());

        // Nothing persisted by one-shot reads
        assert!(
            fx.store
                .list_tracking_points(&ShipmentId::new("S1"))
                .await
                .unwrap()
                .is_empty()
        );
    }
}
