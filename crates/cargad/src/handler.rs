//! Command dispatch for IPC requests

use carga_api::{
    Command, ErrorCode, ErrorInfo, Response, ResponsePayload, RouteView, TrackingStatus,
};
use carga_core::{
    ChatService, ControllerOptions, SessionRegistry, StartOutcome, StopOutcome, TrackingController,
    points_distance_km,
};
use carga_geo_api::{LocationSampler, SamplerError};
use carga_store::{StoreError, TrackingStore};
use carga_util::{CargaError, ClientId, ShipmentId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

/// Stable error code for a sensor failure
pub fn sampler_error_code(error: &SamplerError) -> ErrorCode {
    match error {
        SamplerError::UnsupportedEnvironment(_) => ErrorCode::UnsupportedEnvironment,
        SamplerError::PermissionDenied => ErrorCode::PermissionDenied,
        SamplerError::PositionUnavailable(_) => ErrorCode::LocationUnavailable,
        SamplerError::Timeout => ErrorCode::Timeout,
    }
}

fn store_error(e: StoreError) -> ErrorInfo {
    match e {
        StoreError::NotFound(what) => ErrorInfo::new(ErrorCode::NotFound, what),
        other => ErrorInfo::new(ErrorCode::StoreError, other.to_string()),
    }
}

fn carga_error(e: CargaError) -> ErrorInfo {
    let code = match &e {
        CargaError::ValidationError(_) => ErrorCode::InvalidRequest,
        CargaError::StoreError(_) => ErrorCode::StoreError,
    };
    ErrorInfo::new(code, e.to_string())
}

/// Everything a request may touch
pub struct CommandHandler {
    sampler: Arc<dyn LocationSampler>,
    store: Arc<dyn TrackingStore>,
    registry: Arc<SessionRegistry>,
    chat: ChatService,
    options: ControllerOptions,
}

impl CommandHandler {
    pub fn new(
        sampler: Arc<dyn LocationSampler>,
        store: Arc<dyn TrackingStore>,
        registry: Arc<SessionRegistry>,
        options: ControllerOptions,
        max_message_length: usize,
    ) -> Self {
        let chat = ChatService::new(store.clone(), max_message_length);
        Self {
            sampler,
            store,
            registry,
            chat,
            options,
        }
    }

    fn controller(&self, shipment_id: ShipmentId, transporter_id: UserId) -> TrackingController {
        TrackingController::new(
            shipment_id,
            transporter_id,
            self.sampler.clone(),
            self.store.clone(),
            self.registry.clone(),
        )
        .with_options(self.options)
    }

    pub async fn handle(&self, client_id: &ClientId, request_id: u64, command: Command) -> Response {
        match self.dispatch(client_id, command).await {
            Ok(payload) => Response::success(request_id, payload),
            Err(error) => Response::error(request_id, error),
        }
    }

    async fn dispatch(&self, client_id: &ClientId, command: Command) -> Result<ResponsePayload, ErrorInfo> {
        match command {
            Command::StartTracking {
                shipment_id,
                transporter_id,
            } => {
                let controller = self.controller(shipment_id.clone(), transporter_id);
                match controller.start_tracking().await {
                    Ok(StartOutcome::Started(initial)) => Ok(ResponsePayload::TrackingStarted {
                        shipment_id,
                        initial,
                    }),
                    Ok(StartOutcome::AlreadyTracking) => {
                        Ok(ResponsePayload::AlreadyTracking { shipment_id })
                    }
                    Ok(StartOutcome::Cancelled) => {
                        Ok(ResponsePayload::TrackingCancelled { shipment_id })
                    }
                    Err(e) => Err(ErrorInfo::new(sampler_error_code(e.sampler_error()), e.to_string())),
                }
            }

            Command::StopTracking {
                shipment_id,
                transporter_id,
            } => {
                let controller = self.controller(shipment_id.clone(), transporter_id);
                match controller.stop_tracking().await {
                    StopOutcome::Stopped | StopOutcome::CancelledStart => {
                        Ok(ResponsePayload::TrackingStopped { shipment_id })
                    }
                    StopOutcome::NotTracking => Ok(ResponsePayload::NotTracking { shipment_id }),
                }
            }

            Command::GetCurrentLocation => self
                .sampler
                .current_location(self.options.one_shot)
                .await
                .map(ResponsePayload::Location)
                .map_err(|e| ErrorInfo::new(sampler_error_code(&e), e.to_string())),

            Command::GetTrackingStatus { shipment_id } => {
                let summary = self
                    .store
                    .get_tracking_summary(&shipment_id)
                    .await
                    .map_err(store_error)?;
                let session = self.registry.session_info(&shipment_id);

                Ok(ResponsePayload::Status(TrackingStatus {
                    is_tracking: session.is_some(),
                    shipment_id,
                    session,
                    summary,
                }))
            }

            Command::GetRoute { shipment_id } => {
                let points = self
                    .store
                    .list_tracking_points(&shipment_id)
                    .await
                    .map_err(store_error)?;
                let distance_km = points_distance_km(&points);

                Ok(ResponsePayload::Route(RouteView {
                    shipment_id,
                    points,
                    distance_km,
                }))
            }

            Command::ListActiveSessions => Ok(ResponsePayload::Sessions {
                sessions: self.registry.sessions(),
            }),

            Command::SendMessage {
                shipment_id,
                sender_id,
                content,
            } => self
                .chat
                .send(&shipment_id, &sender_id, &content)
                .await
                .map(|view| ResponsePayload::MessageSent(view.message))
                .map_err(carga_error),

            Command::GetMessages { shipment_id } => self
                .chat
                .history(&shipment_id)
                .await
                .map(|messages| ResponsePayload::Messages { messages })
                .map_err(carga_error),

            Command::UpsertProfile { profile } => {
                if profile.full_name.trim().is_empty() {
                    return Err(ErrorInfo::new(ErrorCode::InvalidRequest, "Profile name is empty"));
                }
                self.store
                    .upsert_profile(&profile)
                    .await
                    .map_err(store_error)?;
                Ok(ResponsePayload::ProfileSaved)
            }

            // Routing is tracked by the IPC layer; acknowledge here
            Command::Subscribe { channel } => Ok(ResponsePayload::Subscribed {
                client_id: client_id.clone(),
                channel,
            }),

            Command::Unsubscribe { channel } => Ok(ResponsePayload::Unsubscribed { channel }),

            Command::Ping => Ok(ResponsePayload::Pong),
        }
    }

    /// Stop every registered session. Used at shutdown.
    pub async fn stop_all(&self) {
        for info in self.registry.sessions() {
            info!(shipment_id = %info.shipment_id, "Stopping active session");
            let controller = self.controller(info.shipment_id, info.transporter_id);
            if controller.stop_tracking().await == StopOutcome::NotTracking {
                warn!(shipment_id = %controller.shipment_id(), "Session ended before shutdown reached it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carga_api::{Channel, Profile, ResponseResult, TrackingSample, UserRole};
    use carga_geo_api::MockSampler;
    use carga_store::SqliteStore;

    struct Fixture {
        sampler: Arc<MockSampler>,
        store: Arc<SqliteStore>,
        registry: Arc<SessionRegistry>,
        handler: CommandHandler,
    }

    fn fixture() -> Fixture {
        let sampler = Arc::new(MockSampler::with_fix(TrackingSample::new(14.6349, -90.5069)));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let registry = Arc::new(SessionRegistry::new());
        let handler = CommandHandler::new(
            sampler.clone(),
            store.clone(),
            registry.clone(),
            ControllerOptions::default(),
            2000,
        );
        Fixture {
            sampler,
            store,
            registry,
            handler,
        }
    }

    async fn send(handler: &CommandHandler, command: Command) -> ResponseResult {
        handler.handle(&ClientId::new(), 1, command).await.result
    }

    fn start(shipment: &str) -> Command {
        Command::StartTracking {
            shipment_id: ShipmentId::new(shipment),
            transporter_id: UserId::new("t-1"),
        }
    }

    fn stop(shipment: &str) -> Command {
        Command::StopTracking {
            shipment_id: ShipmentId::new(shipment),
            transporter_id: UserId::new("t-1"),
        }
    }

    #[tokio::test]
    async fn start_status_stop() {
        let fx = fixture();

        let result = send(&fx.handler, start("S1")).await;
        assert!(matches!(result, ResponseResult::Ok(ResponsePayload::TrackingStarted { .. })));

        let result = send(&fx.handler, start("S1")).await;
        assert!(matches!(result, ResponseResult::Ok(ResponsePayload::AlreadyTracking { .. })));
        assert_eq!(fx.sampler.watch_count(), 1);

        let result = send(
            &fx.handler,
            Command::GetTrackingStatus {
                shipment_id: ShipmentId::new("S1"),
            },
        )
        .await;
        let ResponseResult::Ok(ResponsePayload::Status(status)) = result else {
            panic!("expected status, got {:?}", result);
        };
        assert!(status.is_tracking);
        assert!(status.summary.unwrap().tracking_enabled);

        let result = send(&fx.handler, stop("S1")).await;
        assert!(matches!(result, ResponseResult::Ok(ResponsePayload::TrackingStopped { .. })));

        let result = send(&fx.handler, stop("S1")).await;
        assert!(matches!(result, ResponseResult::Ok(ResponsePayload::NotTracking { .. })));
        assert!(fx.registry.is_empty());
    }

    #[tokio::test]
    async fn stop_racing_a_slow_start_wins() {
        let fx = fixture();
        let id = ShipmentId::new("S1");
        fx.sampler
            .set_current_delay(Some(std::time::Duration::from_millis(200)));

        let (started, stopped) = tokio::join!(send(&fx.handler, start("S1")), async {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            send(&fx.handler, stop("S1")).await
        });

        assert!(matches!(started, ResponseResult::Ok(ResponsePayload::TrackingCancelled { .. })));
        assert!(matches!(stopped, ResponseResult::Ok(ResponsePayload::TrackingStopped { .. })));
        assert!(fx.registry.is_empty());

        fx.sampler.push_sample(TrackingSample::new(14.5577, -90.7342));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(fx.store.list_tracking_points(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn start_failure_maps_error_code() {
        let fx = fixture();
        fx.sampler.set_fail_current(Some(SamplerError::PermissionDenied));

        let result = send(&fx.handler, start("S1")).await;
        let ResponseResult::Err(error) = result else {
            panic!("expected error");
        };
        assert_eq!(error.code, ErrorCode::PermissionDenied);
    }

    #[tokio::test]
    async fn route_reports_distance() {
        let fx = fixture();
        send(&fx.handler, start("S1")).await;
        fx.sampler.push_sample(TrackingSample::new(14.5577, -90.7342));

        for _ in 0..100 {
            if fx.store.list_tracking_points(&ShipmentId::new("S1")).await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        send(&fx.handler, stop("S1")).await;

        let result = send(
            &fx.handler,
            Command::GetRoute {
                shipment_id: ShipmentId::new("S1"),
            },
        )
        .await;
        let ResponseResult::Ok(ResponsePayload::Route(route)) = result else {
            panic!("expected route");
        };
        assert_eq!(route.points.len(), 2);
        assert!((route.distance_km - 25.92).abs() < 0.26);
    }

    #[tokio::test]
    async fn blank_message_is_invalid() {
        let fx = fixture();
        let result = send(
            &fx.handler,
            Command::SendMessage {
                shipment_id: ShipmentId::new("S1"),
                sender_id: UserId::new("u-1"),
                content: "   ".into(),
            },
        )
        .await;

        let ResponseResult::Err(error) = result else {
            panic!("expected error");
        };
        assert_eq!(error.code, ErrorCode::InvalidRequest);
    }

    #[tokio::test]
    async fn messages_carry_sender_names() {
        let fx = fixture();
        let profile = Profile {
            user_id: UserId::new("c-1"),
            full_name: "Distribuidora Maya".into(),
            phone: None,
            role: UserRole::Client {
                company_name: Some("Maya S.A.".into()),
            },
        };
        let result = send(&fx.handler, Command::UpsertProfile { profile }).await;
        assert!(matches!(result, ResponseResult::Ok(ResponsePayload::ProfileSaved)));

        send(
            &fx.handler,
            Command::SendMessage {
                shipment_id: ShipmentId::new("S1"),
                sender_id: UserId::new("c-1"),
                content: "Buenos días".into(),
            },
        )
        .await;

        let result = send(
            &fx.handler,
            Command::GetMessages {
                shipment_id: ShipmentId::new("S1"),
            },
        )
        .await;
        let ResponseResult::Ok(ResponsePayload::Messages { messages }) = result else {
            panic!("expected messages");
        };
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_name, "Distribuidora Maya");
    }

    #[tokio::test]
    async fn subscribe_is_acknowledged() {
        let fx = fixture();
        let client_id = ClientId::new();
        let channel = Channel::Chat(ShipmentId::new("S1"));

        let response = fx
            .handler
            .handle(&client_id, 4, Command::Subscribe { channel: channel.clone() })
            .await;
        assert_eq!(response.request_id, 4);
        let ResponseResult::Ok(ResponsePayload::Subscribed {
            client_id: acked,
            channel: acked_channel,
        }) = response.result
        else {
            panic!("expected subscribed");
        };
        assert_eq!(acked, client_id);
        assert_eq!(acked_channel, channel);
    }

    #[tokio::test]
    async fn stop_all_clears_registry() {
        let fx = fixture();
        send(&fx.handler, start("S1")).await;
        send(&fx.handler, start("S2")).await;
        assert_eq!(fx.registry.len(), 2);

        fx.handler.stop_all().await;

        assert!(fx.registry.is_empty());
        assert_eq!(fx.sampler.active_watches(), 0);
    }

    #[test]
    fn sampler_codes() {
        assert_eq!(sampler_error_code(&SamplerError::Timeout), ErrorCode::Timeout);
        assert_eq!(
            sampler_error_code(&SamplerError::PositionUnavailable("no fix".into())),
            ErrorCode::LocationUnavailable
        );
        assert_eq!(
            sampler_error_code(&SamplerError::UnsupportedEnvironment("none".into())),
            ErrorCode::UnsupportedEnvironment
        );
    }
}
