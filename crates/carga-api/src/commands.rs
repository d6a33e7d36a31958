//! Command types for the cargad protocol

use carga_util::{ClientId, ShipmentId, UserId};
use serde::{Deserialize, Serialize};

use crate::{
    API_VERSION, Channel, ChatMessage, ChatMessageView, Profile, RouteView, SessionInfo,
    TrackingSample, TrackingStatus,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// Corresponding request ID
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.result, ResponseResult::Ok(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    /// The sampler could not produce a fix
    LocationUnavailable,
    /// Location permission was refused by the platform
    PermissionDenied,
    /// No location provider exists on this host
    UnsupportedEnvironment,
    Timeout,
    NotFound,
    RateLimited,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Begin continuous tracking of a shipment on this device
    StartTracking {
        shipment_id: ShipmentId,
        transporter_id: UserId,
    },

    /// End tracking of a shipment
    StopTracking {
        shipment_id: ShipmentId,
        transporter_id: UserId,
    },

    /// One-shot position read, nothing is persisted
    GetCurrentLocation,

    GetTrackingStatus { shipment_id: ShipmentId },

    /// Ordered tracking history plus cumulative distance
    GetRoute { shipment_id: ShipmentId },

    ListActiveSessions,

    SendMessage {
        shipment_id: ShipmentId,
        sender_id: UserId,
        content: String,
    },

    GetMessages { shipment_id: ShipmentId },

    UpsertProfile { profile: Profile },

    /// Subscribe to a realtime channel (events stream separately)
    Subscribe { channel: Channel },

    Unsubscribe { channel: Channel },

    /// Ping for keepalive
    Ping,
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    TrackingStarted {
        shipment_id: ShipmentId,
        initial: TrackingSample,
    },
    AlreadyTracking {
        shipment_id: ShipmentId,
    },
    /// A stop arrived before the start finished
    TrackingCancelled {
        shipment_id: ShipmentId,
    },
    TrackingStopped {
        shipment_id: ShipmentId,
    },
    NotTracking {
        shipment_id: ShipmentId,
    },
    Location(TrackingSample),
    Status(TrackingStatus),
    Route(RouteView),
    Sessions {
        sessions: Vec<SessionInfo>,
    },
    MessageSent(ChatMessage),
    Messages {
        messages: Vec<ChatMessageView>,
    },
    ProfileSaved,
    Subscribed {
        client_id: ClientId,
        channel: Channel,
    },
    Unsubscribed {
        channel: Channel,
    },
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new() -> Self {
        Self {
            client_id: ClientId::new(),
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new()
    }
}
