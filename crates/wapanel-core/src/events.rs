//! Realtime events pushed by the backend and the bulk progress snapshot.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Phase reported by a bulk send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkStatus {
    Processing,
    Waiting,
    Completed,
    #[serde(other)]
    Other,
}

/// Server-pushed progress of a bulk send. Each new event replaces the last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkProgress {
    #[serde(default)]
    pub current: u64,
    #[serde(default)]
    pub total: u64,
    pub status: BulkStatus,
    #[serde(default)]
    pub batch: Option<u32>,
    #[serde(default)]
    pub total_batches: Option<u32>,
    /// Pause between batches, in minutes.
    #[serde(default)]
    pub wait_minutes: Option<f64>,
}

impl BulkProgress {
    /// Countdown length in whole seconds for a waiting snapshot.
    pub fn wait_secs(&self) -> Option<u64> {
        self.wait_minutes
            .filter(|m| m.is_finite() && *m > 0.0)
            .map(|m| (m * 60.0).round() as u64)
    }
}

/// Why the realtime transport went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the namespace on purpose; no automatic reconnect.
    ServerClosed,
    /// The connection dropped or timed out.
    Transport(String),
    /// The endpoint moved and the connection was replaced.
    EndpointChanged,
    /// The local side shut the channel down.
    ClientClosed,
}

impl DisconnectReason {
    pub fn as_str(&self) -> &str {
        match self {
            Self::ServerClosed => "io server disconnect",
            Self::Transport(_) => "transport error",
            Self::EndpointChanged => "endpoint changed",
            Self::ClientClosed => "io client disconnect",
        }
    }
}

/// Event received over the realtime channel.
#[derive(Debug, Clone, PartialEq)]
pub enum RealtimeEvent {
    /// `connect`
    Connected,
    /// `connect_error`
    ConnectError(String),
    /// `disconnect`
    Disconnected(DisconnectReason),
    Status(Value),
    Qr(Value),
    Ready(Value),
    Authenticated(Value),
    /// `disconnected`: a WhatsApp session lost its phone link.
    SessionDisconnected(Value),
    PhoneLimitExceeded(Value),
    MessageLog(Value),
    LimitExceeded(Value),
    BulkProgress(BulkProgress),
    GroupProgress(Value),
    SessionCreated(Value),
    SessionUpdated(Value),
    SessionDestroyed(Value),
    /// Anything this client has no typed mapping for.
    Other { name: String, data: Value },
}

impl RealtimeEvent {
    /// Map a wire event name and payload to a typed event.
    pub fn from_wire(name: &str, data: Value) -> Self {
        match name {
            "status" => Self::Status(data),
            "qr" => Self::Qr(data),
            "ready" => Self::Ready(data),
            "authenticated" => Self::Authenticated(data),
            "disconnected" => Self::SessionDisconnected(data),
            "phone_limit_exceeded" => Self::PhoneLimitExceeded(data),
            "message_log" => Self::MessageLog(data),
            "limit_exceeded" => Self::LimitExceeded(data),
            "bulk_progress" => match serde_json::from_value::<BulkProgress>(data.clone()) {
                Ok(progress) => Self::BulkProgress(progress),
                Err(_) => Self::Other {
                    name: name.to_string(),
                    data,
                },
            },
            "group_progress" => Self::GroupProgress(data),
            "session_created" => Self::SessionCreated(data),
            "session_updated" => Self::SessionUpdated(data),
            "session_destroyed" => Self::SessionDestroyed(data),
            _ => Self::Other {
                name: name.to_string(),
                data,
            },
        }
    }

    /// Wire name of the event.
    pub fn name(&self) -> &str {
        match self {
            Self::Connected => "connect",
            Self::ConnectError(_) => "connect_error",
            Self::Disconnected(_) => "disconnect",
            Self::Status(_) => "status",
            Self::Qr(_) => "qr",
            Self::Ready(_) => "ready",
            Self::Authenticated(_) => "authenticated",
            Self::SessionDisconnected(_) => "disconnected",
            Self::PhoneLimitExceeded(_) => "phone_limit_exceeded",
            Self::MessageLog(_) => "message_log",
            Self::LimitExceeded(_) => "limit_exceeded",
            Self::BulkProgress(_) => "bulk_progress",
            Self::GroupProgress(_) => "group_progress",
            Self::SessionCreated(_) => "session_created",
            Self::SessionUpdated(_) => "session_updated",
            Self::SessionDestroyed(_) => "session_destroyed",
            Self::Other { name, .. } => name,
        }
    }
}

/// Event sent from this client to the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingEvent {
    UserLoggedIn { user_id: String },
    SelectSession { session_id: String },
    Custom { name: String, data: Value },
}

impl OutgoingEvent {
    pub fn name(&self) -> &str {
        match self {
            Self::UserLoggedIn { .. } => "user_logged_in",
            Self::SelectSession { .. } => "select_session",
            Self::Custom { name, .. } => name,
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            Self::UserLoggedIn { user_id } => json!({ "userId": user_id }),
            Self::SelectSession { session_id } => json!({ "sessionId": session_id }),
            Self::Custom { data, .. } => data.clone(),
        }
    }
}
