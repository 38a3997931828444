//! Typed wrappers over the backend REST surface.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};
use wapanel_core::{
    error::PanelError,
    state::{
        clear_user, load_cached, save_cached, save_user, UserSession, KEY_SCHEDULED_MESSAGES,
    },
    traits::BulkCommands,
};

use super::ApiClient;

/// One WhatsApp session as listed by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub session_id: String,
    pub number: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkSendRequest {
    pub session_id: String,
    pub numbers: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<u32>,
    /// Pause between batches, in minutes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay_minutes: Option<f64>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LoginResponse {
    Wrapped { user: UserSession },
    Bare(UserSession),
}

impl ApiClient {
    /// Backend health and summary.
    pub async fn status(&self) -> Result<Value, PanelError> {
        self.get_json("/api/status").await
    }

    pub async fn backend_config(&self) -> Result<Value, PanelError> {
        self.get_json("/api/config").await
    }

    pub async fn sessions(&self) -> Result<Vec<SessionSummary>, PanelError> {
        self.get_json("/api/sessions").await
    }

    pub async fn create_session(&self, session_id: &str) -> Result<Value, PanelError> {
        self.post_json("/api/sessions", &json!({ "sessionId": session_id }))
            .await
    }

    pub async fn destroy_session(&self, session_id: &str) -> Result<(), PanelError> {
        self.delete(&format!("/api/sessions/{session_id}")).await
    }

    pub async fn send_message(&self, req: &SendMessageRequest) -> Result<Value, PanelError> {
        self.post_json("/api/messages/send", req).await
    }

    /// Start a bulk send; progress arrives as `bulk_progress` events.
    pub async fn send_bulk(&self, req: &BulkSendRequest) -> Result<Value, PanelError> {
        self.post_json("/api/messages/bulk", req).await
    }

    /// Scheduled jobs. A successful listing refreshes the local cache.
    pub async fn scheduled_jobs(&self) -> Result<Vec<Value>, PanelError> {
        let jobs: Vec<Value> = self.get_json("/api/scheduled").await?;
        let cached = Value::Array(jobs.clone());
        if let Err(e) = save_cached(self.store().as_ref(), KEY_SCHEDULED_MESSAGES, &cached).await {
            warn!("api: could not cache scheduled jobs: {e}");
        }
        Ok(jobs)
    }

    /// Last scheduled jobs listing seen, for use while the backend is away.
    pub async fn cached_scheduled_jobs(&self) -> Vec<Value> {
        match load_cached(self.store().as_ref(), KEY_SCHEDULED_MESSAGES).await {
            Some(Value::Array(jobs)) => jobs,
            _ => Vec::new(),
        }
    }

    pub async fn auto_reply_rules(&self) -> Result<Vec<Value>, PanelError> {
        self.get_json("/api/auto-reply").await
    }

    /// Log in and persist the returned user so later requests carry its id.
    pub async fn login(&self, username: &str, password: &str) -> Result<UserSession, PanelError> {
        let resp: LoginResponse = self
            .post_json(
                "/api/auth/login",
                &json!({ "username": username, "password": password }),
            )
            .await?;
        let user = match resp {
            LoginResponse::Wrapped { user } | LoginResponse::Bare(user) => user,
        };
        save_user(self.store().as_ref(), &user).await?;
        info!("api: logged in as {} ({})", user.username, user.id);
        Ok(user)
    }

    /// Forget the local user session.
    pub async fn logout(&self) -> Result<(), PanelError> {
        clear_user(self.store().as_ref()).await
    }
}

#[async_trait]
impl BulkCommands for ApiClient {
    async fn pause_bulk(&self) -> Result<(), PanelError> {
        self.post_empty("/api/messages/bulk/pause").await
    }

    async fn resume_bulk(&self) -> Result<(), PanelError> {
        self.post_empty("/api/messages/bulk/resume").await
    }

    async fn cancel_bulk(&self) -> Result<(), PanelError> {
        self.post_empty("/api/messages/bulk/cancel").await
    }
}
