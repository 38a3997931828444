//! Wiring of the client components around one shared endpoint.

use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};
use wapanel_core::{
    config::Config,
    endpoint::{BackendEndpoint, EndpointHandle},
    error::PanelError,
    events::OutgoingEvent,
    state::{load_user, KEY_PREFERENCES},
    traits::{BulkCommands, StateStore},
};

use crate::api::ApiClient;
use crate::discovery::Discovery;
use crate::queue::BulkQueueControl;
use crate::realtime::{RealtimeChannel, RealtimeClient};

/// Everything a frontend needs to talk to the backend.
pub struct Backend {
    pub discovery: Arc<Discovery>,
    pub api: Arc<ApiClient>,
    pub realtime: RealtimeClient,
    pub queue: Arc<BulkQueueControl>,
}

impl Backend {
    pub fn new(config: &Config, store: Arc<dyn StateStore>) -> Result<Self, PanelError> {
        let explicit = config
            .backend
            .url
            .as_deref()
            .map(BackendEndpoint::parse)
            .transpose()?;
        let guess = BackendEndpoint::new(config.backend.host.clone(), config.backend.default_port);
        let endpoint = EndpointHandle::new(guess);

        let discovery = Arc::new(Discovery::new(
            endpoint,
            Arc::clone(&store),
            config.discovery.clone(),
            explicit,
        )?);
        let api = Arc::new(ApiClient::new(
            Arc::clone(&discovery),
            store,
            config.backend.request_timeout(),
        )?);
        let realtime = RealtimeClient::new(Arc::clone(&discovery), config.realtime.clone())
            .with_auth(json!({ "client": config.panel.name }));
        let commands: Arc<dyn BulkCommands> = api.clone();
        let queue = Arc::new(BulkQueueControl::new(commands));

        Ok(Self {
            discovery,
            api,
            realtime,
            queue,
        })
    }

    pub fn endpoint(&self) -> &EndpointHandle {
        self.discovery.endpoint()
    }

    /// Resolve the backend endpoint. Never fails; see [`Discovery::resolve_initial`].
    pub async fn start(&self) -> BackendEndpoint {
        let endpoint = self.discovery.resolve_initial().await;
        info!("Backend endpoint: {}", endpoint.http_url());
        endpoint
    }

    /// Open (or reuse) the realtime channel and announce the logged-in user.
    pub async fn connect_realtime(&self) -> Result<Arc<RealtimeChannel>, PanelError> {
        let channel = self.realtime.channel().await;
        if let Some(user) = load_user(self.api.store().as_ref()).await? {
            channel.announce(OutgoingEvent::UserLoggedIn { user_id: user.id })?;
        }
        if let Some(session_id) = self.selected_session().await? {
            channel.announce(OutgoingEvent::SelectSession { session_id })?;
        }
        Ok(channel)
    }

    /// Remember the active WhatsApp session and tell the backend.
    pub async fn select_session(&self, session_id: &str) -> Result<(), PanelError> {
        let store = self.api.store();
        let mut prefs = match store.get(KEY_PREFERENCES).await? {
            Some(raw) => serde_json::from_str::<Value>(&raw).unwrap_or_else(|e| {
                warn!("state: resetting malformed preferences: {e}");
                json!({})
            }),
            None => json!({}),
        };
        if !prefs.is_object() {
            prefs = json!({});
        }
        prefs["selectedSession"] = json!(session_id);
        store.set(KEY_PREFERENCES, &prefs.to_string()).await?;

        if let Some(channel) = self.realtime.current() {
            channel.announce(OutgoingEvent::SelectSession {
                session_id: session_id.to_string(),
            })?;
        }
        Ok(())
    }

    pub async fn selected_session(&self) -> Result<Option<String>, PanelError> {
        let Some(raw) = self.api.store().get(KEY_PREFERENCES).await? else {
            return Ok(None);
        };
        Ok(serde_json::from_str::<Value>(&raw)
            .ok()
            .and_then(|prefs| prefs.get("selectedSession")?.as_str().map(str::to_string)))
    }

    pub async fn shutdown(&self) {
        self.realtime.shutdown().await;
    }
}
