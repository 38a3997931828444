//! Realtime channel to the backend.
//!
//! One channel per process. It connects only after the endpoint has been
//! resolved, tears itself down and reconnects when the endpoint moves, and
//! on transport failures kicks off a rediscovery while it backs off.

pub mod codec;
mod session;

use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wapanel_core::{
    config::RealtimeConfig,
    endpoint::BackendEndpoint,
    error::PanelError,
    events::{DisconnectReason, OutgoingEvent, RealtimeEvent},
};

use crate::discovery::{DiscoverOptions, Discovery};
use session::{SessionEnd, SessionIo};

/// Lifecycle of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No live channel; the next `channel()` call creates one.
    Absent,
    Connecting,
    Connected,
    Reconnecting,
}

/// Full Socket.IO URL for an endpoint.
pub fn socket_url(endpoint: &BackendEndpoint, path: &str) -> String {
    let path = if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{path}/")
    };
    endpoint.ws_url(&format!("{path}?{}", codec::TRANSPORT_QUERY))
}

/// Owns the single realtime channel.
pub struct RealtimeClient {
    discovery: Arc<Discovery>,
    config: RealtimeConfig,
    auth: Option<Value>,
    slot: Mutex<Option<Arc<RealtimeChannel>>>,
}

impl RealtimeClient {
    pub fn new(discovery: Arc<Discovery>, config: RealtimeConfig) -> Self {
        Self {
            discovery,
            config,
            auth: None,
            slot: Mutex::new(None),
        }
    }

    /// Payload sent with the namespace connect.
    pub fn with_auth(mut self, auth: Value) -> Self {
        self.auth = Some(auth);
        self
    }

    /// The live channel, creating it if there is none.
    ///
    /// Waits for the endpoint to be resolved before creating anything, so
    /// the first connection never targets the startup guess.
    pub async fn channel(&self) -> Arc<RealtimeChannel> {
        self.discovery.endpoint().wait_resolved().await;

        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(channel) = slot.as_ref() {
            if channel.state() != ChannelState::Absent {
                return Arc::clone(channel);
            }
        }
        let channel = RealtimeChannel::spawn(
            Arc::clone(&self.discovery),
            self.config.clone(),
            self.auth.clone(),
        );
        *slot = Some(Arc::clone(&channel));
        channel
    }

    /// The existing channel, without creating one.
    pub fn current(&self) -> Option<Arc<RealtimeChannel>> {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Close and forget the channel.
    pub async fn shutdown(&self) {
        let channel = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(channel) = channel {
            channel.close().await;
        }
    }
}

/// Handle to a running channel.
pub struct RealtimeChannel {
    id: Uuid,
    events: broadcast::Sender<RealtimeEvent>,
    outgoing: mpsc::UnboundedSender<OutgoingEvent>,
    state: watch::Receiver<ChannelState>,
    announcements: Arc<Mutex<Vec<OutgoingEvent>>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RealtimeChannel {
    fn spawn(
        discovery: Arc<Discovery>,
        config: RealtimeConfig,
        auth: Option<Value>,
    ) -> Arc<Self> {
        let id = Uuid::new_v4();
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let announcements = Arc::new(Mutex::new(Vec::new()));

        let supervisor = Supervisor {
            id,
            discovery,
            config,
            auth,
            events: events.clone(),
            outgoing: outgoing_rx,
            state: state_tx,
            announcements: Arc::clone(&announcements),
            shutdown: shutdown_rx,
        };
        let task = tokio::spawn(supervisor.run());

        Arc::new(Self {
            id,
            events,
            outgoing: outgoing_tx,
            state: state_rx,
            announcements,
            shutdown: shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.events.subscribe()
    }

    /// Queue an event. Events emitted while disconnected go out after the
    /// next successful connect.
    pub fn emit(&self, event: OutgoingEvent) -> Result<(), PanelError> {
        self.outgoing
            .send(event)
            .map_err(|_| PanelError::Realtime("channel is closed".into()))
    }

    /// Send an event after every connect, replacing any earlier
    /// announcement with the same name.
    pub fn announce(&self, event: OutgoingEvent) -> Result<(), PanelError> {
        {
            let mut list = self
                .announcements
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            list.retain(|e| e.name() != event.name());
            list.push(event.clone());
        }
        if self.state() == ChannelState::Connected {
            self.emit(event)?;
        }
        Ok(())
    }

    /// Wait until connected. Fails if the channel gives up first.
    pub async fn wait_connected(&self) -> Result<(), PanelError> {
        let mut rx = self.state.clone();
        let state = *rx
            .wait_for(|s| matches!(s, ChannelState::Connected | ChannelState::Absent))
            .await
            .map_err(|_| PanelError::Realtime("channel task ended".into()))?;
        match state {
            ChannelState::Connected => Ok(()),
            _ => Err(PanelError::Realtime("channel closed before connecting".into())),
        }
    }

    /// Stop the supervisor and wait for it to finish.
    pub async fn close(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

struct Supervisor {
    id: Uuid,
    discovery: Arc<Discovery>,
    config: RealtimeConfig,
    auth: Option<Value>,
    events: broadcast::Sender<RealtimeEvent>,
    outgoing: mpsc::UnboundedReceiver<OutgoingEvent>,
    state: watch::Sender<ChannelState>,
    announcements: Arc<Mutex<Vec<OutgoingEvent>>>,
    shutdown: watch::Receiver<bool>,
}

impl Supervisor {
    async fn run(mut self) {
        let mut endpoint_rx = self.discovery.endpoint().subscribe();
        let mut failures: u32 = 0;

        loop {
            let target = endpoint_rx.borrow_and_update().endpoint.clone();
            let url = socket_url(&target, &self.config.path);
            debug!("realtime[{}]: connecting to {url}", self.id);

            let io = SessionIo {
                events: &self.events,
                outgoing: &mut self.outgoing,
                state: &self.state,
                announcements: &self.announcements,
                shutdown: self.shutdown.clone(),
            };
            let outcome = tokio::select! {
                result = session::run(&url, self.auth.as_ref(), io) => result,
                _ = endpoint_rx.changed() => {
                    info!("realtime: backend moved from {target}, reconnecting");
                    if self.state.send_replace(ChannelState::Reconnecting) == ChannelState::Connected {
                        let _ = self
                            .events
                            .send(RealtimeEvent::Disconnected(DisconnectReason::EndpointChanged));
                    }
                    failures = 0;
                    continue;
                }
            };

            match outcome {
                Ok(SessionEnd::ServerClosed) => {
                    let _ = self
                        .events
                        .send(RealtimeEvent::Disconnected(DisconnectReason::ServerClosed));
                    break;
                }
                Ok(SessionEnd::Shutdown) => {
                    let _ = self
                        .events
                        .send(RealtimeEvent::Disconnected(DisconnectReason::ClientClosed));
                    break;
                }
                Err(e) => {
                    let was_connected = *self.state.borrow() == ChannelState::Connected;
                    self.state.send_replace(ChannelState::Reconnecting);
                    if was_connected {
                        failures = 0;
                        warn!("realtime: disconnected: {e}");
                        let _ = self.events.send(RealtimeEvent::Disconnected(
                            DisconnectReason::Transport(e.to_string()),
                        ));
                    } else {
                        debug!("realtime: connect failed: {e}");
                        let _ = self.events.send(RealtimeEvent::ConnectError(e.to_string()));
                    }

                    failures += 1;
                    if failures > self.config.max_reconnect_attempts {
                        warn!(
                            "realtime: giving up after {} failed attempts",
                            failures - 1
                        );
                        break;
                    }

                    self.rediscover();

                    tokio::select! {
                        _ = tokio::time::sleep(self.config.reconnect_delay()) => {}
                        _ = endpoint_rx.changed() => {
                            debug!("realtime: endpoint changed during backoff");
                            failures = 0;
                        }
                        _ = session::stopped(&mut self.shutdown) => {
                            let _ = self
                                .events
                                .send(RealtimeEvent::Disconnected(DisconnectReason::ClientClosed));
                            break;
                        }
                    }
                }
            }
        }

        self.state.send_replace(ChannelState::Absent);
        debug!("realtime[{}]: supervisor stopped", self.id);
    }

    /// Start a forced scan in the background unless one is already running.
    fn rediscover(&self) {
        if self.discovery.is_discovering() {
            return;
        }
        let discovery = Arc::clone(&self.discovery);
        tokio::spawn(async move {
            discovery.discover(DiscoverOptions::forced()).await;
        });
    }
}
