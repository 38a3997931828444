//! One WebSocket connection, from handshake until it ends.

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use wapanel_core::{
    error::PanelError,
    events::{OutgoingEvent, RealtimeEvent},
};

use super::codec::{self, EnginePacket, OpenInfo, SocketPacket};
use super::ChannelState;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How a session ended without a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum SessionEnd {
    /// Server sent a namespace disconnect.
    ServerClosed,
    /// Local shutdown was requested.
    Shutdown,
}

/// Shared pieces a session reads from and publishes to.
pub(super) struct SessionIo<'a> {
    pub events: &'a broadcast::Sender<RealtimeEvent>,
    pub outgoing: &'a mut mpsc::UnboundedReceiver<OutgoingEvent>,
    pub state: &'a watch::Sender<ChannelState>,
    pub announcements: &'a Arc<Mutex<Vec<OutgoingEvent>>>,
    pub shutdown: watch::Receiver<bool>,
}

fn transport(e: impl std::fmt::Display) -> PanelError {
    PanelError::Realtime(format!("transport error: {e}"))
}

async fn send_text(ws: &mut Socket, text: String) -> Result<(), PanelError> {
    ws.send(Message::Text(text)).await.map_err(transport)
}

/// Read the next Engine.IO packet, skipping non-text frames.
async fn next_packet(ws: &mut Socket, wait: Duration) -> Result<EnginePacket, PanelError> {
    loop {
        let frame = timeout(wait, ws.next())
            .await
            .map_err(|_| PanelError::Realtime("handshake timed out".into()))?;
        match frame {
            None => return Err(PanelError::Realtime("transport closed".into())),
            Some(Err(e)) => return Err(transport(e)),
            Some(Ok(Message::Text(text))) => return codec::decode(&text),
            Some(Ok(Message::Close(_))) => {
                return Err(PanelError::Realtime("transport closed".into()))
            }
            Some(Ok(_)) => continue,
        }
    }
}

/// Connect, complete both handshakes, then pump frames until the session ends.
///
/// Returns `Err` for anything the supervisor should treat as a transport
/// failure, including a rejected namespace connect.
pub(super) async fn run(
    url: &str,
    auth: Option<&Value>,
    mut io: SessionIo<'_>,
) -> Result<SessionEnd, PanelError> {
    let (mut ws, open) = tokio::select! {
        result = handshake(url, auth) => result?,
        _ = stopped(&mut io.shutdown) => return Ok(SessionEnd::Shutdown),
    };
    let silence = Duration::from_millis(open.ping_interval + open.ping_timeout);

    io.state.send_replace(ChannelState::Connected);
    let _ = io.events.send(RealtimeEvent::Connected);
    info!("realtime: connected to {url} (sid {})", open.sid);

    let replay: Vec<OutgoingEvent> = io
        .announcements
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    for event in replay {
        send_text(&mut ws, codec::encode_event(event.name(), &event.payload())).await?;
    }

    let mut deadline = Instant::now() + silence;
    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                return Err(PanelError::Realtime("ping timeout".into()));
            }
            frame = ws.next() => {
                deadline = Instant::now() + silence;
                let text = match frame {
                    None => return Err(PanelError::Realtime("transport closed".into())),
                    Some(Err(e)) => return Err(transport(e)),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) => {
                        return Err(PanelError::Realtime("transport closed".into()))
                    }
                    Some(Ok(_)) => continue,
                };
                match codec::decode(&text) {
                    Ok(EnginePacket::Ping) => send_text(&mut ws, codec::encode_pong()).await?,
                    Ok(EnginePacket::Message(SocketPacket::Event { name, data, .. })) => {
                        let _ = io.events.send(RealtimeEvent::from_wire(&name, data));
                    }
                    Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                        info!("realtime: server closed the connection");
                        return Ok(SessionEnd::ServerClosed);
                    }
                    Ok(EnginePacket::Message(SocketPacket::ConnectError(payload))) => {
                        return Err(PanelError::Realtime(format!(
                            "connect_error: {}",
                            codec::connect_error_message(&payload)
                        )));
                    }
                    Ok(EnginePacket::Close) => {
                        return Err(PanelError::Realtime("transport closed".into()))
                    }
                    Ok(other) => debug!("realtime: ignoring {other:?}"),
                    Err(e) => warn!("realtime: {e}"),
                }
            }
            outgoing = io.outgoing.recv() => match outgoing {
                Some(event) => {
                    debug!("realtime: emit {}", event.name());
                    send_text(&mut ws, codec::encode_event(event.name(), &event.payload())).await?;
                }
                None => {
                    close_gracefully(&mut ws).await;
                    return Ok(SessionEnd::Shutdown);
                }
            },
            _ = stopped(&mut io.shutdown) => {
                close_gracefully(&mut ws).await;
                return Ok(SessionEnd::Shutdown);
            }
        }
    }
}

/// Resolves once shutdown has been requested. The guard returned by
/// `wait_for` is dropped here so callers stay `Send`.
pub(super) async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Open the transport and join the default namespace.
async fn handshake(url: &str, auth: Option<&Value>) -> Result<(Socket, OpenInfo), PanelError> {
    let (mut ws, _) = timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| PanelError::Realtime(format!("timed out connecting to {url}")))?
        .map_err(|e| PanelError::Realtime(format!("failed to connect to {url}: {e}")))?;

    let open = match next_packet(&mut ws, CONNECT_TIMEOUT).await? {
        EnginePacket::Open(info) => info,
        other => {
            return Err(PanelError::Realtime(format!(
                "expected open packet, got {other:?}"
            )))
        }
    };
    let silence = Duration::from_millis(open.ping_interval + open.ping_timeout);

    send_text(&mut ws, codec::encode_connect(auth)).await?;
    loop {
        match next_packet(&mut ws, silence).await? {
            EnginePacket::Ping => send_text(&mut ws, codec::encode_pong()).await?,
            EnginePacket::Message(SocketPacket::Connect(_)) => return Ok((ws, open)),
            EnginePacket::Message(SocketPacket::ConnectError(payload)) => {
                return Err(PanelError::Realtime(format!(
                    "connect_error: {}",
                    codec::connect_error_message(&payload)
                )));
            }
            EnginePacket::Close => return Err(PanelError::Realtime("transport closed".into())),
            other => debug!("realtime: ignoring {other:?} during handshake"),
        }
    }
}

async fn close_gracefully(ws: &mut Socket) {
    let _ = ws.send(Message::Text(codec::encode_disconnect())).await;
    let _ = ws.close(None).await;
}
