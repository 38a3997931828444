//! Engine.IO v4 / Socket.IO v4 text framing.
//!
//! Only the default namespace and text frames are used. Binary attachments
//! are recognised but not decoded.

use serde::Deserialize;
use serde_json::Value;
use wapanel_core::error::PanelError;

/// Query string selecting Engine.IO v4 over a raw WebSocket.
pub const TRANSPORT_QUERY: &str = "EIO=4&transport=websocket";

/// Handshake sent by the server when the transport opens.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenInfo {
    pub sid: String,
    /// Milliseconds between server pings.
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong.
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(OpenInfo),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event {
        name: String,
        data: Value,
        ack: Option<u64>,
    },
    Ack {
        id: u64,
        data: Value,
    },
    ConnectError(Value),
    /// Binary event or ack; attachments arrive as separate frames.
    Binary,
}

fn malformed(text: &str, why: &str) -> PanelError {
    PanelError::Realtime(format!("malformed packet ({why}): {text}"))
}

pub fn decode(text: &str) -> Result<EnginePacket, PanelError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| malformed(text, "empty"))?;
    let rest = chars.as_str();

    match kind {
        '0' => {
            let info = serde_json::from_str(rest).map_err(|e| malformed(text, &e.to_string()))?;
            Ok(EnginePacket::Open(info))
        }
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => Ok(EnginePacket::Message(decode_socket(rest)?)),
        '5' => Ok(EnginePacket::Upgrade),
        '6' => Ok(EnginePacket::Noop),
        _ => Err(malformed(text, "unknown engine packet type")),
    }
}

fn decode_socket(text: &str) -> Result<SocketPacket, PanelError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or_else(|| malformed(text, "empty message"))?;
    let mut rest = chars.as_str();

    // Optional namespace: "/admin,".
    if rest.starts_with('/') {
        rest = match rest.split_once(',') {
            Some((_, tail)) => tail,
            None => "",
        };
    }

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    let id = if digits > 0 {
        rest[..digits].parse::<u64>().ok()
    } else {
        None
    };
    let payload = &rest[digits..];

    let json = || -> Result<Value, PanelError> {
        if payload.is_empty() {
            Ok(Value::Null)
        } else {
            serde_json::from_str(payload).map_err(|e| malformed(text, &e.to_string()))
        }
    };

    match kind {
        '0' => {
            let body = json()?;
            Ok(SocketPacket::Connect((!body.is_null()).then_some(body)))
        }
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let Value::Array(mut items) = json()? else {
                return Err(malformed(text, "event payload is not an array"));
            };
            if items.is_empty() {
                return Err(malformed(text, "event without a name"));
            }
            let Value::String(name) = items.remove(0) else {
                return Err(malformed(text, "event name is not a string"));
            };
            Ok(SocketPacket::Event {
                name,
                data: collapse_args(items),
                ack: id,
            })
        }
        '3' => {
            let id = id.ok_or_else(|| malformed(text, "ack without id"))?;
            let data = match json()? {
                Value::Array(items) => collapse_args(items),
                other => other,
            };
            Ok(SocketPacket::Ack { id, data })
        }
        '4' => Ok(SocketPacket::ConnectError(json()?)),
        '5' | '6' => Ok(SocketPacket::Binary),
        _ => Err(malformed(text, "unknown socket packet type")),
    }
}

/// Handlers receive a single payload: none becomes null, one is passed
/// through, several stay an array.
fn collapse_args(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

pub fn encode_pong() -> String {
    "3".to_string()
}

/// Namespace connect for `/`, with an optional auth payload.
pub fn encode_connect(auth: Option<&Value>) -> String {
    match auth {
        Some(auth) => format!("40{auth}"),
        None => "40".to_string(),
    }
}

pub fn encode_disconnect() -> String {
    "41".to_string()
}

pub fn encode_event(name: &str, data: &Value) -> String {
    let frame = Value::Array(vec![Value::String(name.to_string()), data.clone()]);
    format!("42{frame}")
}

/// Human-readable reason from a `connect_error` payload.
pub fn connect_error_message(payload: &Value) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| payload.to_string())
}
