//! Persisted client state: well-known keys, the user session blob, and an
//! in-memory [`StateStore`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::warn;

use crate::error::PanelError;
use crate::traits::StateStore;

pub const KEY_BACKEND_PORT: &str = "backend_port";
pub const KEY_USER: &str = "user";
pub const KEY_AUTHENTICATED: &str = "is_authenticated";
pub const KEY_SCHEDULED_MESSAGES: &str = "scheduled_messages";
pub const KEY_PREFERENCES: &str = "preferences";

/// Authenticated user blob as returned by the login endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub role: Option<String>,
    /// Remaining fields (subscription tier, limits...) kept verbatim.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// User ids arrive as numbers from some backends and strings from others.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

/// Last backend port that answered the health probe.
pub async fn load_backend_port(store: &dyn StateStore) -> Option<u16> {
    match store.get(KEY_BACKEND_PORT).await {
        Ok(Some(raw)) => raw.trim().parse::<u16>().ok().filter(|p| *p != 0),
        Ok(None) => None,
        Err(e) => {
            warn!("state: failed to read {KEY_BACKEND_PORT}: {e}");
            None
        }
    }
}

pub async fn save_backend_port(store: &dyn StateStore, port: u16) -> Result<(), PanelError> {
    store.set(KEY_BACKEND_PORT, &port.to_string()).await
}

/// Current user, if logged in. A corrupt blob reads as logged out.
pub async fn load_user(store: &dyn StateStore) -> Result<Option<UserSession>, PanelError> {
    let Some(raw) = store.get(KEY_USER).await? else {
        return Ok(None);
    };
    match serde_json::from_str::<UserSession>(&raw) {
        Ok(user) => Ok(Some(user)),
        Err(e) => {
            warn!("state: ignoring malformed user blob: {e}");
            Ok(None)
        }
    }
}

pub async fn save_user(store: &dyn StateStore, user: &UserSession) -> Result<(), PanelError> {
    let raw = serde_json::to_string(user)?;
    store.set(KEY_USER, &raw).await?;
    store.set(KEY_AUTHENTICATED, "true").await
}

pub async fn clear_user(store: &dyn StateStore) -> Result<(), PanelError> {
    store.remove(KEY_USER).await?;
    store.remove(KEY_AUTHENTICATED).await
}

pub async fn is_authenticated(store: &dyn StateStore) -> bool {
    matches!(store.get(KEY_AUTHENTICATED).await, Ok(Some(v)) if v == "true")
}

/// A cached collection stored as JSON. Missing or malformed reads as `None`.
pub async fn load_cached(store: &dyn StateStore, key: &str) -> Option<Value> {
    match store.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("state: ignoring malformed {key}: {e}");
                None
            }
        },
        Ok(None) => None,
        Err(e) => {
            warn!("state: failed to read {key}: {e}");
            None
        }
    }
}

pub async fn save_cached(store: &dyn StateStore, key: &str, value: &Value) -> Result<(), PanelError> {
    store.set(key, &value.to_string()).await
}

/// Non-durable store for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PanelError> {
        let values = self
            .values
            .lock()
            .map_err(|_| PanelError::Store("memory store poisoned".into()))?;
        Ok(values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PanelError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| PanelError::Store("memory store poisoned".into()))?;
        values.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PanelError> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| PanelError::Store("memory store poisoned".into()))?;
        values.remove(key);
        Ok(())
    }
}
