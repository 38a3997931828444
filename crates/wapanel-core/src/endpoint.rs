//! Backend endpoint reference, the one piece of shared mutable state.
//!
//! Readers subscribe to an [`EndpointHandle`]; writers are the discovery
//! success path and explicit configuration. Writes of an unchanged resolved
//! endpoint do not wake observers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::PanelError;

/// Host/port pair the client believes the backend is listening on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub host: String,
    pub port: u16,
}

impl BackendEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Base HTTP URL without a trailing slash.
    pub fn http_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// WebSocket URL for the given path (which should start with `/`).
    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}:{}{path}", self.host, self.port)
    }

    /// Same host, different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self {
            host: self.host.clone(),
            port,
        }
    }

    /// Parse `http://host:port[/path]`, `https://host[:port]` or `host:port`.
    pub fn parse(input: &str) -> Result<Self, PanelError> {
        let trimmed = input.trim();
        let (rest, default_port) = if let Some(rest) = trimmed.strip_prefix("http://") {
            (rest, Some(80))
        } else if let Some(rest) = trimmed.strip_prefix("https://") {
            (rest, Some(443))
        } else {
            (trimmed, None)
        };

        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(PanelError::Config(format!("invalid backend url '{input}'")));
        }

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|e| {
                    PanelError::Config(format!("invalid port in backend url '{input}': {e}"))
                })?;
                (host, port)
            }
            None => match default_port {
                Some(port) => (authority, port),
                None => {
                    return Err(PanelError::Config(format!(
                        "backend url '{input}' has no port"
                    )))
                }
            },
        };

        if host.is_empty() || port == 0 {
            return Err(PanelError::Config(format!("invalid backend url '{input}'")));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for BackendEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Value observed through an [`EndpointHandle`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointState {
    pub endpoint: BackendEndpoint,
    /// False while the endpoint is still the startup guess.
    pub resolved: bool,
}

/// Injectable, observable backend endpoint.
#[derive(Clone)]
pub struct EndpointHandle {
    tx: Arc<watch::Sender<EndpointState>>,
}

impl EndpointHandle {
    /// Create a handle holding an unresolved default guess.
    pub fn new(initial: BackendEndpoint) -> Self {
        let (tx, _rx) = watch::channel(EndpointState {
            endpoint: initial,
            resolved: false,
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn current(&self) -> BackendEndpoint {
        self.tx.borrow().endpoint.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.borrow().resolved
    }

    /// Record a resolved endpoint. Returns whether observers were notified.
    pub fn set(&self, endpoint: BackendEndpoint) -> bool {
        self.tx.send_if_modified(|state| {
            if state.resolved && state.endpoint == endpoint {
                return false;
            }
            state.endpoint = endpoint;
            state.resolved = true;
            true
        })
    }

    /// Record a resolved port on the current host.
    pub fn set_port(&self, port: u16) -> bool {
        let endpoint = self.current().with_port(port);
        self.set(endpoint)
    }

    pub fn subscribe(&self) -> watch::Receiver<EndpointState> {
        self.tx.subscribe()
    }

    /// Wait until the endpoint has been resolved at least once.
    pub async fn wait_resolved(&self) -> BackendEndpoint {
        let mut rx = self.tx.subscribe();
        let endpoint = match rx.wait_for(|state| state.resolved).await {
            Ok(state) => state.endpoint.clone(),
            // Unreachable while `self` holds the sender.
            Err(_) => self.current(),
        };
        endpoint
    }
}

impl fmt::Debug for EndpointHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointHandle")
            .field("state", &*self.tx.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            BackendEndpoint::parse("http://127.0.0.1:3001").unwrap(),
            BackendEndpoint::new("127.0.0.1", 3001)
        );
        assert_eq!(
            BackendEndpoint::parse("http://localhost:3005/api").unwrap(),
            BackendEndpoint::new("localhost", 3005)
        );
        assert_eq!(
            BackendEndpoint::parse("https://panel.example.com").unwrap(),
            BackendEndpoint::new("panel.example.com", 443)
        );
        assert_eq!(
            BackendEndpoint::parse("10.0.0.2:4000").unwrap(),
            BackendEndpoint::new("10.0.0.2", 4000)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(BackendEndpoint::parse("").is_err());
        assert!(BackendEndpoint::parse("localhost").is_err());
        assert!(BackendEndpoint::parse("http://host:notaport").is_err());
        assert!(BackendEndpoint::parse("http://host:0").is_err());
    }

    #[test]
    fn test_urls() {
        let ep = BackendEndpoint::new("127.0.0.1", 3001);
        assert_eq!(ep.http_url(), "http://127.0.0.1:3001");
        assert_eq!(
            ep.ws_url("/socket.io/?EIO=4"),
            "ws://127.0.0.1:3001/socket.io/?EIO=4"
        );
        assert_eq!(ep.to_string(), "127.0.0.1:3001");
    }

    #[test]
    fn test_set_is_idempotent_once_resolved() {
        let handle = EndpointHandle::new(BackendEndpoint::new("127.0.0.1", 3001));
        assert!(!handle.is_resolved());

        // First resolution to the same port still counts.
        assert!(handle.set_port(3001));
        assert!(handle.is_resolved());
        assert!(!handle.set_port(3001));
        assert!(handle.set_port(3002));
        assert_eq!(handle.current().port, 3002);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes_only() {
        let handle = EndpointHandle::new(BackendEndpoint::new("127.0.0.1", 3001));
        let mut rx = handle.subscribe();
        handle.set_port(3003);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().endpoint.port, 3003);

        handle.set_port(3003);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_wait_resolved_wakes_on_first_resolution() {
        let handle = EndpointHandle::new(BackendEndpoint::new("127.0.0.1", 3001));
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.wait_resolved().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        handle.set_port(3010);
        let ep = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ep.port, 3010);
    }
}
