//! HTTP API client.
//!
//! Every request targets the current endpoint and carries the logged-in
//! user's id. A transport-level failure triggers one forced rediscovery round
//! and a single retry; HTTP error statuses are returned as-is. Timeouts are
//! not retried since the backend may already have acted on the request.

mod endpoints;

pub use endpoints::{BulkSendRequest, SendMessageRequest, SessionSummary};

use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use wapanel_core::{
    endpoint::EndpointHandle, error::PanelError, state::load_user, traits::StateStore,
};

use crate::discovery::{DiscoverOptions, Discovery};

/// Header carrying the logged-in user's id.
pub const HEADER_USER_ID: &str = "x-user-id";

/// Request body, kept in a rebuildable form for the retry.
#[derive(Debug, Clone)]
pub enum RequestBody {
    Empty,
    Json(Value),
    Form(Vec<(String, String)>),
}

impl RequestBody {
    pub fn json<T: Serialize + ?Sized>(body: &T) -> Result<Self, PanelError> {
        Ok(Self::Json(serde_json::to_value(body)?))
    }
}

pub struct ApiClient {
    http: reqwest::Client,
    endpoint: EndpointHandle,
    discovery: Arc<Discovery>,
    store: Arc<dyn StateStore>,
}

impl ApiClient {
    pub fn new(
        discovery: Arc<Discovery>,
        store: Arc<dyn StateStore>,
        timeout: Duration,
    ) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PanelError::Network(format!("failed to build http client: {e}")))?;
        Ok(Self {
            http,
            endpoint: discovery.endpoint().clone(),
            discovery,
            store,
        })
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Send a request, retrying once after rediscovery on network failure.
    ///
    /// Non-success statuses become [`PanelError::Api`] and are never retried.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: RequestBody,
    ) -> Result<Response, PanelError> {
        let user_id = match load_user(self.store.as_ref()).await {
            Ok(user) => user.map(|u| u.id),
            Err(e) => {
                warn!("api: could not read user session: {e}");
                None
            }
        };

        let resp = match self.attempt(&method, path, &body, user_id.as_deref()).await {
            Ok(resp) => resp,
            Err(e) if is_network_failure(&e) => {
                warn!("api: {method} {path} failed ({e}), rediscovering backend");
                self.discovery.discover(DiscoverOptions::single_round()).await;
                self.attempt(&method, path, &body, user_id.as_deref())
                    .await
                    .map_err(|e| PanelError::Network(format!("{method} {path}: {e}")))?
            }
            Err(e) => return Err(PanelError::Network(format!("{method} {path}: {e}"))),
        };

        check_status(resp).await
    }

    async fn attempt(
        &self,
        method: &Method,
        path: &str,
        body: &RequestBody,
        user_id: Option<&str>,
    ) -> Result<Response, reqwest::Error> {
        let url = format!("{}{path}", self.endpoint.current().http_url());
        debug!("api: {method} {url}");

        let mut req = self.http.request(method.clone(), &url);
        if let Some(id) = user_id {
            req = req.header(HEADER_USER_ID, id);
        }
        req = match body {
            RequestBody::Empty => req,
            RequestBody::Json(value) => req.json(value),
            RequestBody::Form(fields) => req.form(fields),
        };
        req.send().await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PanelError> {
        let resp = self.send(Method::GET, path, RequestBody::Empty).await?;
        decode(resp).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, PanelError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let resp = self
            .send(Method::POST, path, RequestBody::json(body)?)
            .await?;
        decode(resp).await
    }

    /// POST with no body, ignoring the response payload.
    pub async fn post_empty(&self, path: &str) -> Result<(), PanelError> {
        self.send(Method::POST, path, RequestBody::Empty).await?;
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), PanelError> {
        self.send(Method::DELETE, path, RequestBody::Empty).await?;
        Ok(())
    }
}

/// Connection refused, DNS failure, or the transport closed under us.
///
/// A connect timeout never reached the backend and counts. Any other timeout
/// does not.
fn is_network_failure(e: &reqwest::Error) -> bool {
    e.is_connect() || (e.is_request() && !e.is_timeout())
}

async fn check_status(resp: Response) -> Result<Response, PanelError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(PanelError::Api {
        status: status.as_u16(),
        message: error_message(&text)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string()),
    })
}

/// Pull a human message out of an error body: `error`, then `message`, then
/// the raw text.
fn error_message(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(body) = serde_json::from_str::<Value>(text) {
        for key in ["error", "message"] {
            if let Some(msg) = body.get(key).and_then(Value::as_str) {
                return Some(msg.to_string());
            }
        }
    }
    Some(text.to_string())
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, PanelError> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| PanelError::Network(format!("failed to read response: {e}")))?;
    // Empty bodies (204) decode as JSON null.
    if bytes.is_empty() {
        return Ok(serde_json::from_value(Value::Null)?);
    }
    Ok(serde_json::from_slice(&bytes)?)
}
