//! Backend port discovery.
//!
//! The backend may land on any port near its configured base. Discovery
//! probes a health endpoint on candidate ports and publishes the first one
//! that answers through the shared [`EndpointHandle`].

pub mod candidates;
pub mod port_info;

use futures_util::stream::{FuturesUnordered, StreamExt};
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};
use wapanel_core::{
    config::DiscoveryConfig,
    endpoint::{BackendEndpoint, EndpointHandle},
    error::PanelError,
    state::{load_backend_port, save_backend_port},
    traits::StateStore,
};

use crate::single_flight::SingleFlight;
pub use candidates::candidate_ports;
pub use port_info::{read_port_info, PortInfo, PortInfoSource};

/// Per-call discovery overrides.
#[derive(Debug, Clone, Default)]
pub struct DiscoverOptions {
    /// Start a new scan even if one is already running.
    pub force: bool,
    /// Wait this long before the first round.
    pub delay: Option<Duration>,
    pub max_rounds: Option<u32>,
    pub retry_delay: Option<Duration>,
}

impl DiscoverOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Self::default()
        }
    }

    /// A forced scan limited to one round.
    pub fn single_round() -> Self {
        Self {
            force: true,
            max_rounds: Some(1),
            ..Self::default()
        }
    }
}

/// Finds the backend and keeps the endpoint reference current.
pub struct Discovery {
    endpoint: EndpointHandle,
    store: Arc<dyn StateStore>,
    config: DiscoveryConfig,
    /// Explicitly configured backend; bypasses scanning at startup.
    explicit: Option<BackendEndpoint>,
    http: reqwest::Client,
    flight: SingleFlight<Option<u16>>,
    last_known: Mutex<Option<u16>>,
    rounds: AtomicU64,
}

impl Discovery {
    pub fn new(
        endpoint: EndpointHandle,
        store: Arc<dyn StateStore>,
        config: DiscoveryConfig,
        explicit: Option<BackendEndpoint>,
    ) -> Result<Self, PanelError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| PanelError::Discovery(format!("failed to build http client: {e}")))?;
        Ok(Self {
            endpoint,
            store,
            config,
            explicit,
            http,
            flight: SingleFlight::new(),
            last_known: Mutex::new(None),
            rounds: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &EndpointHandle {
        &self.endpoint
    }

    pub fn current(&self) -> BackendEndpoint {
        self.endpoint.current()
    }

    /// Most recent port that answered, from this run or the persisted state.
    pub fn last_known_port(&self) -> Option<u16> {
        *self.last_known.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a scan is currently running.
    pub fn is_discovering(&self) -> bool {
        self.flight.in_flight()
    }

    /// Total scan rounds executed by this instance.
    pub fn rounds_run(&self) -> u64 {
        self.rounds.load(Ordering::Relaxed)
    }

    /// Resolve the endpoint once at startup.
    ///
    /// Order: explicit configuration, the port-info document, then a scan.
    /// Never fails; an unsuccessful scan keeps the default guess.
    pub async fn resolve_initial(self: &Arc<Self>) -> BackendEndpoint {
        if let Some(explicit) = &self.explicit {
            info!("discovery: using configured backend {explicit}");
            self.endpoint.set(explicit.clone());
            return explicit.clone();
        }

        if let Some(port) = load_backend_port(self.store.as_ref()).await {
            debug!("discovery: last known backend port {port}");
            self.remember(port);
        }

        if let Some(source) = PortInfoSource::from_config(&self.config.port_info) {
            if let Some(info) =
                read_port_info(&source, &self.http, self.config.probe_timeout()).await
            {
                info!(
                    "discovery: port info reports backend on {}",
                    info.backend_port
                );
                self.adopt(info.backend_port).await;
                return self.endpoint.current();
            }
        }

        if self.discover(DiscoverOptions::default()).await.is_none() {
            // Unblock anyone waiting on resolution; the guess is all we have.
            let guess = self.endpoint.current();
            warn!("discovery: backend not found, falling back to {guess}");
            self.endpoint.set(guess);
        }
        self.endpoint.current()
    }

    /// Scan for the backend.
    ///
    /// Concurrent callers share one scan unless `force` is set. Returns the
    /// port found, or `None` when every round came up empty, in which case
    /// the endpoint is left as it was.
    pub async fn discover(self: &Arc<Self>, opts: DiscoverOptions) -> Option<u16> {
        let this = Arc::clone(self);
        let force = opts.force;
        self.flight
            .run(force, move || async move { this.run_rounds(opts).await })
            .await
            .flatten()
    }

    async fn run_rounds(&self, opts: DiscoverOptions) -> Option<u16> {
        if let Some(delay) = opts.delay {
            tokio::time::sleep(delay).await;
        }
        let max_rounds = opts.max_rounds.unwrap_or(self.config.max_rounds).max(1);
        let retry_delay = opts.retry_delay.unwrap_or(self.config.retry_delay());

        for round in 1..=max_rounds {
            self.rounds.fetch_add(1, Ordering::Relaxed);
            let candidates = candidate_ports(self.preferred_port(), &self.config);
            debug!(
                "discovery: round {round}/{max_rounds}, {} candidates",
                candidates.len()
            );

            if let Some(port) = self.scan(&candidates).await {
                self.adopt(port).await;
                return Some(port);
            }

            if round < max_rounds {
                tokio::time::sleep(retry_delay).await;
            }
        }

        warn!(
            "discovery: no backend answered after {max_rounds} rounds, keeping {}",
            self.endpoint.current()
        );
        None
    }

    /// Probe the first candidate alone, then the rest concurrently.
    async fn scan(&self, candidates: &[u16]) -> Option<u16> {
        let (first, rest) = candidates.split_first()?;
        if self.probe(*first).await {
            return Some(*first);
        }

        let mut probes: FuturesUnordered<_> = rest
            .iter()
            .map(|&port| async move { (port, self.probe(port).await) })
            .collect();
        while let Some((port, healthy)) = probes.next().await {
            if healthy {
                return Some(port);
            }
        }
        None
    }

    /// A port counts only if the health endpoint says `status: "ok"`.
    async fn probe(&self, port: u16) -> bool {
        let url = format!(
            "{}{}",
            self.endpoint.current().with_port(port).http_url(),
            self.config.health_path
        );
        let resp = match self
            .http
            .get(&url)
            .timeout(self.config.probe_timeout())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(_) => return false,
        };
        if resp.status() != StatusCode::OK {
            debug!("discovery: {url} answered {}", resp.status());
            return false;
        }
        match resp.json::<Value>().await {
            Ok(body) => body.get("status").and_then(Value::as_str) == Some("ok"),
            Err(_) => false,
        }
    }

    fn preferred_port(&self) -> Option<u16> {
        self.last_known_port()
            .or_else(|| Some(self.endpoint.current().port))
    }

    fn remember(&self, port: u16) {
        *self.last_known.lock().unwrap_or_else(PoisonError::into_inner) = Some(port);
    }

    async fn adopt(&self, port: u16) {
        self.remember(port);
        if self.endpoint.set_port(port) {
            info!("discovery: backend found on port {port}");
        }
        if self.config.persist {
            if let Err(e) = save_backend_port(self.store.as_ref(), port).await {
                warn!("discovery: failed to persist backend port: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests;
