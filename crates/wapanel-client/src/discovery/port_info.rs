//! Port-info document written by the desktop launcher.
//!
//! `{"frontendPort": 3000, "backendPort": 3001}`, either as a file on disk or
//! served over HTTP next to the frontend.

use reqwest::header::{CACHE_CONTROL, PRAGMA};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;
use wapanel_core::config::shellexpand;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortInfo {
    #[serde(default)]
    pub frontend_port: Option<u16>,
    pub backend_port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortInfoSource {
    File(PathBuf),
    Url(String),
}

impl PortInfoSource {
    /// Interpret the configured location. Blank means none.
    pub fn from_config(location: &str) -> Option<Self> {
        let location = location.trim();
        if location.is_empty() {
            return None;
        }
        if location.starts_with("http://") || location.starts_with("https://") {
            Some(Self::Url(location.to_string()))
        } else {
            Some(Self::File(PathBuf::from(shellexpand(location))))
        }
    }
}

/// Read the document. Missing, unreadable, or malformed documents yield `None`.
pub async fn read_port_info(
    source: &PortInfoSource,
    http: &reqwest::Client,
    timeout: Duration,
) -> Option<PortInfo> {
    let raw = match source {
        PortInfoSource::File(path) => match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) => {
                debug!("discovery: no port info at {}: {e}", path.display());
                return None;
            }
        },
        PortInfoSource::Url(url) => {
            let resp = http
                .get(url)
                .header(CACHE_CONTROL, "no-cache")
                .header(PRAGMA, "no-cache")
                .timeout(timeout)
                .send()
                .await
                .ok()?;
            if !resp.status().is_success() {
                debug!("discovery: port info at {url} returned {}", resp.status());
                return None;
            }
            resp.text().await.ok()?
        }
    };

    match serde_json::from_str::<PortInfo>(&raw) {
        Ok(info) if info.backend_port != 0 => Some(info),
        Ok(_) => None,
        Err(e) => {
            debug!("discovery: malformed port info: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_from_config() {
        assert_eq!(PortInfoSource::from_config("  "), None);
        assert_eq!(
            PortInfoSource::from_config("http://127.0.0.1:3000/.port-info.json"),
            Some(PortInfoSource::Url(
                "http://127.0.0.1:3000/.port-info.json".into()
            ))
        );
        assert_eq!(
            PortInfoSource::from_config("/tmp/ports.json"),
            Some(PortInfoSource::File(PathBuf::from("/tmp/ports.json")))
        );
    }

    #[tokio::test]
    async fn test_read_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ports.json");
        std::fs::write(&path, r#"{"frontendPort": 3000, "backendPort": 3004}"#).unwrap();

        let info = read_port_info(
            &PortInfoSource::File(path),
            &reqwest::Client::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(info.backend_port, 3004);
        assert_eq!(info.frontend_port, Some(3000));
    }

    #[tokio::test]
    async fn test_missing_or_malformed_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(1);

        let missing = PortInfoSource::File(dir.path().join("nope.json"));
        assert!(read_port_info(&missing, &client, timeout).await.is_none());

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{\"backendPort\": \"x\"}").unwrap();
        let bad = PortInfoSource::File(path);
        assert!(read_port_info(&bad, &client, timeout).await.is_none());

        let path = dir.path().join("zero.json");
        std::fs::write(&path, "{\"backendPort\": 0}").unwrap();
        let zero = PortInfoSource::File(path);
        assert!(read_port_info(&zero, &client, timeout).await.is_none());
    }
}
