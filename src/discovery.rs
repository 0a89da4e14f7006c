//! External discovery client (§4.9, §6): how an out-of-process caller (the
//! `devrigd-cli` binary, or any other tool) finds a running dashboard for a
//! project directory and talks to it, without needing to know whether a
//! `devrigd` process is even running.
//!
//! Grounded in the teacher's outbound HTTP client shape
//! (`reqwest::Client` built once with a fixed timeout, JSON in/out) and its
//! `tokio-tungstenite`-based outbound WebSocket dial for streaming
//! consumption. This is a separate client from the dashboard's own
//! `axum` `ws` feature — that's the server side of the same protocol,
//! this is the client side used by code that isn't the dashboard itself.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dashboard::rest::{OperationResponse, ServiceInfo};
use crate::domain::log_entry::LogEntry;
use crate::logs::file_sink;
use crate::support::InfraError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What the dashboard server writes to `<project_dir>/.azure/dashboard.json`
/// on startup, and removes on a clean stop, so any later process can find
/// it without guessing a port.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryInfo {
    pub url: String,
    pub pid: u32,
    #[serde(rename = "startedAt", with = "crate::support::timestamp")]
    pub started_at: DateTime<Utc>,
}

pub fn discovery_file_path(project_dir: &Path) -> PathBuf {
    project_dir.join(".azure").join("dashboard.json")
}

pub async fn write_discovery_file(project_dir: &Path, info: &DiscoveryInfo) -> Result<(), InfraError> {
    let path = discovery_file_path(project_dir);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(info)?;
    tokio::fs::write(&path, bytes).await?;
    Ok(())
}

pub async fn remove_discovery_file(project_dir: &Path) {
    let path = discovery_file_path(project_dir);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove dashboard discovery file");
        }
    }
}

/// Reads and parses the discovery file for `project_dir`, if one exists.
/// Does not verify the recorded pid is still alive — callers should treat a
/// failed `ping()` as "stale, fall back to a local controller".
pub async fn read_discovery_file(project_dir: &Path) -> Option<DiscoveryInfo> {
    let path = discovery_file_path(project_dir);
    let bytes = tokio::fs::read(&path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Thin REST/WS client against a running dashboard, used by `devrigctl` to
/// prefer an already-running `devrigd` over constructing its own
/// controller (§4.9: "an out-of-process caller ... forwards to whichever
/// dashboard is already running for that project").
pub struct DiscoveryClient {
    base_url: String,
    http: reqwest::Client,
}

impl DiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// `true` if the dashboard answers `GET /api/services` within the
    /// request timeout — used to decide whether a discovery file is stale.
    pub async fn ping(&self) -> bool {
        self.http
            .get(format!("{}/api/services", self.base_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    pub async fn get_services(&self) -> Result<Vec<ServiceInfo>, reqwest::Error> {
        #[derive(Deserialize)]
        struct ServicesResponse {
            services: Vec<ServiceInfo>,
        }
        let response: ServicesResponse = self
            .http
            .get(format!("{}/api/services", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(response.services)
    }

    pub async fn trigger_operation(
        &self,
        name: &str,
        op: &str,
    ) -> Result<OperationResponse, reqwest::Error> {
        self.http
            .post(format!("{}/api/services/{name}/{op}", self.base_url))
            .send()
            .await?
            .json()
            .await
    }

    pub async fn get_logs(&self, name: &str, tail: usize) -> Result<Vec<LogEntry>, reqwest::Error> {
        let body = self
            .http
            .get(format!("{}/api/logs/{name}", self.base_url))
            .query(&[("tail", tail.to_string())])
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(body
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

/// Streams log entries for `name` from a running dashboard's WebSocket
/// endpoint until the connection closes, calling `on_entry` for every
/// matching `log` message. Used by `devrigctl logs --follow`.
pub async fn stream_logs<F>(
    base_url: &str,
    name: &str,
    mut on_entry: F,
) -> Result<(), tokio_tungstenite::tungstenite::Error>
where
    F: FnMut(LogEntry),
{
    let ws_url = format!(
        "{}/api/ws?services={name}",
        base_url.replacen("http", "ws", 1)
    );
    let (stream, _) = tokio_tungstenite::connect_async(ws_url).await?;
    let (_, mut read) = stream.split();

    #[derive(Deserialize)]
    #[serde(tag = "type", rename_all = "lowercase")]
    enum Frame {
        Log { entry: LogEntry },
        #[serde(other)]
        Other,
    }

    while let Some(message) = read.next().await {
        let message = message?;
        if let tokio_tungstenite::tungstenite::Message::Text(text) = message {
            if let Ok(Frame::Log { entry }) = serde_json::from_str::<Frame>(&text) {
                on_entry(entry);
            }
        }
    }
    Ok(())
}

/// Fallback log read for when no dashboard is reachable: reads straight
/// from the rotating log files on disk (§4.9: the CLI can always fall back
/// to the same files the dashboard itself reads when no in-memory buffer
/// is warm).
pub async fn read_logs_from_files(project_dir: &Path, name: &str) -> Result<Vec<LogEntry>, InfraError> {
    let log_dir = project_dir.join(".azure").join("logs");
    file_sink::read_all(&log_dir, name).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discovery_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let info = DiscoveryInfo {
            url: "http://127.0.0.1:4000".to_string(),
            pid: 1234,
            started_at: Utc::now(),
        };
        write_discovery_file(dir.path(), &info).await.unwrap();
        let read_back = read_discovery_file(dir.path()).await.unwrap();
        assert_eq!(read_back.url, info.url);
        assert_eq!(read_back.pid, info.pid);
    }

    #[tokio::test]
    async fn missing_discovery_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_discovery_file(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn remove_discovery_file_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        remove_discovery_file(dir.path()).await;
        let info = DiscoveryInfo {
            url: "http://127.0.0.1:4000".to_string(),
            pid: 1,
            started_at: Utc::now(),
        };
        write_discovery_file(dir.path(), &info).await.unwrap();
        remove_discovery_file(dir.path()).await;
        assert!(read_discovery_file(dir.path()).await.is_none());
    }
}
