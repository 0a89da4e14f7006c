//! REST surface of the dashboard (§4.9): service listing, log retrieval,
//! and the start/stop/restart verbs, plus the static UI fallback.
//!
//! Grounded in the teacher's thin `State`-extracting handler shape in
//! `interfaces/http/modules/monitoring/handlers.rs` — match the inner
//! call, wrap `Ok` and `Err` into a small response envelope — stripped of
//! its `#[utoipa::path(...)]` annotations (utoipa isn't part of this
//! crate's dependency stack).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::controller::ServiceController;
use crate::domain::log_entry::Level;
use crate::domain::registry_entry::{RegistryEntry, Status};
use crate::domain::service::Language;
use crate::logs::{file_sink, LogManager};
use crate::support::id::is_valid_service_name;
use crate::support::DomainError;

use super::ws::{self, WsHub};

const PLACEHOLDER_INDEX: &str = include_str!("placeholder_index.html");

/// Shared state for every dashboard route, including the WebSocket hub
/// (§4.9's REST and WS surfaces share one `ServiceController`/`LogManager`
/// pair).
#[derive(Clone)]
pub struct DashboardState {
    pub controller: Arc<ServiceController>,
    pub log_manager: Arc<LogManager>,
    pub ws_hub: Arc<WsHub>,
    pub static_dir: Option<PathBuf>,
}

/// A manifest service merged with its registry entry — `not-running` when
/// the registry has never seen it (§6: `GET /api/services`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInfo {
    #[serde(flatten)]
    pub entry: RegistryEntry,
    pub workdir: String,
}

#[derive(Debug, Serialize)]
struct ServicesResponse {
    services: Vec<ServiceInfo>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse {
    pub success: bool,
    pub message: String,
    pub duration_ms: u128,
}

pub fn router(state: DashboardState) -> Router {
    let api = Router::new()
        .route("/api/services", get(get_services))
        .route("/api/logs/{name}", get(get_logs))
        .route("/api/ws", get(ws::ws_handler))
        .route("/api/services/{name}/{op}", post(post_service_op))
        .with_state(state.clone());

    let app = match &state.static_dir {
        Some(dir) if dir.is_dir() => api.fallback_service(ServeDir::new(dir)),
        _ => api.fallback(placeholder_ui),
    };

    app.layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive())
}

async fn placeholder_ui() -> Html<&'static str> {
    Html(PLACEHOLDER_INDEX)
}

async fn get_services(State(state): State<DashboardState>) -> Json<ServicesResponse> {
    Json(ServicesResponse {
        services: build_service_infos(&state.controller),
    })
}

/// Builds the merged manifest+registry view every manifest service gets in
/// `GET /api/services` (§4.9) and in the WS hub's initial snapshot.
pub fn build_service_infos(controller: &Arc<ServiceController>) -> Vec<ServiceInfo> {
    controller
        .manifest()
        .service_names()
        .into_iter()
        .map(|name| {
            let workdir = controller
                .manifest()
                .workdir_for(name)
                .unwrap_or_default();
            let entry = controller
                .status(name)
                .unwrap_or_else(|| stub_entry(controller, name, &workdir));
            ServiceInfo {
                entry,
                workdir: workdir.display().to_string(),
            }
        })
        .collect()
}

fn stub_entry(controller: &Arc<ServiceController>, name: &str, workdir: &std::path::Path) -> RegistryEntry {
    let service = controller.manifest().service_for(name);
    RegistryEntry {
        name: name.to_string(),
        project_dir: workdir.display().to_string(),
        pid: 0,
        port: 0,
        url: None,
        deployment_url: None,
        language: service.as_ref().map(|s| s.language).unwrap_or(Language::Other),
        framework: None,
        status: Status::NotRunning,
        start_time: Utc::now(),
        last_checked: Utc::now(),
        exit_code: None,
        end_time: None,
        kind: "service".to_string(),
        mode: service.map(|s| s.mode).unwrap_or_default(),
    }
}

#[derive(Debug, Deserialize)]
struct LogQuery {
    tail: Option<usize>,
    since: Option<String>,
    level: Option<String>,
}

async fn get_logs(
    State(state): State<DashboardState>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Response {
    if !is_valid_service_name(&name) {
        return (StatusCode::BAD_REQUEST, "invalid service name").into_response();
    }

    let mut entries = if let Some(buffer) = state.log_manager.get_buffer(&name) {
        match &query.since {
            Some(raw) => match parse_duration_since(raw) {
                Some(since) => buffer.since(since),
                None => return (StatusCode::BAD_REQUEST, "invalid since duration").into_response(),
            },
            None => buffer.recent(query.tail.unwrap_or(100)),
        }
    } else {
        let log_dir = state.log_manager.project_dir().join(".azure").join("logs");
        file_sink::read_all(&log_dir, &name).await.unwrap_or_default()
    };

    if let Some(level_raw) = &query.level {
        match parse_level(level_raw) {
            Some(level) => entries.retain(|e| e.level == level),
            None => return (StatusCode::BAD_REQUEST, "invalid level").into_response(),
        }
    }

    if let Some(tail) = query.tail {
        if entries.len() > tail {
            let start = entries.len() - tail;
            entries = entries.split_off(start);
        }
    }

    let body = entries
        .iter()
        .filter_map(|e| serde_json::to_string(e).ok())
        .collect::<Vec<_>>()
        .join("\n");

    ([(axum::http::header::CONTENT_TYPE, "application/x-ndjson")], body).into_response()
}

fn parse_duration_since(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.len() < 2 {
        return None;
    }
    let (number_part, unit) = raw.split_at(raw.len() - 1);
    let amount: i64 = number_part.parse().ok()?;
    let duration = match unit {
        "s" => ChronoDuration::seconds(amount),
        "m" => ChronoDuration::minutes(amount),
        "h" => ChronoDuration::hours(amount),
        "d" => ChronoDuration::days(amount),
        _ => return None,
    };
    Some(Utc::now() - duration)
}

fn parse_level(raw: &str) -> Option<Level> {
    match raw.to_ascii_uppercase().as_str() {
        "INFO" => Some(Level::Info),
        "WARN" | "WARNING" => Some(Level::Warn),
        "ERROR" => Some(Level::Error),
        "DEBUG" => Some(Level::Debug),
        _ => None,
    }
}

async fn post_service_op(
    State(state): State<DashboardState>,
    Path((name, op)): Path<(String, String)>,
) -> (StatusCode, Json<OperationResponse>) {
    let start = Instant::now();
    let result = match op.as_str() {
        "start" => state.controller.start(&name).await,
        "stop" => state.controller.stop(&name).await,
        "restart" => state.controller.restart(&name).await,
        other => {
            return (
                StatusCode::BAD_REQUEST,
                Json(OperationResponse {
                    success: false,
                    message: format!("unknown operation '{other}'"),
                    duration_ms: 0,
                }),
            )
        }
    };
    let duration_ms = start.elapsed().as_millis();

    match result {
        Ok(()) => (
            StatusCode::OK,
            Json(OperationResponse {
                success: true,
                message: format!("{op} succeeded"),
                duration_ms,
            }),
        ),
        Err(e) => (
            status_for(&e),
            Json(OperationResponse {
                success: false,
                message: e.to_string(),
                duration_ms,
            }),
        ),
    }
}

fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::Busy { .. } => StatusCode::CONFLICT,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::InvalidServiceName(_)
        | DomainError::AlreadyRunning(_)
        | DomainError::NotRunning(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_suffixes() {
        let now = Utc::now();
        let since = parse_duration_since("10m").unwrap();
        assert!(since < now);
        assert!((now - since).num_minutes() >= 9);
        assert!(parse_duration_since("bogus").is_none());
        assert!(parse_duration_since("").is_none());
    }

    #[test]
    fn parses_level_case_insensitively_and_maps_warning() {
        assert_eq!(parse_level("error"), Some(Level::Error));
        assert_eq!(parse_level("WARNING"), Some(Level::Warn));
        assert_eq!(parse_level("nonsense"), None);
    }

    #[test]
    fn status_for_maps_busy_to_conflict() {
        assert_eq!(
            status_for(&DomainError::Busy {
                service: "web".to_string(),
                op: "start"
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&DomainError::NotFound("web".to_string())),
            StatusCode::NOT_FOUND
        );
    }
}
