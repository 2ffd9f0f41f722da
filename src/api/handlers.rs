use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, Request, State};
use axum::Json;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, Result};
use crate::launcher::{Launcher, StatusReport};
use crate::logging::{LogsSnapshot, API_TARGET};
use crate::restart::RestartAttempt;
use crate::update::{UpdateCheck, UpdateStatus};
use crate::validation::{normalize_sha256, validate_asset_url};

const DEFAULT_LOG_LIMIT: usize = 50;

type LauncherState = State<Arc<Launcher>>;

fn now() -> String {
    Local::now().to_rfc3339()
}

pub(super) async fn status(State(launcher): LauncherState) -> Json<StatusReport> {
    Json(launcher.status_report().await)
}

#[derive(Debug, Deserialize)]
pub(super) struct LogsQuery {
    limit: Option<usize>,
}

pub(super) async fn logs(
    State(launcher): LauncherState,
    Query(query): Query<LogsQuery>,
) -> Json<LogsSnapshot> {
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let log_file = launcher.paths().launcher_log();
    Json(launcher.logs().snapshot(limit, Some(&log_file)))
}

pub(super) async fn ping() -> Json<Value> {
    Json(json!({ "status": "pong", "timestamp": now() }))
}

pub(super) async fn update_check(State(launcher): LauncherState) -> Result<Json<UpdateCheck>> {
    Ok(Json(launcher.updates().check_for_update().await?))
}

pub(super) async fn update_status(State(launcher): LauncherState) -> Json<UpdateStatus> {
    Json(launcher.updates().status())
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    asset_url: Option<String>,
    sha256: Option<String>,
}

/// The body is parsed by hand so malformed JSON gets the same envelope as
/// every other rejection.
pub(super) async fn update_download(
    State(launcher): LauncherState,
    body: Bytes,
) -> Result<Json<Value>> {
    let request: DownloadRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON body: {e}")))?;
    let asset_url = request
        .asset_url
        .filter(|url| !url.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("Missing asset_url"))?;
    let url = validate_asset_url(&asset_url)?;
    let sha256 = normalize_sha256(request.sha256.as_deref())?;

    log::info!(target: API_TARGET, "Update download requested: {url}");
    let body = if launcher.updates().start_download(url.to_string(), sha256) {
        json!({ "success": true, "message": "Download started" })
    } else {
        json!({ "success": false, "message": "Download already in progress" })
    };
    Ok(Json(body))
}

#[derive(Debug, Serialize)]
pub(super) struct RestartResponse {
    success: bool,
    message: &'static str,
    reason: Option<&'static str>,
    timestamp: String,
    #[serde(flatten)]
    attempt: RestartAttempt,
}

pub(super) async fn restart(
    State(launcher): LauncherState,
    request: Request,
) -> Result<Json<RestartResponse>> {
    let from = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map_or_else(|| "unknown".to_string(), |ConnectInfo(addr)| addr.ip().to_string());
    log::info!(target: API_TARGET, "Restart API called from {from}");

    let attempt = launcher.manual_restart().await?;
    let success = attempt.is_success();
    Ok(Json(RestartResponse {
        success,
        message: if success {
            "Restart sequence completed"
        } else {
            "Restart sequence failed"
        },
        reason: attempt.outcome.reason(),
        timestamp: now(),
        attempt,
    }))
}

pub(super) async fn shutdown(State(launcher): LauncherState) -> Json<Value> {
    log::info!(target: API_TARGET, "Shutdown requested via API");
    launcher.request_shutdown();
    Json(json!({
        "success": true,
        "message": "Launcher shutdown requested",
        "timestamp": now(),
    }))
}
