//! Control API: JSON endpoints plus the static web UI.

mod handlers;
mod static_files;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};
use axum::http::{Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::launcher::Launcher;

pub fn router(launcher: Arc<Launcher>) -> Router {
    let web = static_files::web_service(&launcher.web_root());

    Router::new()
        .route("/", get(static_files::index))
        .route("/api/status", get(handlers::status))
        .route("/status", get(handlers::status))
        .route("/api/logs", get(handlers::logs))
        .route("/logs", get(handlers::logs))
        .route("/api/ping", get(handlers::ping))
        .route("/api/update/check", get(handlers::update_check))
        .route("/api/update/status", get(handlers::update_status))
        .route("/api/update/download", post(handlers::update_download))
        .route("/api/restart", post(handlers::restart))
        .route("/restart", post(handlers::restart))
        .route("/api/shutdown", post(handlers::shutdown))
        .route("/shutdown", post(handlers::shutdown))
        .fallback_service(web)
        .layer(middleware::from_fn(preflight))
        .layer(CorsLayer::permissive())
        .with_state(launcher)
}

/// Answer every `OPTIONS` request, preflight or not.
async fn preflight(request: Request, next: Next) -> Response {
    if request.method() != Method::OPTIONS {
        return next.run(request).await;
    }
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (ACCESS_CONTROL_ALLOW_METHODS, "GET, POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Accept, Authorization"),
        ],
    )
        .into_response()
}
