//! Web UI served from the installation's web root.

use std::path::Path;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Local;
use serde_json::json;
use tower::ServiceExt as _;
use tower_http::services::{ServeDir, ServeFile};

use crate::launcher::Launcher;

const INDEX_FILE: &str = "index.html";
const SERVICE_NAME: &str = "ComfyUI Mobile UI Launcher";

/// Files under the web root; unknown paths get `index.html` so client-side
/// routes keep working.
pub(super) fn web_service(web_root: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(web_root).fallback(ServeFile::new(web_root.join(INDEX_FILE)))
}

/// `index.html` when the UI is installed, otherwise a service description.
pub(super) async fn index(State(launcher): State<Arc<Launcher>>, request: Request) -> Response {
    let index = launcher.web_root().join(INDEX_FILE);
    if index.is_file() {
        return match ServeFile::new(index).oneshot(request).await {
            Ok(response) => response.into_response(),
            Err(never) => match never {},
        };
    }

    Json(json!({
        "service": SERVICE_NAME,
        "status": "ready",
        "web_ui": "not_found",
        "version": launcher.updates().current_version(),
        "tried_path": index.display().to_string(),
        "timestamp": Local::now().to_rfc3339(),
        "instructions": "Install the web UI package or use /api/update/download to fetch it",
    }))
    .into_response()
}
