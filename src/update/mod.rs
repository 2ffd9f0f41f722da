//! Self-update: release check, verified download and staging.

pub mod bootstrap;
mod download;
pub mod github;

use std::fs;
use std::sync::{Arc, Mutex};

use reqwest::Client;
use serde::Serialize;

use crate::archive::extract_package;
use crate::config::LauncherConfig;
use crate::error::{AppError, Result};
use crate::paths::{dir_has_entries, LauncherPaths};

pub use bootstrap::{apply_staged_update, publish_version_to_web, BootstrapOutcome};
pub use github::{compare_versions, is_newer, GitHubRelease};

const USER_AGENT: &str = concat!("comfy-launcher/", env!("CARGO_PKG_VERSION"));
const UNKNOWN_VERSION: &str = "0.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePhase {
    Idle,
    Downloading,
    Verifying,
    Extracting,
    StagingReady,
    Error,
}

#[derive(Debug)]
struct UpdateState {
    phase: UpdatePhase,
    progress: u8,
    last_error: Option<String>,
    busy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateCheck {
    pub has_update: bool,
    pub latest_version: String,
    pub current_version: String,
    pub release_notes: String,
    pub published_at: Option<String>,
    pub asset_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateStatus {
    pub status: &'static str,
    pub phase: UpdatePhase,
    pub is_downloading: bool,
    pub progress: u8,
    pub last_error: Option<String>,
    pub staging_ready: bool,
    pub current_version: String,
}

/// Checks the release feed and stages downloaded packages. At most one
/// download runs at a time.
pub struct UpdateManager {
    client: Client,
    paths: LauncherPaths,
    feed_url: String,
    package_extension: String,
    state: Mutex<UpdateState>,
}

impl UpdateManager {
    pub fn new(paths: LauncherPaths, config: &LauncherConfig) -> Result<Arc<Self>> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Arc::new(Self {
            client,
            paths,
            feed_url: config.release_feed_url.clone(),
            package_extension: config.package_extension.clone(),
            state: Mutex::new(UpdateState {
                phase: UpdatePhase::Idle,
                progress: 0,
                last_error: None,
                busy: false,
            }),
        }))
    }

    /// Installed version from `version.json`, `0.0.0` when absent.
    pub fn current_version(&self) -> String {
        bootstrap::read_version(&self.paths.version_file())
            .unwrap_or_else(|| UNKNOWN_VERSION.to_string())
    }

    pub async fn check_for_update(&self) -> Result<UpdateCheck> {
        let release = github::fetch_latest_release(&self.client, &self.feed_url).await?;
        let current_version = self.current_version();
        let latest_version = release.version().to_string();
        let has_update = is_newer(&latest_version, &current_version);
        let asset_url = github::find_package_asset(&release.assets, &self.package_extension)
            .map(|asset| asset.browser_download_url.clone());

        log::info!(
            "Update check: current {current_version}, latest {latest_version} (update available: {has_update})"
        );

        Ok(UpdateCheck {
            has_update,
            latest_version,
            current_version,
            release_notes: release.body.unwrap_or_default(),
            published_at: release.published_at,
            asset_url,
        })
    }

    /// Begin a background download. Returns `false` if one is already running.
    pub fn start_download(self: &Arc<Self>, url: String, expected_sha256: Option<String>) -> bool {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if state.busy {
                return false;
            }
            state.busy = true;
            state.phase = UpdatePhase::Downloading;
            state.progress = 0;
            state.last_error = None;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.run_download(&url, expected_sha256.as_deref()).await;
            let mut state = this.state.lock().unwrap_or_else(|e| e.into_inner());
            state.busy = false;
            match result {
                Ok(()) => {
                    state.phase = UpdatePhase::StagingReady;
                    state.progress = 100;
                    drop(state);
                    log::info!("Update staged, restart the launcher to apply it");
                }
                Err(e) => {
                    state.phase = UpdatePhase::Error;
                    state.last_error = Some(e.to_string());
                    drop(state);
                    log::error!("Update download failed: {e}");
                }
            }
        });
        true
    }

    fn set_phase(&self, phase: UpdatePhase) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.phase = phase;
    }

    fn set_progress(&self, progress: u8) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.progress = progress;
    }

    async fn run_download(&self, url: &str, expected_sha256: Option<&str>) -> Result<()> {
        let staging = self.paths.staging_dir();
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;

        let archive = self.paths.staged_archive();
        log::info!("Downloading update from {url}");
        let actual = download::download_file(&self.client, url, &archive, |p| {
            self.set_progress(p);
        })
        .await?;

        self.set_phase(UpdatePhase::Verifying);
        if let Some(expected) = expected_sha256 {
            if !actual.eq_ignore_ascii_case(expected) {
                if let Err(e) = fs::remove_file(&archive) {
                    log::warn!("Failed to remove rejected archive: {e}");
                }
                return Err(AppError::integrity(expected, &actual));
            }
            log::info!("SHA-256 verified: {actual}");
        } else {
            log::info!("No checksum supplied, downloaded SHA-256 is {actual}");
        }

        self.set_phase(UpdatePhase::Extracting);
        let report = tokio::task::spawn_blocking(move || -> Result<_> {
            let report = extract_package(&archive, &staging)?;
            fs::remove_file(&archive)?;
            Ok(report)
        })
        .await
        .map_err(|e| AppError::other(format!("Extraction task failed: {e}")))??;

        log::info!(
            "Extracted {} files into staging{}",
            report.files,
            report
                .hoisted_root
                .map(|root| format!(" (hoisted '{root}/')"))
                .unwrap_or_default()
        );
        Ok(())
    }

    pub fn status(&self) -> UpdateStatus {
        let (phase, progress, last_error, busy) = {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.phase, state.progress, state.last_error.clone(), state.busy)
        };
        let staging_ready =
            dir_has_entries(&self.paths.staging_dir()) && !self.paths.staged_archive().exists();

        let status = if last_error.is_some() {
            "error"
        } else if busy {
            "downloading"
        } else if staging_ready {
            "ready_to_restart"
        } else {
            "idle"
        };

        UpdateStatus {
            status,
            phase,
            is_downloading: busy,
            progress,
            last_error,
            staging_ready,
            current_version: self.current_version(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::routing::get;
    use axum::{Json, Router};
    use sha2::{Digest as _, Sha256};

    use super::*;
    use crate::archive::write_test_zip;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn package_bytes(dir: &std::path::Path) -> Vec<u8> {
        let path = dir.join("fixture.zip");
        write_test_zip(
            &path,
            &[
                ("pkg/", None),
                ("pkg/web/index.html", Some(b"<html/>")),
                ("pkg/version.json", Some(br#"{"version":"1.3.0"}"#)),
            ],
        );
        fs::read(path).unwrap()
    }

    fn manager(root: &std::path::Path, feed_url: String) -> Arc<UpdateManager> {
        let config = LauncherConfig {
            release_feed_url: feed_url,
            ..LauncherConfig::default()
        };
        UpdateManager::new(LauncherPaths::new(root), &config).unwrap()
    }

    async fn wait_idle(manager: &UpdateManager) -> UpdateStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = manager.status();
                if !status.is_downloading {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        })
        .await
        .expect("download did not finish")
    }

    #[tokio::test]
    async fn check_reports_newer_release() {
        let tmp = tempfile::tempdir().unwrap();
        let base = serve(Router::new().route(
            "/latest",
            get(|| async {
                Json(serde_json::json!({
                    "tag_name": "v1.3.0",
                    "body": "notes",
                    "published_at": "2026-01-01T00:00:00Z",
                    "assets": [
                        {"name": "sums.txt", "browser_download_url": "https://x/sums.txt"},
                        {"name": "ui.zip", "browser_download_url": "https://x/ui.zip"}
                    ]
                }))
            }),
        ))
        .await;
        let manager = manager(tmp.path(), format!("{base}/latest"));

        fs::write(tmp.path().join("version.json"), r#"{"version":"1.2.9"}"#).unwrap();
        let check = manager.check_for_update().await.unwrap();
        assert!(check.has_update);
        assert_eq!(check.latest_version, "1.3.0");
        assert_eq!(check.current_version, "1.2.9");
        assert_eq!(check.release_notes, "notes");
        assert_eq!(check.asset_url.as_deref(), Some("https://x/ui.zip"));

        fs::write(tmp.path().join("version.json"), r#"{"version":"1.3.0"}"#).unwrap();
        assert!(!manager.check_for_update().await.unwrap().has_update);
    }

    #[tokio::test]
    async fn feed_failure_is_a_network_error() {
        let tmp = tempfile::tempdir().unwrap();
        let base = serve(Router::new()).await;
        let manager = manager(tmp.path(), format!("{base}/missing"));
        let err = manager.check_for_update().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Network);
    }

    #[tokio::test]
    async fn verified_package_is_staged_with_root_hoisted() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = package_bytes(tmp.path());
        let sha = hex::encode(Sha256::digest(&bytes)).to_uppercase();
        let base = serve(Router::new().route("/pkg.zip", get(move || async move { bytes }))).await;
        let manager = manager(tmp.path(), String::new());

        assert!(manager.start_download(format!("{base}/pkg.zip"), Some(sha)));
        let status = wait_idle(&manager).await;

        assert_eq!(status.phase, UpdatePhase::StagingReady);
        assert_eq!(status.status, "ready_to_restart");
        assert_eq!(status.progress, 100);
        assert!(status.staging_ready);
        let staging = tmp.path().join(".update_staging");
        assert!(staging.join("web/index.html").exists());
        assert!(staging.join("version.json").exists());
        assert!(!staging.join("update.zip").exists());
    }

    #[tokio::test]
    async fn hash_mismatch_stops_before_extraction() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = package_bytes(tmp.path());
        let base = serve(Router::new().route("/pkg.zip", get(move || async move { bytes }))).await;
        let manager = manager(tmp.path(), String::new());
        let wrong = "0".repeat(64);

        assert!(manager.start_download(format!("{base}/pkg.zip"), Some(wrong.clone())));
        let status = wait_idle(&manager).await;

        assert_eq!(status.phase, UpdatePhase::Error);
        assert_eq!(status.status, "error");
        assert!(!status.staging_ready);
        let error = status.last_error.unwrap();
        assert!(error.contains(&wrong));
        assert!(error.contains("actual="));
        let staging = tmp.path().join(".update_staging");
        assert!(!staging.join("version.json").exists());
        assert!(!staging.join("web").exists());
    }

    #[tokio::test]
    async fn second_download_is_rejected_while_busy() {
        let tmp = tempfile::tempdir().unwrap();
        let base = serve(Router::new().route(
            "/slow.zip",
            get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Vec::<u8>::new()
            }),
        ))
        .await;
        let manager = manager(tmp.path(), String::new());

        assert!(manager.start_download(format!("{base}/slow.zip"), None));
        assert!(!manager.start_download(format!("{base}/slow.zip"), None));
        assert_eq!(manager.status().status, "downloading");

        // An empty body is not a zip: the attempt ends in an error.
        let status = wait_idle(&manager).await;
        assert_eq!(status.phase, UpdatePhase::Error);
    }

    #[test]
    fn current_version_defaults_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = manager(tmp.path(), String::new());
        assert_eq!(manager.current_version(), "0.0.0");
        assert_eq!(manager.status().status, "idle");
    }
}
