use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::paths::LauncherPaths;

const DEFAULT_RELEASE_FEED: &str =
    "https://api.github.com/repos/jaeone94/comfy-mobile-ui/releases/latest";

/// Load the launcher config, writing the defaults on first run.
pub fn load_config(path: &Path) -> Result<LauncherConfig> {
    if !path.exists() {
        let config = LauncherConfig::default();
        save_config(path, &config)?;
        return Ok(config);
    }
    let content = fs::read_to_string(path).map_err(|e| AppError::config(e.to_string()))?;
    toml::from_str(&content).map_err(|e| AppError::config(e.to_string()))
}

pub fn save_config(path: &Path, config: &LauncherConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::config(e.to_string()))?;
    }
    let content = toml::to_string_pretty(config).map_err(|e| AppError::config(e.to_string()))?;
    fs::write(path, content).map_err(|e| AppError::config(e.to_string()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LauncherConfig {
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    #[serde(default = "default_initial_check_interval")]
    pub initial_check_interval_secs: u64,
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_release_feed")]
    pub release_feed_url: String,
    #[serde(default = "default_package_extension")]
    pub package_extension: String,
    #[serde(default = "default_web_dir")]
    pub web_dir: String,
    /// Accept `r` + Enter on an interactive terminal.
    #[serde(default = "default_console")]
    pub console: bool,
    /// Extra substrings that must never appear in the worker's arguments.
    #[serde(default)]
    pub self_markers: Vec<String>,
    #[serde(default)]
    pub restart: RestartTimings,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    9188
}

fn default_log_buffer_size() -> usize {
    200
}

fn default_check_interval() -> u64 {
    30
}

fn default_initial_check_interval() -> u64 {
    5
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_release_feed() -> String {
    DEFAULT_RELEASE_FEED.to_string()
}

fn default_package_extension() -> String {
    ".zip".to_string()
}

fn default_web_dir() -> String {
    "web".to_string()
}

fn default_console() -> bool {
    true
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            api_host: default_api_host(),
            api_port: default_api_port(),
            log_buffer_size: default_log_buffer_size(),
            check_interval_secs: default_check_interval(),
            initial_check_interval_secs: default_initial_check_interval(),
            probe_timeout_secs: default_probe_timeout(),
            release_feed_url: default_release_feed(),
            package_extension: default_package_extension(),
            web_dir: default_web_dir(),
            console: default_console(),
            self_markers: Vec::new(),
            restart: RestartTimings::default(),
        }
    }
}

impl LauncherConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn initial_check_interval(&self) -> Duration {
        Duration::from_secs(self.initial_check_interval_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Timings of the restart sequence, in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartTimings {
    pub clean_shutdown_wait_ms: u64,
    pub alive_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub responsive_window_ms: u64,
    pub output_tail_chars: usize,
}

impl Default for RestartTimings {
    fn default() -> Self {
        Self {
            clean_shutdown_wait_ms: 3_000,
            alive_settle_ms: 2_000,
            poll_interval_ms: 2_000,
            responsive_window_ms: 45_000,
            output_tail_chars: 500,
        }
    }
}

impl RestartTimings {
    pub fn clean_shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.clean_shutdown_wait_ms)
    }

    pub fn alive_settle(&self) -> Duration {
        Duration::from_millis(self.alive_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn responsive_window(&self) -> Duration {
        Duration::from_millis(self.responsive_window_ms)
    }
}

/// Worker launch arguments recorded by the host at its own startup.
///
/// `args`, `script` and `port` are mandatory: without them the launcher
/// cannot reconstruct the worker's invocation and refuses to run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LaunchSnapshot {
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub saved_at: String,
    pub script: String,
    pub port: u16,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub pid: Option<u32>,
}

/// Certificate/key pair the worker was launched with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub key: PathBuf,
    pub cert: PathBuf,
}

impl LaunchSnapshot {
    pub fn load(paths: &LauncherPaths) -> Result<Self> {
        let path = paths.launch_snapshot();
        let name = path.display().to_string();
        if !path.exists() {
            return Err(AppError::config(format!(
                "Worker launch snapshot not found: {name}"
            )));
        }
        let content = fs::read_to_string(&path).map_err(|e| AppError::config(e.to_string()))?;
        let raw: serde_json::Value = serde_json::from_str(&content)?;
        for field in ["args", "script", "port"] {
            if raw.get(field).is_none() {
                return Err(AppError::missing_field(&name, field));
            }
        }
        Ok(serde_json::from_value(raw)?)
    }

    /// Overwrite the snapshot file.
    pub fn save(&self, paths: &LauncherPaths) -> Result<()> {
        paths.ensure_root()?;
        let content = serde_json::to_string_pretty(self)?;
        fs::write(paths.launch_snapshot(), content).map_err(|e| AppError::config(e.to_string()))
    }

    /// Interpreter used to run the worker script.
    pub fn interpreter(&self) -> String {
        self.interpreter.clone().unwrap_or_else(default_interpreter)
    }

    /// Working directory the worker was launched from.
    pub fn working_dir(&self, paths: &LauncherPaths) -> PathBuf {
        self.cwd
            .clone()
            .unwrap_or_else(|| paths.root().to_path_buf())
    }

    /// Script path, resolved against the working directory when it exists there.
    pub fn resolved_script(&self, paths: &LauncherPaths) -> PathBuf {
        let candidate = self.working_dir(paths).join(&self.script);
        if candidate.exists() {
            candidate
        } else {
            PathBuf::from(&self.script)
        }
    }

    /// TLS key/cert options from the worker's own launch arguments.
    pub fn tls_files(&self) -> Option<TlsFiles> {
        let mut key = None;
        let mut cert = None;
        let mut iter = self.args.iter();
        while let Some(arg) = iter.next() {
            if let Some(value) = arg.strip_prefix("--tls-keyfile=") {
                key = Some(PathBuf::from(value));
            } else if let Some(value) = arg.strip_prefix("--tls-certfile=") {
                cert = Some(PathBuf::from(value));
            } else if arg == "--tls-keyfile" {
                key = iter.next().map(PathBuf::from);
            } else if arg == "--tls-certfile" {
                cert = iter.next().map(PathBuf::from);
            }
        }
        Some(TlsFiles {
            key: key?,
            cert: cert?,
        })
    }
}

fn default_interpreter() -> String {
    #[cfg(target_os = "windows")]
    {
        "python.exe".to_string()
    }

    #[cfg(not(target_os = "windows"))]
    {
        "python3".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(args: &[&str]) -> LaunchSnapshot {
        LaunchSnapshot {
            args: args.iter().map(|s| s.to_string()).collect(),
            cwd: None,
            saved_at: String::new(),
            script: "main.py".to_string(),
            port: 8188,
            interpreter: None,
            pid: None,
        }
    }

    #[test]
    fn detects_tls_args_in_both_forms() {
        let spaced = snapshot(&["--listen", "--tls-keyfile", "k.pem", "--tls-certfile", "c.pem"]);
        assert_eq!(
            spaced.tls_files(),
            Some(TlsFiles {
                key: PathBuf::from("k.pem"),
                cert: PathBuf::from("c.pem"),
            })
        );

        let inline = snapshot(&["--tls-certfile=c.pem", "--tls-keyfile=k.pem"]);
        assert_eq!(inline.tls_files().map(|t| t.cert), Some(PathBuf::from("c.pem")));
    }

    #[test]
    fn tls_requires_both_files() {
        assert_eq!(snapshot(&["--tls-keyfile", "k.pem"]).tls_files(), None);
        assert_eq!(snapshot(&[]).tls_files(), None);
    }

    #[test]
    fn snapshot_missing_required_field_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        fs::write(
            paths.launch_snapshot(),
            r#"{"args": [], "script": "main.py"}"#,
        )
        .unwrap();

        let err = LaunchSnapshot::load(&paths).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
        assert!(err.to_string().contains("missing=port"));
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        let snap = snapshot(&["--port", "8188"]);
        snap.save(&paths).unwrap();
        assert_eq!(LaunchSnapshot::load(&paths).unwrap(), snap);
    }

    #[test]
    fn missing_snapshot_is_config_error() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = LauncherPaths::new(tmp.path());
        assert!(LaunchSnapshot::load(&paths).is_err());
    }

    #[test]
    fn config_defaults_are_written_on_first_load() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("launcher.toml");
        let config = load_config(&path).unwrap();
        assert_eq!(config.api_port, 9188);
        assert_eq!(config.restart.responsive_window_ms, 45_000);
        assert!(path.exists());

        fs::write(&path, "api_port = 9999\n[restart]\npoll_interval_ms = 500\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.api_port, 9999);
        assert_eq!(config.restart.poll_interval_ms, 500);
        assert_eq!(config.restart.alive_settle_ms, 2_000);
        assert_eq!(config.log_buffer_size, 200);
    }
}
