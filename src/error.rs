//! Launcher error types.

use std::collections::HashMap;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Launcher error that can be serialized for control API responses.
#[derive(Debug)]
pub struct AppError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid launcher/worker configuration
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// OS process control error
    Process,
    /// TLS material could not be loaded
    Tls,
    /// Downloaded package failed its hash check
    Integrity,
    /// Update package could not be extracted
    Archive,
    /// Another restart sequence is running
    RestartInProgress,
    /// Malformed request to the control API
    BadRequest,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::Process => 3003,
            Self::Tls => 3006,
            Self::Integrity => 4003,
            Self::Archive => 4004,
            Self::RestartInProgress => 5001,
            Self::BadRequest => 6001,
            Self::Other => 9999,
        }
    }

    fn status(self) -> StatusCode {
        match self {
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::RestartInProgress => StatusCode::CONFLICT,
            Self::Network => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl AppError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn missing_field(file: &str, field: &str) -> Self {
        Self::new(
            ErrorKind::Config,
            HashMap::from([
                ("file".to_string(), file.to_string()),
                ("missing".to_string(), field.to_string()),
            ]),
        )
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn tls(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Tls, message)
    }

    pub fn integrity(expected: &str, actual: &str) -> Self {
        Self::new(
            ErrorKind::Integrity,
            HashMap::from([
                ("expected".to_string(), expected.to_string()),
                ("actual".to_string(), actual.to_string()),
            ]),
        )
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Archive, message)
    }

    pub fn restart_in_progress() -> Self {
        Self::new(ErrorKind::RestartInProgress, HashMap::new())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::BadRequest, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for AppError {}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("AppError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "success": false,
            "error": self.to_string(),
            "code": self.kind.code(),
        });
        (self.kind.status(), Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::archive(err.to_string())
    }
}

impl From<walkdir::Error> for AppError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;
