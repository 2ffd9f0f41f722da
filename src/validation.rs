//! Validation of externally supplied update parameters.

use reqwest::Url;

use crate::error::{AppError, Result};

/// Accept only absolute `http`/`https` URLs with a host.
pub fn validate_asset_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("asset_url is required"));
    }
    let url = Url::parse(trimmed)
        .map_err(|e| AppError::bad_request(format!("asset_url is not a valid URL: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(AppError::bad_request(
            "asset_url must be an http(s) URL with a host",
        ));
    }
    Ok(url)
}

/// Normalize an optional SHA-256 to lowercase hex. Empty means "not given".
pub fn normalize_sha256(raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return Ok(None);
    };
    if raw.len() != 64 || !raw.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::bad_request(
            "sha256 must be 64 hexadecimal characters",
        ));
    }
    Ok(Some(raw.to_ascii_lowercase()))
}

/// Version strings end up in file contents and log lines; keep them plain.
pub fn validate_version_tag(version: &str) -> Result<()> {
    let is_safe = !version.is_empty()
        && version.len() <= 64
        && version
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '+'));

    if !is_safe {
        return Err(AppError::network(format!(
            "release feed returned an invalid version tag: {version:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_urls() {
        assert!(validate_asset_url("https://github.com/o/r/releases/download/v1/pkg.zip").is_ok());
        assert!(validate_asset_url("http://127.0.0.1:9000/pkg.zip").is_ok());
        assert!(validate_asset_url("").is_err());
        assert!(validate_asset_url("file:///etc/passwd").is_err());
        assert!(validate_asset_url("not a url").is_err());
    }

    #[test]
    fn sha256_is_normalized() {
        let upper = "A".repeat(64);
        assert_eq!(
            normalize_sha256(Some(&upper)).unwrap(),
            Some("a".repeat(64))
        );
        assert_eq!(normalize_sha256(Some("  ")).unwrap(), None);
        assert_eq!(normalize_sha256(None).unwrap(), None);
        assert!(normalize_sha256(Some("abc")).is_err());
        assert!(normalize_sha256(Some(&"g".repeat(64))).is_err());
    }

    #[test]
    fn version_tags() {
        assert!(validate_version_tag("1.3.0").is_ok());
        assert!(validate_version_tag("1.3.0-beta.1+build").is_ok());
        assert!(validate_version_tag("").is_err());
        assert!(validate_version_tag("../1.0").is_err());
    }
}
