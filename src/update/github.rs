//! Release feed access and version comparison.

use std::cmp::Ordering;

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::validation::validate_version_tag;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

impl GitHubRelease {
    /// Tag without its leading `v`.
    pub fn version(&self) -> &str {
        normalize_version(&self.tag_name)
    }
}

pub fn normalize_version(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix(['v', 'V']).unwrap_or(tag)
}

/// First asset whose name ends with `extension`, case-insensitively.
pub fn find_package_asset<'a>(assets: &'a [GitHubAsset], extension: &str) -> Option<&'a GitHubAsset> {
    let extension = extension.to_ascii_lowercase();
    assets
        .iter()
        .find(|asset| asset.name.to_ascii_lowercase().ends_with(&extension))
}

fn numeric_components(version: &str) -> Option<Vec<u64>> {
    version
        .split('.')
        .map(|part| part.trim().parse::<u64>().ok())
        .collect()
}

/// Compare two version strings: semver first, then dotted numbers with
/// missing components read as 0. `None` when neither form applies.
pub fn compare_versions(a: &str, b: &str) -> Option<Ordering> {
    let (a, b) = (normalize_version(a), normalize_version(b));
    if let (Ok(va), Ok(vb)) = (semver::Version::parse(a), semver::Version::parse(b)) {
        return Some(va.cmp(&vb));
    }

    let (mut na, mut nb) = (numeric_components(a)?, numeric_components(b)?);
    let len = na.len().max(nb.len());
    na.resize(len, 0);
    nb.resize(len, 0);
    Some(na.cmp(&nb))
}

/// Whether `latest` should replace `current`. Unparseable versions fall
/// back to plain inequality.
pub fn is_newer(latest: &str, current: &str) -> bool {
    match compare_versions(latest, current) {
        Some(ordering) => ordering == Ordering::Greater,
        None => normalize_version(latest) != normalize_version(current),
    }
}

pub async fn fetch_latest_release(client: &Client, url: &str) -> Result<GitHubRelease> {
    let resp = client
        .get(url)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, format!("Failed to fetch release: {e}")))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(
            url,
            format!("Release feed returned status: {}", resp.status()),
        ));
    }

    let release = resp
        .json::<GitHubRelease>()
        .await
        .map_err(|e| AppError::network_with_url(url, format!("Failed to parse release: {e}")))?;
    validate_version_tag(release.version())?;
    Ok(release)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_lose_their_v_prefix() {
        assert_eq!(normalize_version("v1.3.0"), "1.3.0");
        assert_eq!(normalize_version("1.3.0"), "1.3.0");
        assert_eq!(normalize_version(" V2 "), "2");
    }

    #[test]
    fn semver_comparison() {
        assert!(is_newer("1.3.0", "1.2.9"));
        assert!(!is_newer("1.2.9", "1.2.9"));
        assert!(!is_newer("1.2.9", "1.3.0"));
        assert!(is_newer("v1.10.0", "1.9.9"));
        assert!(!is_newer("1.3.0-beta.1", "1.3.0"));
    }

    #[test]
    fn numeric_comparison_pads_missing_components() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Some(Ordering::Equal));
        assert!(is_newer("1.2.0.1", "1.2"));
        assert!(!is_newer("1.2", "1.2.0.0"));
    }

    #[test]
    fn unparseable_versions_compare_by_inequality() {
        assert_eq!(compare_versions("nightly-2024", "1.0"), None);
        assert!(is_newer("nightly-2024", "1.0"));
        assert!(!is_newer("nightly", "nightly"));
    }

    #[test]
    fn package_asset_is_first_matching_extension() {
        let assets = vec![
            GitHubAsset {
                name: "checksums.txt".to_string(),
                browser_download_url: "https://x/checksums.txt".to_string(),
            },
            GitHubAsset {
                name: "comfy-mobile-ui.ZIP".to_string(),
                browser_download_url: "https://x/a.zip".to_string(),
            },
            GitHubAsset {
                name: "other.zip".to_string(),
                browser_download_url: "https://x/b.zip".to_string(),
            },
        ];
        let found = find_package_asset(&assets, ".zip").unwrap();
        assert_eq!(found.browser_download_url, "https://x/a.zip");
        assert!(find_package_asset(&assets, ".tar.gz").is_none());
    }
}
