use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;
use sha2::{Digest as _, Sha256};

use crate::error::{AppError, Result};

/// Stream `url` into `dest`, hashing as it goes.
///
/// `on_progress` receives a percentage (0 while the length is unknown).
/// Returns the lowercase hex SHA-256 of the body.
pub async fn download_file<F>(client: &Client, url: &str, dest: &Path, mut on_progress: F) -> Result<String>
where
    F: FnMut(u8),
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| AppError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::network_with_url(url, resp.status().to_string()));
    }

    let total = resp.content_length().filter(|len| *len > 0);
    let mut file = fs::File::create(dest).map_err(|e| AppError::io(e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut received: u64 = 0;
    let mut last_reported = None;

    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| AppError::io(e.to_string()))?;
        hasher.update(&chunk);
        received += chunk.len() as u64;

        let percent = progress_percent(received, total);
        if last_reported != Some(percent) {
            last_reported = Some(percent);
            on_progress(percent);
        }
    }
    file.flush().map_err(|e| AppError::io(e.to_string()))?;

    log::info!("Downloaded {received} bytes from {url}");
    Ok(hex::encode(hasher.finalize()))
}

fn progress_percent(received: u64, total: Option<u64>) -> u8 {
    match total {
        Some(total) => u8::try_from((received.saturating_mul(100) / total).min(100)).unwrap_or(100),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_zero_without_length() {
        assert_eq!(progress_percent(500, None), 0);
        assert_eq!(progress_percent(50, Some(200)), 25);
        assert_eq!(progress_percent(300, Some(200)), 100);
    }
}
