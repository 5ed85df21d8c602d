use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;
use sha2::{Digest as _, Sha256};

use crate::error::{AppError, Result};
use crate::github::USER_AGENT;

/// Stream `url` into `dest`, returning the SHA-256 of the written bytes.
///
/// A partially written file is removed when the transfer fails.
pub async fn download_file(client: &Client, url: &str, dest: &Path) -> Result<String> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| AppError::io(e.to_string()))?;
    }

    let result = stream_to_file(client, url, dest).await;
    if result.is_err() && dest.exists() {
        if let Err(e) = fs::remove_file(dest) {
            log::warn!("Failed to remove partial download {:?}: {}", dest, e);
        }
    }
    result
}

async fn stream_to_file(client: &Client, url: &str, dest: &Path) -> Result<String> {
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| AppError::download(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::download(url, resp.status().to_string()));
    }

    let mut file = fs::File::create(dest).map_err(|e| AppError::io(e.to_string()))?;
    let mut hasher = Sha256::new();
    let mut written: u64 = 0;

    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::download(url, e.to_string()))?;
        hasher.update(&chunk);
        written += chunk.len() as u64;
        file.write_all(&chunk)
            .map_err(|e| AppError::io(e.to_string()))?;
    }
    file.flush().map_err(|e| AppError::io(e.to_string()))?;

    log::info!("Downloaded {} ({} bytes)", url, written);
    Ok(hex::encode(hasher.finalize()))
}

/// Fetch a small text resource such as a checksum manifest.
pub async fn fetch_text(client: &Client, url: &str) -> Result<String> {
    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| AppError::download(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(AppError::download(url, resp.status().to_string()));
    }

    resp.text()
        .await
        .map_err(|e| AppError::download(url, e.to_string()))
}
