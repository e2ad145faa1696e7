//! Streams resolved cloud attachments to disk with hash-based dedup.
//!
//! Downloads land in a `.tmp` sibling first and are only renamed into
//! place once complete, so a crash mid-stream never leaves a
//! plausible-looking partial file. When the target name is taken, the
//! new bytes are compared by SHA-256 against the existing file: an
//! identical download is discarded, a different one gets a numeric
//! suffix.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use futures_util::StreamExt;
use log::{debug, info};
use reqwest::header::COOKIE;
use reqwest::Client;
use sha2::{Digest, Sha256};

use super::error::{CloudError, Result};
use super::resolver::ResolvedDownload;

/// Streams `resolved` into `target`. Returns the path the bytes ended
/// up at, which is `target` itself when it was free or already held an
/// identical file, and a `_N`-suffixed sibling otherwise.
pub async fn download_large_file(
    http: &Client,
    resolved: &ResolvedDownload,
    target: &Path,
) -> Result<PathBuf> {
    let (destination, existing_hash) = if target.exists() {
        debug!("'{}' already exists, checking for duplicate", target.display());
        (next_free_name(target), Some(file_sha256(target)?))
    } else {
        (target.to_path_buf(), None)
    };

    let mut request = http.get(&resolved.url);
    if let Some(cookie) = &resolved.cookie {
        request = request.header(COOKIE, cookie.clone());
    }
    let response = request.send().await?.error_for_status()?;

    let tmp_path = destination.with_extension(tmp_extension(&destination));
    let mut tmp_file = File::create(&tmp_path).map_err(|source| CloudError::Io {
        path: tmp_path.clone(),
        source,
    })?;

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        tmp_file.write_all(&chunk).map_err(|source| CloudError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        written += chunk.len() as u64;
    }
    drop(tmp_file);

    if written == 0 {
        let _ = fs::remove_file(&tmp_path);
        return Err(CloudError::EmptyDownload);
    }

    if let Some(existing) = existing_hash {
        if file_sha256(&tmp_path)? == existing {
            debug!("'{}' is identical to the download, skipping", target.display());
            let _ = fs::remove_file(&tmp_path);
            return Ok(target.to_path_buf());
        }
    }

    fs::rename(&tmp_path, &destination).map_err(|source| CloudError::Io {
        path: destination.clone(),
        source,
    })?;
    info!("Downloaded {} bytes to '{}'", written, destination.display());
    Ok(destination)
}

/// First free `{stem}_{n}{ext}` sibling of `path`, starting at `_1`.
fn next_free_name(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let parent = path.parent().unwrap_or_else(|| Path::new(""));

    let mut n = 1;
    loop {
        let candidate = parent.join(format!("{stem}_{n}{ext}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

fn tmp_extension(path: &Path) -> String {
    match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    }
}

/// SHA-256 of a file, read in 8 KiB chunks.
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|source| CloudError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer).map_err(|source| CloudError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
