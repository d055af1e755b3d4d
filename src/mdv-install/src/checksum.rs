//! Checksum manifests and SHA256 digests.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::InstallResult;

/// `<hex64><whitespace>[*]<filename>`, the `sha256sum` text and binary forms.
static CHECKSUM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([0-9a-fA-F]{64})\s+\*?(.+)$").expect("Invalid checksum line regex")
});

/// Find the expected digest for `asset_name` in a manifest.
///
/// Returns the lowercased digest of the first matching line, or `None`
/// when no line names the asset.
pub fn parse_checksum_for_asset(manifest: &str, asset_name: &str) -> Option<String> {
    manifest
        .lines()
        .map(|line| line.trim_end_matches('\r').trim())
        .filter(|line| !line.is_empty())
        .filter_map(|line| CHECKSUM_LINE.captures(line))
        .find(|caps| caps[2].trim() == asset_name)
        .map(|caps| caps[1].to_ascii_lowercase())
}

/// Calculate the SHA256 of a file as lowercase hex.
pub async fn calculate_sha256(path: &Path) -> InstallResult<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Leading characters of a digest, as shown in mismatch diagnostics.
pub fn digest_prefix(digest: &str) -> String {
    digest.chars().take(12).collect()
}
