//! Per-version verified cache of release binaries.
//!
//! Layout: `{install_root}/cache/{version}/{asset}` next to the release's
//! checksum manifest. A cached binary is only trusted after its digest has
//! been checked against the cached manifest.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::checksum::{calculate_sha256, parse_checksum_for_asset};
use crate::error::InstallResult;

/// Paths of one cached version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub cache_dir: PathBuf,
    pub binary_path: PathBuf,
    pub manifest_path: PathBuf,
}

impl CachePaths {
    pub fn new(install_root: &Path, version: &str, asset_name: &str, manifest_name: &str) -> Self {
        let cache_dir = install_root.join("cache").join(version);
        Self {
            binary_path: cache_dir.join(asset_name),
            manifest_path: cache_dir.join(manifest_name),
            cache_dir,
        }
    }
}

/// Result of a cache lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    Hit,
    Miss,
}

/// Check whether the cache holds a verified binary for `asset_name`.
///
/// A digest mismatch invalidates the entry: both cached files are deleted
/// and the lookup reports a miss.
pub async fn lookup(paths: &CachePaths, asset_name: &str) -> CacheLookup {
    if !paths.binary_path.is_file() || !paths.manifest_path.is_file() {
        return CacheLookup::Miss;
    }

    let manifest = match tokio::fs::read_to_string(&paths.manifest_path).await {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "Unreadable cached manifest");
            return CacheLookup::Miss;
        }
    };

    let Some(expected) = parse_checksum_for_asset(&manifest, asset_name) else {
        debug!(asset_name, "Cached manifest has no entry for asset");
        return CacheLookup::Miss;
    };

    match calculate_sha256(&paths.binary_path).await {
        Ok(actual) if actual == expected => CacheLookup::Hit,
        Ok(actual) => {
            warn!(
                asset_name,
                expected = %expected,
                actual = %actual,
                "Cached binary failed verification, discarding cache entry"
            );
            invalidate(paths).await;
            CacheLookup::Miss
        }
        Err(e) => {
            debug!(error = %e, "Failed to hash cached binary");
            CacheLookup::Miss
        }
    }
}

/// Copy a verified cached binary to `destination` on a hit.
pub async fn install_from_cache(
    paths: &CachePaths,
    asset_name: &str,
    destination: &Path,
) -> InstallResult<CacheLookup> {
    if lookup(paths, asset_name).await == CacheLookup::Miss {
        return Ok(CacheLookup::Miss);
    }
    tokio::fs::copy(&paths.binary_path, destination).await?;
    Ok(CacheLookup::Hit)
}

/// Store a freshly verified binary and its manifest.
pub async fn persist(paths: &CachePaths, manifest: &str, source_binary: &Path) -> InstallResult<()> {
    tokio::fs::create_dir_all(&paths.cache_dir).await?;
    tokio::fs::copy(source_binary, &paths.binary_path).await?;
    tokio::fs::write(&paths.manifest_path, manifest).await?;
    debug!(cache_dir = %paths.cache_dir.display(), "Cached verified binary");
    Ok(())
}

/// Store into the cache, logging instead of failing.
pub async fn persist_best_effort(paths: &CachePaths, manifest: &str, source_binary: &Path) {
    if let Err(e) = persist(paths, manifest, source_binary).await {
        warn!("Failed to cache downloaded binary: {}", e);
    }
}

async fn invalidate(paths: &CachePaths) {
    for path in [&paths.binary_path, &paths.manifest_path] {
        if let Err(e) = tokio::fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "Failed to remove cache file");
        }
    }
}
