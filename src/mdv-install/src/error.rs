//! Error types for mdv-install.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for install operations.
pub type InstallResult<T> = std::result::Result<T, InstallError>;

/// Errors that can occur while acquiring, verifying or launching the binary.
#[derive(Debug, Error)]
pub enum InstallError {
    // Transient network errors
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request to {url} failed with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("Too many redirects (limit {limit}) while fetching {url}")]
    TooManyRedirects { url: String, limit: usize },

    // Integrity errors
    #[error(
        "Checksum mismatch for {asset}: expected {expected}..., got {actual}... \
         (clear the download cache and retry: rm -rf \"{}\")",
        .cache_dir.display()
    )]
    ChecksumMismatch {
        asset: String,
        expected: String,
        actual: String,
        cache_dir: PathBuf,
    },

    #[error("No checksum entry for {asset} in {manifest}")]
    MissingChecksum { asset: String, manifest: String },

    #[error("Unknown release asset {asset}: cannot derive its checksum manifest")]
    UnknownAsset { asset: String },

    #[error("Unsupported platform: {os}-{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    // Native build fallback
    #[error("Building mdv from source failed: {message}")]
    NativeBuildFailed { message: String },

    // Launch errors
    #[error("mdv binary is not installed at {} (install missing)", .path.display())]
    InstallMissing { path: PathBuf },

    #[error("Command failed: {command} (exit code: {code})")]
    CommandFailed { command: String, code: i32 },

    // Terminal state of the install state machine
    #[error("Failed to install mdv v{version}: {source}. {hint}")]
    Aborted {
        version: String,
        #[source]
        source: Box<InstallError>,
        hint: String,
    },

    // File system errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InstallError {
    /// Check if this error is a transient network failure worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::Timeout { .. }
                | Self::HttpStatus { .. }
                | Self::TooManyRedirects { .. }
        )
    }

    /// Check if this error means the downloaded bytes could not be trusted.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::ChecksumMismatch { .. } | Self::MissingChecksum { .. } | Self::UnknownAsset { .. }
        )
    }
}
