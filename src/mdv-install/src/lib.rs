//! mdv-install - acquires, verifies and launches the mdv binary.
//!
//! Provides:
//! - Release asset naming and checksum manifest parsing
//! - Downloads with redirect, timeout and retry handling
//! - Tagged/latest release fallback resolution
//! - A per-version verified cache and atomic installation
//! - Package manager detection for self-updates
//!
//! # Example
//!
//! ```rust,ignore
//! use mdv_install::{InstallConfig, Launcher, PackageEnv};
//!
//! let launcher = Launcher::new(InstallConfig::from_env(), PackageEnv::from_env());
//! let code = launcher.run(std::env::args_os().skip(1).collect()).await?;
//! std::process::exit(code);
//! ```

mod cache;
mod checksum;
mod config;
mod error;
mod http;
mod install;
mod launcher;
mod metadata;
mod method;
mod naming;
mod release;
mod retry;
mod source_build;

pub use cache::{CacheLookup, CachePaths, install_from_cache, persist as persist_cache};
pub use checksum::{calculate_sha256, parse_checksum_for_asset};
pub use config::{InstallConfig, InstallTuning, binary_file_name};
pub use error::{InstallError, InstallResult};
pub use http::{AssetFetcher, HttpFetcher, MAX_REDIRECTS};
pub use install::{AcquisitionSource, InstallOutcome, Installer};
pub use launcher::{Launcher, exec, should_install_binary};
pub use metadata::InstallMetadata;
pub use method::{
    CommandProbe, PackageEnv, PackageManager, PackageProbe, ProbeOutput, UpdateCommand,
    detect_installed_package_manager, package_manager_hint_from_env, resolve_update_command,
};
pub use naming::{
    ReleaseAsset, SUPPORTED_TARGETS, asset_name_for, checksums_asset_name_for,
    checksums_asset_name_from_binary_asset,
};
pub use release::{
    GitHubReleases, Release, ReleaseAssetBundle, ReleaseFile, ReleaseKind, ReleaseSource,
    resolve_release_asset_bundle, should_use_fallback_url,
};
pub use retry::{RetryPolicy, compute_backoff_delay};
pub use source_build::{CargoSourceBuilder, SourceBuilder};

/// Version of this package; the binary version it installs.
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name the package is published under for package managers.
pub const NPM_PACKAGE_NAME: &str = "mdv-cli";

/// Default repository hosting release downloads.
pub const DEFAULT_RELEASE_BASE_URL: &str = "https://github.com/mdv-rs/mdv";

/// Default release metadata API.
pub const DEFAULT_RELEASE_API_URL: &str = "https://api.github.com/repos/mdv-rs/mdv";
