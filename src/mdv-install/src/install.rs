//! Install orchestration.
//!
//! The install runs as an explicit state machine:
//!
//! ```text
//! SkipRequested -> CacheCheck -> Finalize                       (cache hit)
//!                             -> PrimaryDownload -> Finalize     (verified)
//!                                -> FallbackResolve -> FallbackDownload -> Finalize
//!                                   -> NativeBuildFallback -> Finalize | Aborted
//! ```
//!
//! Every acquisition writes to a uniquely named file next to the final
//! binary, which is renamed into place only once verified, so concurrent
//! launchers see either the old binary or the new one.

use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::{debug, info, warn};

use crate::cache::{self, CacheLookup, CachePaths};
use crate::checksum::{calculate_sha256, digest_prefix, parse_checksum_for_asset};
use crate::config::InstallConfig;
use crate::error::{InstallError, InstallResult};
use crate::http::{AssetFetcher, HttpFetcher};
use crate::metadata::InstallMetadata;
use crate::method::PackageManager;
use crate::naming::{ReleaseAsset, checksums_asset_name_from_binary_asset};
use crate::release::{
    GitHubReleases, ReleaseAssetBundle, ReleaseSource, resolve_release_asset_bundle,
    should_use_fallback_url,
};
use crate::retry::RetryPolicy;
use crate::source_build::{CargoSourceBuilder, SourceBuilder};

/// Where an installed binary came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionSource {
    Cache,
    Primary,
    Fallback,
    NativeBuild,
}

impl AcquisitionSource {
    /// Whether the binary was downloaded and verified in this run.
    pub fn is_network_verified(&self) -> bool {
        matches!(self, Self::Primary | Self::Fallback)
    }
}

impl std::fmt::Display for AcquisitionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Cache => "cache",
            Self::Primary => "release",
            Self::Fallback => "latest release",
            Self::NativeBuild => "source build",
        })
    }
}

/// Outcome of a completed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    /// Acquisition was skipped; nothing was installed or verified.
    Skipped,
    Installed {
        source: AcquisitionSource,
        path: PathBuf,
        version: String,
    },
}

/// States of the install state machine.
#[derive(Debug)]
enum InstallState {
    SkipRequested,
    CacheCheck,
    PrimaryDownload,
    FallbackResolve {
        primary_url: String,
        error: InstallError,
    },
    FallbackDownload {
        bundle: ReleaseAssetBundle,
        error: InstallError,
    },
    NativeBuildFallback {
        error: InstallError,
    },
    Finalize {
        source: AcquisitionSource,
        manifest: Option<String>,
    },
    Finished(InstallOutcome),
    Aborted(InstallError),
}

impl InstallState {
    fn name(&self) -> &'static str {
        match self {
            Self::SkipRequested => "skip-requested",
            Self::CacheCheck => "cache-check",
            Self::PrimaryDownload => "primary-download",
            Self::FallbackResolve { .. } => "fallback-resolve",
            Self::FallbackDownload { .. } => "fallback-download",
            Self::NativeBuildFallback { .. } => "native-build-fallback",
            Self::Finalize { .. } => "finalize",
            Self::Finished(_) => "finished",
            Self::Aborted(_) => "aborted",
        }
    }
}

/// Binary and manifest URLs for one download attempt.
#[derive(Debug, Clone)]
struct AssetUrls {
    binary: String,
    manifest: String,
}

/// Installs one version of the mdv binary.
pub struct Installer {
    config: InstallConfig,
    asset: ReleaseAsset,
    fetcher: Box<dyn AssetFetcher>,
    releases: Box<dyn ReleaseSource>,
    source_builder: Option<Box<dyn SourceBuilder>>,
    package_manager: Option<PackageManager>,
    retry: RetryPolicy,
}

impl Installer {
    pub fn new(
        config: InstallConfig,
        asset: ReleaseAsset,
        fetcher: Box<dyn AssetFetcher>,
        releases: Box<dyn ReleaseSource>,
    ) -> Self {
        let retry = RetryPolicy::from(config.tuning);
        Self {
            config,
            asset,
            fetcher,
            releases,
            source_builder: None,
            package_manager: None,
            retry,
        }
    }

    /// Installer for the current platform talking to the configured release host.
    ///
    /// The source build fallback is wired in only when opted into and a
    /// `cargo` toolchain is on `PATH`.
    pub fn from_config(config: InstallConfig) -> InstallResult<Self> {
        let asset = ReleaseAsset::current()?;
        let fetcher = HttpFetcher::new(&config.tuning)?;
        let releases = GitHubReleases::new(
            fetcher.clone(),
            config.release_api_url.clone(),
            config.github_token.clone(),
        );

        let source_builder = if config.build_from_source {
            let builder = CargoSourceBuilder::detect(config.release_base_url.clone());
            if builder.is_none() {
                warn!("MDV_BUILD_FROM_SOURCE is set but no cargo toolchain was found on PATH");
            }
            builder
        } else {
            None
        };

        let mut installer = Self::new(config, asset, Box::new(fetcher), Box::new(releases));
        if let Some(builder) = source_builder {
            installer = installer.with_source_builder(Box::new(builder));
        }
        Ok(installer)
    }

    pub fn with_source_builder(mut self, builder: Box<dyn SourceBuilder>) -> Self {
        self.source_builder = Some(builder);
        self
    }

    /// Package manager recorded in the install metadata. `None` keeps the
    /// manager recorded by a previous install.
    pub fn with_package_manager(mut self, manager: Option<PackageManager>) -> Self {
        self.package_manager = manager;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn version(&self) -> &str {
        &self.config.package_version
    }

    pub fn cache_paths(&self) -> CachePaths {
        CachePaths::new(
            &self.config.install_root,
            self.version(),
            &self.asset.name(),
            &self.asset.manifest_name(),
        )
    }

    /// Run the install to completion.
    pub async fn install(&self) -> InstallResult<InstallOutcome> {
        let mut staging: Option<TempPath> = None;
        let mut state = InstallState::SkipRequested;

        loop {
            debug!(state = state.name(), "Install state");
            state = match state {
                InstallState::Finished(outcome) => return Ok(outcome),
                InstallState::Aborted(error) => return Err(self.abort(error)),
                other => self.step(other, &mut staging).await?,
            };
        }
    }

    async fn step(
        &self,
        state: InstallState,
        staging: &mut Option<TempPath>,
    ) -> InstallResult<InstallState> {
        let next = match state {
            InstallState::SkipRequested => {
                if self.config.skip_download {
                    info!(
                        "Skipping mdv binary download ({} is set)",
                        crate::config::ENV_SKIP_DOWNLOAD
                    );
                    InstallState::Finished(InstallOutcome::Skipped)
                } else {
                    InstallState::CacheCheck
                }
            }

            InstallState::CacheCheck => {
                let target = self.staging_path(staging)?;
                let lookup =
                    cache::install_from_cache(&self.cache_paths(), &self.asset.name(), &target)
                        .await;
                match lookup {
                    Ok(CacheLookup::Hit) => InstallState::Finalize {
                        source: AcquisitionSource::Cache,
                        manifest: None,
                    },
                    Ok(CacheLookup::Miss) => InstallState::PrimaryDownload,
                    Err(e) => {
                        debug!(error = %e, "Cache copy failed, downloading instead");
                        InstallState::PrimaryDownload
                    }
                }
            }

            InstallState::PrimaryDownload => {
                let urls = self.primary_urls()?;
                let target = self.staging_path(staging)?;
                match self.verified_download(&urls, &target).await {
                    Ok(manifest) => InstallState::Finalize {
                        source: AcquisitionSource::Primary,
                        manifest: Some(manifest),
                    },
                    Err(error) => {
                        warn!("Download from {} failed: {}", urls.binary, error);
                        InstallState::FallbackResolve {
                            primary_url: urls.binary,
                            error,
                        }
                    }
                }
            }

            InstallState::FallbackResolve { primary_url, error } => {
                let bundle = resolve_release_asset_bundle(
                    self.version(),
                    &self.asset.name(),
                    &self.asset.manifest_name(),
                    self.releases.as_ref(),
                )
                .await;

                match bundle {
                    Some(bundle)
                        if should_use_fallback_url(&primary_url, Some(&bundle.binary_url)) =>
                    {
                        InstallState::FallbackDownload { bundle, error }
                    }
                    Some(_) => {
                        debug!("Release metadata points at the URL that already failed");
                        InstallState::NativeBuildFallback { error }
                    }
                    None => {
                        debug!("No release assets resolvable for v{}", self.version());
                        InstallState::NativeBuildFallback { error }
                    }
                }
            }

            InstallState::FallbackDownload { bundle, error } => {
                let urls = AssetUrls {
                    binary: bundle.binary_url,
                    manifest: bundle.checksums_url,
                };
                let target = self.staging_path(staging)?;
                match self.verified_download(&urls, &target).await {
                    Ok(manifest) => InstallState::Finalize {
                        source: AcquisitionSource::Fallback,
                        manifest: Some(manifest),
                    },
                    Err(fallback_error) => {
                        warn!("Fallback download from {} failed: {}", urls.binary, fallback_error);
                        debug!(primary_error = %error, "Primary failure superseded");
                        InstallState::NativeBuildFallback {
                            error: fallback_error,
                        }
                    }
                }
            }

            InstallState::NativeBuildFallback { error } => match &self.source_builder {
                Some(builder) => {
                    let target = self.staging_path(staging)?;
                    match builder.build(self.version(), &target).await {
                        Ok(()) => InstallState::Finalize {
                            source: AcquisitionSource::NativeBuild,
                            manifest: None,
                        },
                        Err(build_error) => {
                            warn!("{}", build_error);
                            InstallState::Aborted(error)
                        }
                    }
                }
                None => InstallState::Aborted(error),
            },

            InstallState::Finalize { source, manifest } => {
                let Some(temp) = staging.take() else {
                    return Err(InstallError::Io(std::io::Error::other(
                        "no staged binary to finalize",
                    )));
                };
                let path = self.finalize(temp, source, manifest.as_deref()).await?;
                InstallState::Finished(InstallOutcome::Installed {
                    source,
                    path,
                    version: self.version().to_string(),
                })
            }

            done @ (InstallState::Finished(_) | InstallState::Aborted(_)) => done,
        };

        Ok(next)
    }

    /// `{base}/releases/download/v{version}/{asset}` and its manifest.
    fn primary_urls(&self) -> InstallResult<AssetUrls> {
        let asset = self.asset.name();
        let manifest = checksums_asset_name_from_binary_asset(&asset)
            .ok_or_else(|| InstallError::UnknownAsset {
                asset: asset.clone(),
            })?;
        let base = format!(
            "{}/releases/download/v{}",
            self.config.release_base_url,
            self.version()
        );
        Ok(AssetUrls {
            binary: format!("{base}/{asset}"),
            manifest: format!("{base}/{manifest}"),
        })
    }

    /// Create the staging file next to the final binary on first use.
    fn staging_path(&self, staging: &mut Option<TempPath>) -> InstallResult<PathBuf> {
        if let Some(temp) = staging {
            return Ok(temp.to_path_buf());
        }

        let bin_path = self.config.bin_path();
        let dir = bin_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".mdv-")
            .suffix(".tmp")
            .tempfile_in(&dir)?
            .into_temp_path();
        let path = temp.to_path_buf();
        *staging = Some(temp);
        Ok(path)
    }

    /// Download manifest and binary, then check the binary's digest.
    ///
    /// Returns the manifest text on success.
    async fn verified_download(&self, urls: &AssetUrls, target: &Path) -> InstallResult<String> {
        let asset = self.asset.name();

        let manifest = self
            .retry
            .run("checksum manifest download", || {
                self.fetcher.request_text(&urls.manifest)
            })
            .await?;

        let expected = parse_checksum_for_asset(&manifest, &asset).ok_or_else(|| {
            InstallError::MissingChecksum {
                asset: asset.clone(),
                manifest: urls.manifest.clone(),
            }
        })?;

        self.retry
            .run("binary download", || self.fetcher.download(&urls.binary, target))
            .await?;

        let actual = calculate_sha256(target).await?;
        if actual != expected {
            return Err(InstallError::ChecksumMismatch {
                asset,
                expected: digest_prefix(&expected),
                actual: digest_prefix(&actual),
                cache_dir: self.config.cache_root(),
            });
        }

        debug!(url = %urls.binary, sha256 = %actual, "Verified download");
        Ok(manifest)
    }

    /// Make the staged binary executable, move it into place and record it.
    async fn finalize(
        &self,
        staged: TempPath,
        source: AcquisitionSource,
        manifest: Option<&str>,
    ) -> InstallResult<PathBuf> {
        set_executable(&staged)?;

        let bin_path = self.config.bin_path();
        staged.persist(&bin_path).map_err(|e| InstallError::Io(e.error))?;

        if source.is_network_verified() {
            if let Some(manifest) = manifest {
                cache::persist_best_effort(&self.cache_paths(), manifest, &bin_path).await;
            }
        }

        // Without a hint, keep the manager recorded by an earlier install.
        let package_manager = self.package_manager.or_else(|| {
            InstallMetadata::load(&self.config.install_root).and_then(|m| m.package_manager)
        });
        let metadata = InstallMetadata::new(package_manager, self.version());
        if let Err(e) = metadata.save(&self.config.install_root) {
            warn!("Failed to write install metadata: {}", e);
        }

        info!(source = ?source, path = %bin_path.display(), "Installed mdv v{}", self.version());
        Ok(bin_path)
    }

    fn abort(&self, error: InstallError) -> InstallError {
        let hint = if self.config.build_from_source {
            if self.source_builder.is_some() {
                "Building from source also failed; see the messages above.".to_string()
            } else {
                "Install a Rust toolchain (https://rustup.rs) so the source build fallback can run."
                    .to_string()
            }
        } else {
            format!(
                "Release assets for v{} may not be published yet. Retry later, or set {}=1 to \
                 build from source with cargo.",
                self.version(),
                crate::config::ENV_BUILD_FROM_SOURCE
            )
        };

        InstallError::Aborted {
            version: self.version().to_string(),
            source: Box::new(error),
            hint,
        }
    }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> InstallResult<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> InstallResult<()> {
    Ok(())
}
