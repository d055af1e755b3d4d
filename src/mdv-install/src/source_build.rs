//! Opt-in fallback that builds mdv from source with a local Rust toolchain.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::config::binary_file_name;
use crate::error::{InstallError, InstallResult};

/// Builds the binary for `version` and writes it to `destination`.
#[async_trait]
pub trait SourceBuilder: Send + Sync {
    async fn build(&self, version: &str, destination: &Path) -> InstallResult<()>;
}

/// `cargo install` from the release tag into a scratch root.
pub struct CargoSourceBuilder {
    cargo: PathBuf,
    repository: String,
}

impl CargoSourceBuilder {
    /// Name of the package that provides the `mdv` binary.
    pub const PACKAGE: &'static str = "mdv-cli";

    /// Locate `cargo` on `PATH`; `None` when no toolchain is installed.
    pub fn detect(repository: impl Into<String>) -> Option<Self> {
        let cargo = which::which("cargo").ok()?;
        Some(Self {
            cargo,
            repository: repository.into(),
        })
    }
}

#[async_trait]
impl SourceBuilder for CargoSourceBuilder {
    async fn build(&self, version: &str, destination: &Path) -> InstallResult<()> {
        let scratch = tempfile::tempdir()?;
        let tag = format!("v{version}");

        info!(repository = %self.repository, tag = %tag, "Building mdv from source");
        let status = Command::new(&self.cargo)
            .args(["install", "--locked", "--git", self.repository.as_str(), "--tag", tag.as_str()])
            .arg("--root")
            .arg(scratch.path())
            .arg(Self::PACKAGE)
            .status()
            .await
            .map_err(|e| InstallError::NativeBuildFailed {
                message: format!("failed to run cargo: {e}"),
            })?;

        if !status.success() {
            return Err(InstallError::NativeBuildFailed {
                message: format!("cargo install exited with {}", status.code().unwrap_or(-1)),
            });
        }

        let built = scratch.path().join("bin").join(binary_file_name());
        if !built.is_file() {
            return Err(InstallError::NativeBuildFailed {
                message: format!("cargo install did not produce {}", built.display()),
            });
        }

        tokio::fs::copy(&built, destination).await?;
        Ok(())
    }
}
