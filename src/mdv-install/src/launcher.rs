//! Launching the installed binary.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use tracing::{debug, warn};

use crate::config::InstallConfig;
use crate::error::{InstallError, InstallResult};
use crate::install::Installer;
use crate::metadata::InstallMetadata;
use crate::method::{PackageEnv, package_manager_hint_from_env};

/// Whether the binary has to be (re)installed before launching.
///
/// A present binary is reinstalled only when the package version is known
/// and differs from the recorded installed version, so a package upgrade
/// never keeps running a stale binary.
pub fn should_install_binary(
    bin_exists: bool,
    installed_version: Option<&str>,
    package_version: Option<&str>,
) -> bool {
    if !bin_exists {
        return true;
    }
    match package_version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(package_version) => installed_version.map(str::trim) != Some(package_version),
        None => false,
    }
}

/// Resolves, installs on demand and runs the mdv binary.
pub struct Launcher {
    config: InstallConfig,
    package_env: PackageEnv,
}

impl Launcher {
    pub fn new(config: InstallConfig, package_env: PackageEnv) -> Self {
        Self {
            config,
            package_env,
        }
    }

    pub fn binary_path(&self) -> PathBuf {
        self.config.bin_path()
    }

    /// Check the binary and its recorded version against the package version.
    pub fn needs_install(&self) -> bool {
        let metadata = InstallMetadata::load(&self.config.install_root);
        should_install_binary(
            self.binary_path().is_file(),
            metadata.as_ref().map(|m| m.version.as_str()),
            Some(self.config.package_version.as_str()),
        )
    }

    /// Install when needed and return the path of a binary that exists.
    pub async fn ensure_installed(&self) -> InstallResult<PathBuf> {
        let path = self.binary_path();

        if self.needs_install() {
            debug!(path = %path.display(), "Binary missing or stale, installing");
            let result = match Installer::from_config(self.config.clone()) {
                Ok(installer) => {
                    installer
                        .with_package_manager(package_manager_hint_from_env(&self.package_env))
                        .install()
                        .await
                }
                Err(e) => Err(e),
            };

            if let Err(e) = result {
                if !path.is_file() {
                    return Err(e);
                }
                warn!("Keeping existing binary, reinstall failed: {}", e);
            }
        }

        if !path.is_file() {
            return Err(InstallError::InstallMissing { path });
        }
        Ok(path)
    }

    /// Ensure the binary is installed, run it with `args` and return its exit code.
    pub async fn run(&self, args: Vec<OsString>) -> InstallResult<i32> {
        let path = self.ensure_installed().await?;
        exec(&path, &args)
    }
}

/// Run `path` with `args`, inheriting stdio, and mirror its exit status.
pub fn exec(path: &Path, args: &[OsString]) -> InstallResult<i32> {
    let status = std::process::Command::new(path).args(args).status()?;
    Ok(exit_code(status))
}

#[cfg(unix)]
fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_install_binary() {
        assert!(should_install_binary(false, None, Some("1.0.0")));
        assert!(should_install_binary(false, Some("1.0.0"), None));
        assert!(!should_install_binary(true, Some("1.0.0"), Some("1.0.0")));
        assert!(should_install_binary(true, Some("0.9.0"), Some("1.0.0")));
        assert!(should_install_binary(true, None, Some("1.0.0")));
        assert!(!should_install_binary(true, Some("0.9.0"), None));
        assert!(!should_install_binary(true, Some("0.9.0"), Some("")));
    }

    fn skip_config(root: &Path) -> InstallConfig {
        InstallConfig {
            skip_download: true,
            install_root: root.to_path_buf(),
            package_version: "1.0.0".to_string(),
            ..InstallConfig::default()
        }
    }

    #[tokio::test]
    async fn test_skip_without_binary_is_install_missing() {
        let root = tempfile::tempdir().unwrap();
        let launcher = Launcher::new(skip_config(root.path()), PackageEnv::default());

        let err = launcher.run(Vec::new()).await.unwrap_err();
        assert!(matches!(err, InstallError::InstallMissing { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_mirrors_exit_code_and_args() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let config = skip_config(root.path());
        let bin = config.bin_path();
        std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
        std::fs::write(&bin, "#!/bin/sh\nexit \"$1\"\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        InstallMetadata::new(None, "1.0.0").save(root.path()).unwrap();

        let launcher = Launcher::new(config, PackageEnv::default());
        assert!(!launcher.needs_install());
        let code = launcher.run(vec![OsString::from("7")]).await.unwrap();
        assert_eq!(code, 7);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stale_binary_kept_when_reinstall_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let config = skip_config(root.path());
        let bin = config.bin_path();
        std::fs::create_dir_all(bin.parent().unwrap()).unwrap();
        std::fs::write(&bin, "#!/bin/sh\nexit 0\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        InstallMetadata::new(None, "0.9.0").save(root.path()).unwrap();

        let launcher = Launcher::new(config, PackageEnv::default());
        assert!(launcher.needs_install());
        assert_eq!(launcher.run(Vec::new()).await.unwrap(), 0);
    }
}
