//! `mdv-install` commands - explicit install, self-update and maintenance.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use mdv_install::{
    CommandProbe, InstallConfig, InstallMetadata, InstallOutcome, Installer, Launcher, PackageEnv,
    package_manager_hint_from_env, resolve_update_command,
};

/// Install and manage the mdv binary.
#[derive(Debug, Parser)]
#[command(name = "mdv-install", version, about)]
pub struct InstallCli {
    #[command(subcommand)]
    pub command: Option<InstallCommand>,
}

#[derive(Debug, Subcommand)]
pub enum InstallCommand {
    /// Download and verify the binary for this package version (default)
    Install {
        /// Reinstall even if the binary is already current
        #[arg(long, short = 'f')]
        force: bool,
    },

    /// Update mdv through the package manager it was installed with
    Update {
        /// Print the update command without running it
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the path of the installed binary
    Path,

    /// Remove downloaded release assets
    ClearCache,
}

impl InstallCli {
    /// Run the selected command and return the process exit code.
    pub async fn run(self) -> Result<i32> {
        let config = InstallConfig::from_env();
        crate::init_logging(config.debug);

        match self.command.unwrap_or(InstallCommand::Install { force: false }) {
            InstallCommand::Install { force } => run_install(config, force).await,
            InstallCommand::Update { dry_run } => run_update(&config, dry_run).await,
            InstallCommand::Path => {
                println!("{}", config.bin_path().display());
                Ok(0)
            }
            InstallCommand::ClearCache => run_clear_cache(&config).await,
        }
    }
}

async fn run_install(config: InstallConfig, force: bool) -> Result<i32> {
    let package_env = PackageEnv::from_env();

    if !force && !Launcher::new(config.clone(), package_env.clone()).needs_install() {
        println!(
            "mdv v{} is already installed at {}",
            config.package_version,
            config.bin_path().display()
        );
        return Ok(0);
    }

    let outcome = Installer::from_config(config)?
        .with_package_manager(package_manager_hint_from_env(&package_env))
        .install()
        .await?;

    match outcome {
        InstallOutcome::Skipped => {
            println!("Skipping mdv binary download (MDV_SKIP_DOWNLOAD is set)");
        }
        InstallOutcome::Installed {
            source,
            path,
            version,
        } => {
            println!("Installed mdv v{version} from {source} to {}", path.display());
        }
    }
    Ok(0)
}

async fn run_update(config: &InstallConfig, dry_run: bool) -> Result<i32> {
    let metadata = InstallMetadata::load(&config.install_root);
    let command = resolve_update_command(&PackageEnv::from_env(), metadata.as_ref(), &CommandProbe);
    debug!(manager = %command.manager, "Resolved update command");

    if dry_run {
        println!("{}", command.display());
        return Ok(0);
    }

    let code = command
        .run()
        .await
        .with_context(|| format!("Failed to run {}", command.display()))?;
    Ok(code)
}

async fn run_clear_cache(config: &InstallConfig) -> Result<i32> {
    let cache_root = config.cache_root();
    match tokio::fs::remove_dir_all(&cache_root).await {
        Ok(()) => println!("Removed {}", cache_root.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            println!("Nothing to clear at {}", cache_root.display());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to remove {}", cache_root.display()));
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults_to_install() {
        let cli = InstallCli::try_parse_from(["mdv-install"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = InstallCli::try_parse_from(["mdv-install", "install", "--force"]).unwrap();
        assert!(matches!(cli.command, Some(InstallCommand::Install { force: true })));

        let cli = InstallCli::try_parse_from(["mdv-install", "update", "--dry-run"]).unwrap();
        assert!(matches!(cli.command, Some(InstallCommand::Update { dry_run: true })));

        let cli = InstallCli::try_parse_from(["mdv-install", "clear-cache"]).unwrap();
        assert!(matches!(cli.command, Some(InstallCommand::ClearCache)));
    }

    #[test]
    fn test_parse_rejects_unknown_command() {
        assert!(InstallCli::try_parse_from(["mdv-install", "frobnicate"]).is_err());
    }
}
