//! Package manager detection and update commands.

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::NPM_PACKAGE_NAME;
use crate::error::{InstallError, InstallResult};
use crate::metadata::InstallMetadata;

/// Package managers the launcher can be installed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    Npm,
    Pnpm,
    Yarn,
    Bun,
}

impl PackageManager {
    /// Order used for live detection when there is no preference.
    pub const DEFAULT_ORDER: [PackageManager; 4] = [Self::Npm, Self::Pnpm, Self::Yarn, Self::Bun];

    /// Order used when matching hint strings; `pnpm` contains `npm`, so
    /// the more specific names go first.
    const HINT_ORDER: [PackageManager; 4] = [Self::Pnpm, Self::Yarn, Self::Bun, Self::Npm];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Npm => "npm",
            Self::Pnpm => "pnpm",
            Self::Yarn => "yarn",
            Self::Bun => "bun",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::DEFAULT_ORDER
            .into_iter()
            .find(|pm| pm.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Executable to invoke. The node-based managers ship `.cmd` shims on Windows.
    pub fn program(&self) -> String {
        match self {
            Self::Bun => "bun".to_string(),
            other if cfg!(windows) => format!("{}.cmd", other.as_str()),
            other => other.as_str().to_string(),
        }
    }

    /// Arguments listing globally installed packages.
    pub fn list_global_args(&self) -> Vec<String> {
        let args: &[&str] = match self {
            Self::Npm => &["ls", "-g", "--depth=0"],
            Self::Pnpm => &["ls", "-g", "--depth=0"],
            Self::Yarn => &["global", "list"],
            Self::Bun => &["pm", "ls", "-g"],
        };
        args.iter().map(|a| a.to_string()).collect()
    }

    /// Arguments updating the global package to its latest release.
    pub fn update_args(&self) -> Vec<String> {
        let spec = format!("{NPM_PACKAGE_NAME}@latest");
        let args: Vec<&str> = match self {
            Self::Npm => vec!["install", "-g", spec.as_str()],
            Self::Pnpm => vec!["add", "-g", spec.as_str()],
            Self::Yarn => vec!["global", "add", spec.as_str()],
            Self::Bun => vec!["add", "-g", spec.as_str()],
        };
        args.into_iter().map(str::to_string).collect()
    }

    /// First manager named in `text`, case-insensitively.
    fn find_in(text: &str) -> Option<Self> {
        let text = text.to_ascii_lowercase();
        Self::HINT_ORDER
            .into_iter()
            .find(|pm| text.contains(pm.as_str()))
    }
}

impl std::fmt::Display for PackageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Package manager related environment, captured once.
#[derive(Debug, Clone, Default)]
pub struct PackageEnv {
    /// `npm_execpath`: script or binary of the running package manager
    pub exec_path: Option<String>,
    /// `npm_config_user_agent`
    pub user_agent: Option<String>,
    /// `npm_node_execpath`: the node runtime that ran the package manager
    pub node_exec_path: Option<String>,
}

impl PackageEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            exec_path: get("npm_execpath"),
            user_agent: get("npm_config_user_agent"),
            node_exec_path: get("npm_node_execpath"),
        }
    }
}

/// Manager named by the environment, checking the exec path before the user agent.
pub fn package_manager_hint_from_env(env: &PackageEnv) -> Option<PackageManager> {
    [env.exec_path.as_deref(), env.user_agent.as_deref()]
        .into_iter()
        .flatten()
        .find_map(PackageManager::find_in)
}

/// Output of a global package listing.
#[derive(Debug, Clone)]
pub struct ProbeOutput {
    pub success: bool,
    pub stdout: String,
}

/// Lists the packages a manager has installed globally.
pub trait PackageProbe {
    /// `None` when the manager could not be run at all.
    fn probe(&self, manager: PackageManager) -> Option<ProbeOutput>;
}

/// Probe running the real package manager executables.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandProbe;

impl PackageProbe for CommandProbe {
    fn probe(&self, manager: PackageManager) -> Option<ProbeOutput> {
        let output = std::process::Command::new(manager.program())
            .args(manager.list_global_args())
            .stdin(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .output()
            .ok()?;

        Some(ProbeOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Find the manager whose global listing contains the package.
///
/// `preferred` is tried first, then [`PackageManager::DEFAULT_ORDER`].
pub fn detect_installed_package_manager(
    probe: &dyn PackageProbe,
    preferred: Option<PackageManager>,
) -> Option<PackageManager> {
    let mut order: Vec<PackageManager> = preferred.into_iter().collect();
    order.extend(
        PackageManager::DEFAULT_ORDER
            .into_iter()
            .filter(|pm| Some(*pm) != preferred),
    );

    order.into_iter().find(|manager| {
        let found = probe
            .probe(*manager)
            .is_some_and(|out| out.success && out.stdout.contains(NPM_PACKAGE_NAME));
        debug!(manager = %manager, found, "Probed package manager");
        found
    })
}

/// A resolved package-manager update invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCommand {
    pub manager: PackageManager,
    pub program: String,
    pub args: Vec<String>,
}

impl UpdateCommand {
    /// Human-readable command line.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command, inheriting stdio, and return its exit code.
    pub async fn run(&self) -> InstallResult<i32> {
        info!("Running: {}", self.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|e| InstallError::CommandFailed {
                command: format!("{} ({e})", self.display()),
                code: -1,
            })?;
        Ok(status.code().unwrap_or(1))
    }
}

/// Build the update command for the current install.
///
/// The manager comes from install metadata, then the environment hint, then
/// live detection, and finally defaults to npm. When npm was launched
/// through a script (`npm_execpath` ending in `.js`), that script is run with
/// the node runtime directly instead of resolving `npm` from `PATH`.
pub fn resolve_update_command(
    env: &PackageEnv,
    metadata: Option<&InstallMetadata>,
    probe: &dyn PackageProbe,
) -> UpdateCommand {
    let hint = package_manager_hint_from_env(env);
    let manager = metadata
        .and_then(|m| m.package_manager)
        .or(hint)
        .or_else(|| detect_installed_package_manager(probe, hint))
        .unwrap_or(PackageManager::Npm);

    let args = manager.update_args();

    if manager == PackageManager::Npm {
        if let Some(script) = env.exec_path.as_deref().filter(|p| is_script_path(p)) {
            let runtime = env
                .node_exec_path
                .clone()
                .unwrap_or_else(|| "node".to_string());
            return UpdateCommand {
                manager,
                program: runtime,
                args: std::iter::once(script.to_string()).chain(args).collect(),
            };
        }
    }

    UpdateCommand {
        manager,
        program: manager.program(),
        args,
    }
}

fn is_script_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    [".js", ".cjs", ".mjs"].iter().any(|ext| lower.ends_with(ext))
}
