//! mdv CLI - launcher and installer commands.
//!
//! - `mdv` resolves the installed binary, installs it when missing or stale
//!   and runs it with the original arguments.
//! - `mdv-install` exposes install, update, path and cache commands.

pub mod install_cmd;
pub mod logging;

pub use install_cmd::{InstallCli, InstallCommand};
pub use logging::init_logging;
