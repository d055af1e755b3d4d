//! Release asset naming.
//!
//! Binary assets are published as `mdv-{platform}-{arch}[.exe]` next to a
//! `checksums-{platform}-{arch}.txt` manifest.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{InstallError, InstallResult};

/// Platform identifier used for Windows release assets.
pub const WINDOWS_PLATFORM: &str = "win32";

/// Every (platform, arch) pair release assets are published for.
pub const SUPPORTED_TARGETS: &[(&str, &str)] = &[
    ("linux", "x64"),
    ("linux", "arm64"),
    ("darwin", "x64"),
    ("darwin", "arm64"),
    ("win32", "x64"),
    ("win32", "arm64"),
];

static BINARY_ASSET_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^mdv-([a-z0-9]+)-([a-z0-9_]+)(\.exe)?$").expect("Invalid asset name regex")
});

/// The platform/architecture pair a release asset is built for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReleaseAsset {
    pub platform: String,
    pub arch: String,
}

impl ReleaseAsset {
    pub fn new(platform: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            arch: arch.into(),
        }
    }

    /// Asset for the platform this binary was compiled for.
    pub fn current() -> InstallResult<Self> {
        let platform = match std::env::consts::OS {
            "linux" => "linux",
            "macos" => "darwin",
            "windows" => WINDOWS_PLATFORM,
            other => return Err(unsupported(other, std::env::consts::ARCH)),
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "x64",
            "aarch64" => "arm64",
            other => return Err(unsupported(std::env::consts::OS, other)),
        };
        Ok(Self::new(platform, arch))
    }

    /// Binary asset name.
    pub fn name(&self) -> String {
        asset_name_for(&self.platform, &self.arch)
    }

    /// Checksum manifest asset name.
    pub fn manifest_name(&self) -> String {
        checksums_asset_name_for(&self.platform, &self.arch)
    }
}

fn unsupported(os: &str, arch: &str) -> InstallError {
    InstallError::UnsupportedPlatform {
        os: os.to_string(),
        arch: arch.to_string(),
    }
}

/// Binary asset name for a platform/arch pair.
pub fn asset_name_for(platform: &str, arch: &str) -> String {
    let suffix = if platform == WINDOWS_PLATFORM { ".exe" } else { "" };
    format!("mdv-{platform}-{arch}{suffix}")
}

/// Checksum manifest name for a platform/arch pair.
pub fn checksums_asset_name_for(platform: &str, arch: &str) -> String {
    format!("checksums-{platform}-{arch}.txt")
}

/// Derive the manifest name from a binary asset name.
///
/// Returns `None` for names that don't follow the binary asset pattern;
/// such assets cannot be verified.
pub fn checksums_asset_name_from_binary_asset(name: &str) -> Option<String> {
    let caps = BINARY_ASSET_PATTERN.captures(name)?;
    Some(checksums_asset_name_for(&caps[1], &caps[2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_asset_names() {
        assert_eq!(asset_name_for("linux", "x64"), "mdv-linux-x64");
        assert_eq!(asset_name_for("win32", "arm64"), "mdv-win32-arm64.exe");
        assert_eq!(
            checksums_asset_name_for("darwin", "arm64"),
            "checksums-darwin-arm64.txt"
        );
    }

    #[test]
    fn test_manifest_name_consistent_for_all_targets() {
        for (platform, arch) in SUPPORTED_TARGETS {
            let binary = asset_name_for(platform, arch);
            assert_eq!(
                checksums_asset_name_from_binary_asset(&binary),
                Some(checksums_asset_name_for(platform, arch)),
                "manifest for {binary}"
            );
        }
    }

    #[test]
    fn test_asset_names_are_unique() {
        let names: HashSet<String> = SUPPORTED_TARGETS
            .iter()
            .map(|(p, a)| asset_name_for(p, a))
            .collect();
        assert_eq!(names.len(), SUPPORTED_TARGETS.len());
    }

    #[test]
    fn test_unknown_asset_has_no_manifest() {
        assert_eq!(checksums_asset_name_from_binary_asset("mdv.tar.gz"), None);
        assert_eq!(checksums_asset_name_from_binary_asset("other-linux-x64"), None);
        assert_eq!(checksums_asset_name_from_binary_asset("mdv-linux"), None);
        assert_eq!(checksums_asset_name_from_binary_asset(""), None);
    }

    #[test]
    fn test_current_asset_round_trips() {
        if let Ok(asset) = ReleaseAsset::current() {
            assert_eq!(
                checksums_asset_name_from_binary_asset(&asset.name()),
                Some(asset.manifest_name())
            );
        }
    }
}
