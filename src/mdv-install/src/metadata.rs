//! Persisted install metadata (`{install_root}/install-meta.json`).

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{InstallError, InstallResult};
use crate::method::PackageManager;

const METADATA_FILE: &str = "install-meta.json";

/// Record of the last successful install.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMetadata {
    /// Package manager that ran the install, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_manager: Option<PackageManager>,
    /// Installed binary version
    pub version: String,
    pub saved_at: DateTime<Utc>,
}

impl InstallMetadata {
    pub fn new(package_manager: Option<PackageManager>, version: impl Into<String>) -> Self {
        Self {
            package_manager,
            version: version.into(),
            saved_at: Utc::now(),
        }
    }

    /// Path of the metadata file under `install_root`.
    pub fn path(install_root: &Path) -> PathBuf {
        install_root.join(METADATA_FILE)
    }

    /// Load metadata; missing or unreadable files read as `None`.
    pub fn load(install_root: &Path) -> Option<Self> {
        let content = std::fs::read_to_string(Self::path(install_root)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Write the metadata file, replacing any previous one atomically.
    pub fn save(&self, install_root: &Path) -> InstallResult<()> {
        std::fs::create_dir_all(install_root)?;
        let content = serde_json::to_string_pretty(self)?;

        let mut staged = tempfile::Builder::new()
            .prefix(".install-meta-")
            .suffix(".tmp")
            .tempfile_in(install_root)?;
        staged.write_all(content.as_bytes())?;
        staged.as_file().sync_all()?;
        staged
            .persist(Self::path(install_root))
            .map_err(|e| InstallError::Io(e.error))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let root = tempfile::tempdir().unwrap();
        let meta = InstallMetadata::new(Some(PackageManager::Pnpm), "1.2.3");
        meta.save(root.path()).unwrap();

        let loaded = InstallMetadata::load(root.path()).unwrap();
        assert_eq!(loaded, meta);

        let raw = std::fs::read_to_string(InstallMetadata::path(root.path())).unwrap();
        assert!(raw.contains("\"packageManager\": \"pnpm\""));
        assert!(raw.contains("\"savedAt\""));
    }

    #[test]
    fn test_missing_or_corrupt_reads_as_none() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(InstallMetadata::load(root.path()), None);

        std::fs::write(InstallMetadata::path(root.path()), "{not json").unwrap();
        assert_eq!(InstallMetadata::load(root.path()), None);
    }

    #[test]
    fn test_save_replaces_previous_record_without_leftovers() {
        let root = tempfile::tempdir().unwrap();
        InstallMetadata::new(Some(PackageManager::Npm), "0.9.0")
            .save(root.path())
            .unwrap();
        InstallMetadata::new(Some(PackageManager::Yarn), "1.0.0")
            .save(root.path())
            .unwrap();

        let loaded = InstallMetadata::load(root.path()).unwrap();
        assert_eq!(loaded.version, "1.0.0");
        assert_eq!(loaded.package_manager, Some(PackageManager::Yarn));

        let entries: Vec<_> = std::fs::read_dir(root.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("install-meta.json")]);
    }
}
