//! Install configuration.
//!
//! Every tunable is read once from a variable lookup and then passed
//! explicitly to the components that need it, so tests can build arbitrary
//! configurations without touching the process environment.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_RELEASE_API_URL, DEFAULT_RELEASE_BASE_URL, PACKAGE_VERSION};

pub const ENV_SKIP_DOWNLOAD: &str = "MDV_SKIP_DOWNLOAD";
pub const ENV_INSTALL_ROOT: &str = "MDV_INSTALL_ROOT";
pub const ENV_BIN_PATH: &str = "MDV_BIN_PATH";
pub const ENV_TIMEOUT_MS: &str = "MDV_DOWNLOAD_TIMEOUT_MS";
pub const ENV_RETRIES: &str = "MDV_DOWNLOAD_RETRIES";
pub const ENV_BACKOFF_MS: &str = "MDV_DOWNLOAD_BACKOFF_MS";
pub const ENV_BACKOFF_JITTER_MS: &str = "MDV_DOWNLOAD_BACKOFF_JITTER_MS";
pub const ENV_DEBUG: &str = "MDV_DEBUG";
pub const ENV_BUILD_FROM_SOURCE: &str = "MDV_BUILD_FROM_SOURCE";
pub const ENV_RELEASE_BASE_URL: &str = "MDV_RELEASE_BASE_URL";
pub const ENV_RELEASE_API_URL: &str = "MDV_RELEASE_API_URL";
pub const ENV_GITHUB_TOKEN: &str = "MDV_GITHUB_TOKEN";
pub const ENV_GITHUB_TOKEN_FALLBACK: &str = "GITHUB_TOKEN";

/// Inclusive bounds and default for one numeric tuning knob.
#[derive(Debug, Clone, Copy)]
struct Knob {
    min: u64,
    max: u64,
    default: u64,
}

impl Knob {
    const fn new(min: u64, max: u64, default: u64) -> Self {
        Self { min, max, default }
    }

    /// Parse a configured value, truncate it and clamp it into range.
    /// Absent or non-numeric values fall back to the default.
    fn resolve(&self, raw: Option<&str>) -> u64 {
        let Some(value) = raw.and_then(|v| v.trim().parse::<f64>().ok()) else {
            return self.default;
        };
        if !value.is_finite() {
            return self.default;
        }
        let value = value.trunc();
        if value <= self.min as f64 {
            self.min
        } else if value >= self.max as f64 {
            self.max
        } else {
            value as u64
        }
    }
}

const RETRY_ATTEMPTS: Knob = Knob::new(1, 10, 3);
const TIMEOUT_MS: Knob = Knob::new(1_000, 120_000, 30_000);
const BACKOFF_MS: Knob = Knob::new(50, 5_000, 500);
const BACKOFF_JITTER_MS: Knob = Knob::new(0, 2_000, 250);

/// Network retry and timeout tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallTuning {
    /// Attempts per network operation (1..=10)
    pub retry_attempts: u32,
    /// Per-request timeout in milliseconds (1000..=120000)
    pub timeout_ms: u64,
    /// Backoff base in milliseconds (50..=5000)
    pub backoff_ms: u64,
    /// Upper bound of the random jitter in milliseconds (0..=2000)
    pub backoff_jitter_ms: u64,
}

impl Default for InstallTuning {
    fn default() -> Self {
        Self {
            retry_attempts: RETRY_ATTEMPTS.default as u32,
            timeout_ms: TIMEOUT_MS.default,
            backoff_ms: BACKOFF_MS.default,
            backoff_jitter_ms: BACKOFF_JITTER_MS.default,
        }
    }
}

impl InstallTuning {
    /// Build tuning from raw configured values, clamping each independently.
    pub fn from_raw(
        retries: Option<&str>,
        timeout_ms: Option<&str>,
        backoff_ms: Option<&str>,
        jitter_ms: Option<&str>,
    ) -> Self {
        Self {
            retry_attempts: RETRY_ATTEMPTS.resolve(retries) as u32,
            timeout_ms: TIMEOUT_MS.resolve(timeout_ms),
            backoff_ms: BACKOFF_MS.resolve(backoff_ms),
            backoff_jitter_ms: BACKOFF_JITTER_MS.resolve(jitter_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Complete configuration for an install or launch.
#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Skip acquisition entirely (offline/test installs)
    pub skip_download: bool,
    /// Directory holding the binary, cache and install metadata
    pub install_root: PathBuf,
    /// Explicit final binary path, overriding `{install_root}/bin/mdv`
    pub bin_path_override: Option<PathBuf>,
    pub tuning: InstallTuning,
    /// Emit the debug step log
    pub debug: bool,
    /// Allow building from source when no release asset can be installed
    pub build_from_source: bool,
    /// Repository base used for direct asset downloads
    pub release_base_url: String,
    /// Release metadata API base
    pub release_api_url: String,
    /// Bearer credential for release metadata queries
    pub github_token: Option<String>,
    /// Version of the package this launcher belongs to
    pub package_version: String,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            skip_download: false,
            install_root: default_install_root(),
            bin_path_override: None,
            tuning: InstallTuning::default(),
            debug: false,
            build_from_source: false,
            release_base_url: DEFAULT_RELEASE_BASE_URL.to_string(),
            release_api_url: DEFAULT_RELEASE_API_URL.to_string(),
            github_token: None,
            package_version: PACKAGE_VERSION.to_string(),
        }
    }
}

impl InstallConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let tuning = InstallTuning::from_raw(
            lookup(ENV_RETRIES).as_deref(),
            lookup(ENV_TIMEOUT_MS).as_deref(),
            lookup(ENV_BACKOFF_MS).as_deref(),
            lookup(ENV_BACKOFF_JITTER_MS).as_deref(),
        );

        Self {
            skip_download: is_truthy(lookup(ENV_SKIP_DOWNLOAD).as_deref()),
            install_root: non_empty(ENV_INSTALL_ROOT)
                .map(PathBuf::from)
                .unwrap_or(defaults.install_root),
            bin_path_override: non_empty(ENV_BIN_PATH).map(PathBuf::from),
            tuning,
            debug: is_truthy(lookup(ENV_DEBUG).as_deref()),
            build_from_source: is_truthy(lookup(ENV_BUILD_FROM_SOURCE).as_deref()),
            release_base_url: non_empty(ENV_RELEASE_BASE_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.release_base_url),
            release_api_url: non_empty(ENV_RELEASE_API_URL)
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.release_api_url),
            github_token: non_empty(ENV_GITHUB_TOKEN)
                .or_else(|| non_empty(ENV_GITHUB_TOKEN_FALLBACK)),
            package_version: defaults.package_version,
        }
    }

    /// Final path the binary is installed to and launched from.
    pub fn bin_path(&self) -> PathBuf {
        match &self.bin_path_override {
            Some(path) => path.clone(),
            None => self.install_root.join("bin").join(binary_file_name()),
        }
    }

    /// Root of the per-version verified cache.
    pub fn cache_root(&self) -> PathBuf {
        self.install_root.join("cache")
    }
}

/// File name of the installed binary on this platform.
pub fn binary_file_name() -> &'static str {
    if cfg!(windows) { "mdv.exe" } else { "mdv" }
}

/// Default install root (`~/.mdv`), falling back to the temp dir without a home.
fn default_install_root() -> PathBuf {
    dirs::home_dir()
        .map(|h| h.join(".mdv"))
        .unwrap_or_else(|| std::env::temp_dir().join("mdv"))
}

fn is_truthy(value: Option<&str>) -> bool {
    matches!(
        value.map(|v| v.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> InstallConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        InstallConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_tuning_defaults_when_absent() {
        let config = config_from(&[]);
        assert_eq!(config.tuning, InstallTuning::default());
        assert!(!config.skip_download);
        assert!(!config.build_from_source);
    }

    #[test]
    fn test_tuning_clamps_each_field() {
        let config = config_from(&[
            (ENV_RETRIES, "50"),
            (ENV_TIMEOUT_MS, "10"),
            (ENV_BACKOFF_MS, "2500.9"),
            (ENV_BACKOFF_JITTER_MS, "-5"),
        ]);
        assert_eq!(config.tuning.retry_attempts, 10);
        assert_eq!(config.tuning.timeout_ms, 1_000);
        assert_eq!(config.tuning.backoff_ms, 2_500);
        assert_eq!(config.tuning.backoff_jitter_ms, 0);
    }

    #[test]
    fn test_tuning_non_numeric_uses_default() {
        let tuning = InstallTuning::from_raw(Some("many"), Some(""), Some("NaN"), Some("inf"));
        assert_eq!(tuning, InstallTuning::default());
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            (ENV_SKIP_DOWNLOAD, "TRUE"),
            (ENV_INSTALL_ROOT, "/opt/mdv"),
            (ENV_RELEASE_BASE_URL, "https://mirror.example/mdv/"),
            (ENV_GITHUB_TOKEN_FALLBACK, "ghp_test"),
        ]);
        assert!(config.skip_download);
        assert_eq!(config.install_root, PathBuf::from("/opt/mdv"));
        assert_eq!(
            config.bin_path(),
            PathBuf::from("/opt/mdv").join("bin").join(binary_file_name())
        );
        assert_eq!(config.release_base_url, "https://mirror.example/mdv");
        assert_eq!(config.github_token.as_deref(), Some("ghp_test"));
    }

    #[test]
    fn test_bin_path_override() {
        let config = config_from(&[(ENV_BIN_PATH, "/usr/local/bin/mdv-real")]);
        assert_eq!(config.bin_path(), PathBuf::from("/usr/local/bin/mdv-real"));
    }

    #[test]
    fn test_truthy_values() {
        assert!(is_truthy(Some("1")));
        assert!(is_truthy(Some(" yes ")));
        assert!(!is_truthy(Some("0")));
        assert!(!is_truthy(Some("false")));
        assert!(!is_truthy(None));
    }
}
