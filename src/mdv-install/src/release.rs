//! Release metadata lookup and asset bundle resolution.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::InstallResult;
use crate::http::HttpFetcher;

/// Which release to query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseKind {
    /// The release tagged `v{version}`
    Tagged(String),
    /// The newest published release
    Latest,
}

impl ReleaseKind {
    /// Path segment under `{api}/releases/`.
    pub fn path(&self) -> String {
        match self {
            Self::Tagged(version) => format!("tags/v{version}"),
            Self::Latest => "latest".to_string(),
        }
    }
}

impl std::fmt::Display for ReleaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// One file attached to a release.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReleaseFile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub browser_download_url: Option<String>,
}

/// Release metadata as returned by the release host.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Release {
    #[serde(default)]
    pub tag_name: Option<String>,
    #[serde(default)]
    pub assets: Vec<ReleaseFile>,
}

impl Release {
    /// Download URL of the first asset named `name` that has a non-empty URL.
    pub fn download_url(&self, name: &str) -> Option<&str> {
        self.assets
            .iter()
            .filter(|asset| asset.name == name)
            .filter_map(|asset| asset.browser_download_url.as_deref())
            .find(|url| !url.is_empty())
    }
}

/// Binary and checksum manifest URLs taken from one release query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseAssetBundle {
    pub binary_url: String,
    pub checksums_url: String,
}

/// Source of release metadata.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn get_release(&self, kind: &ReleaseKind) -> InstallResult<Release>;
}

/// GitHub-style release API (`{api}/releases/tags/v{version}`, `{api}/releases/latest`).
pub struct GitHubReleases {
    fetcher: HttpFetcher,
    api_url: String,
    auth_token: Option<String>,
}

impl GitHubReleases {
    pub fn new(fetcher: HttpFetcher, api_url: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            fetcher,
            api_url: api_url.into(),
            auth_token,
        }
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleases {
    async fn get_release(&self, kind: &ReleaseKind) -> InstallResult<Release> {
        let url = format!("{}/releases/{}", self.api_url, kind.path());
        self.fetcher
            .request_json(&url, self.auth_token.as_deref())
            .await
    }
}

/// Resolve the binary and manifest URLs for `asset`.
///
/// Queries the tagged release first and the latest release second. A query
/// only counts when it yields both URLs; failures and incomplete releases
/// move on to the next kind. `None` means the release is unresolvable.
pub async fn resolve_release_asset_bundle(
    version: &str,
    asset: &str,
    checksums_asset: &str,
    source: &dyn ReleaseSource,
) -> Option<ReleaseAssetBundle> {
    for kind in [ReleaseKind::Tagged(version.to_string()), ReleaseKind::Latest] {
        let release = match source.get_release(&kind).await {
            Ok(release) => release,
            Err(e) => {
                debug!(release = %kind, error = %e, "Release query failed");
                continue;
            }
        };

        match (release.download_url(asset), release.download_url(checksums_asset)) {
            (Some(binary_url), Some(checksums_url)) => {
                debug!(release = %kind, binary_url, checksums_url, "Resolved release assets");
                return Some(ReleaseAssetBundle {
                    binary_url: binary_url.to_string(),
                    checksums_url: checksums_url.to_string(),
                });
            }
            _ => debug!(release = %kind, asset, checksums_asset, "Release is missing assets"),
        }
    }

    None
}

/// Whether a fallback URL is worth downloading after `primary` failed.
pub fn should_use_fallback_url(primary: &str, fallback: Option<&str>) -> bool {
    matches!(fallback, Some(url) if !url.is_empty() && url != primary)
}
