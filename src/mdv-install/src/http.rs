//! HTTP fetching with manual redirects and hard timeouts.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::InstallTuning;
use crate::error::{InstallError, InstallResult};

/// User-Agent sent with every request.
pub const USER_AGENT: &str = concat!("mdv-installer/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed for one request.
pub const MAX_REDIRECTS: usize = 5;

const ACCEPT_OCTET_STREAM: &str = "application/octet-stream";
const ACCEPT_TEXT: &str = "text/plain, application/octet-stream";
const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";

/// Fetches release assets.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Stream `url` into `output`. `output` is owned by the download and is
    /// removed if the download fails part way.
    async fn download(&self, url: &str, output: &Path) -> InstallResult<()>;

    /// Fetch `url` as text (checksum manifests).
    async fn request_text(&self, url: &str) -> InstallResult<String>;
}

/// reqwest-backed fetcher.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout: Duration,
}

impl HttpFetcher {
    /// Create a fetcher using the configured request timeout.
    pub fn new(tuning: &InstallTuning) -> InstallResult<Self> {
        Self::with_timeout(tuning.timeout())
    }

    /// Create a fetcher with an explicit request timeout.
    pub fn with_timeout(timeout: Duration) -> InstallResult<Self> {
        // Redirects are followed by hand so the hop limit and error are ours.
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(timeout)
            .tcp_nodelay(true)
            .build()?;

        Ok(Self { client, timeout })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Fetch `url` and decode it as JSON. Any status >= 400, and a redirect
    /// that could not be followed, is an error.
    ///
    /// `auth_token` is sent as a bearer credential when present, and only to
    /// the origin of `url`.
    pub async fn request_json<T>(&self, url: &str, auth_token: Option<&str>) -> InstallResult<T>
    where
        T: DeserializeOwned,
    {
        self.bounded(url, async {
            let response = self.send(url, ACCEPT_GITHUB_JSON, auth_token).await?;
            let status = response.status();
            if status.is_redirection() || status.as_u16() >= 400 {
                return Err(InstallError::HttpStatus {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        })
        .await
    }

    /// Issue a GET, following up to [`MAX_REDIRECTS`] redirects.
    ///
    /// `auth_token` is dropped for the rest of the chain as soon as a
    /// redirect leaves the scheme, host and port of `url`.
    async fn send(
        &self,
        url: &str,
        accept: &str,
        auth_token: Option<&str>,
    ) -> InstallResult<Response> {
        let origin = origin_of(url);
        let mut auth_token = auth_token;
        let mut current = url.to_string();

        for hop in 0..=MAX_REDIRECTS {
            if auth_token.is_some() && (origin.is_none() || origin_of(&current) != origin) {
                debug!(url = %current, "Redirect left the original origin, dropping credentials");
                auth_token = None;
            }

            let mut request = self.client.get(&current).header(ACCEPT, accept);
            if let Some(token) = auth_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            debug!(url = %current, status = status.as_u16(), hop, "HTTP response");

            if !status.is_redirection() {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                // A redirect without a target is a terminal status.
                return Ok(response);
            };

            current = match response.url().join(location) {
                Ok(next) => next.to_string(),
                Err(_) => location.to_string(),
            };
        }

        Err(InstallError::TooManyRedirects {
            url: url.to_string(),
            limit: MAX_REDIRECTS,
        })
    }

    /// Run `operation`, dropping it and failing once the timeout elapses.
    async fn bounded<T, Fut>(&self, url: &str, operation: Fut) -> InstallResult<T>
    where
        Fut: Future<Output = InstallResult<T>>,
    {
        match tokio::time::timeout(self.timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(InstallError::Timeout {
                url: url.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    async fn stream_to_file(&self, url: &str, output: &Path) -> InstallResult<()> {
        let response = self.send(url, ACCEPT_OCTET_STREAM, None).await?;
        if response.status() != StatusCode::OK {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(output).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        file.flush().await?;
        debug!(url, bytes = written, path = %output.display(), "Download complete");
        Ok(())
    }
}

/// Scheme, host and effective port of `url`.
fn origin_of(url: &str) -> Option<(String, String, u16)> {
    let parsed = Url::parse(url).ok()?;
    Some((
        parsed.scheme().to_string(),
        parsed.host_str()?.to_ascii_lowercase(),
        parsed.port_or_known_default()?,
    ))
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn download(&self, url: &str, output: &Path) -> InstallResult<()> {
        let result = self.bounded(url, self.stream_to_file(url, output)).await;
        if result.is_err() {
            // Never leave a partial file behind.
            let _ = tokio::fs::remove_file(output).await;
        }
        result
    }

    async fn request_text(&self, url: &str) -> InstallResult<String> {
        self.bounded(url, async {
            let response = self.send(url, ACCEPT_TEXT, None).await?;
            if response.status() != StatusCode::OK {
                return Err(InstallError::HttpStatus {
                    url: url.to_string(),
                    status: response.status().as_u16(),
                });
            }
            Ok(response.text().await?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::with_timeout(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_download_writes_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/mdv-linux-x64"))
            .and(header("accept", "application/octet-stream"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"binary".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mdv");
        fetcher()
            .download(&format!("{}/mdv-linux-x64", server.uri()), &output)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"binary");
    }

    #[tokio::test]
    async fn test_download_follows_relative_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/start"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/final"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/final"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"redirected".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mdv");
        fetcher()
            .download(&format!("{}/start", server.uri()), &output)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&output).unwrap(), b"redirected");
    }

    #[tokio::test]
    async fn test_redirect_loop_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
            .expect((MAX_REDIRECTS + 1) as u64)
            .mount(&server)
            .await;

        let result = fetcher()
            .request_text(&format!("{}/loop", server.uri()))
            .await;
        assert!(matches!(
            result,
            Err(InstallError::TooManyRedirects { limit: MAX_REDIRECTS, .. })
        ));
    }

    #[tokio::test]
    async fn test_non_200_status_leaves_no_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mdv");
        let result = fetcher()
            .download(&format!("{}/missing", server.uri()), &output)
            .await;

        assert!(matches!(
            result,
            Err(InstallError::HttpStatus { status: 404, .. })
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_download_timeout_removes_partial_output() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(b"slow".to_vec())
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mdv");
        std::fs::write(&output, b"stale partial").unwrap();

        let fetcher = HttpFetcher::with_timeout(Duration::from_millis(200)).unwrap();
        let result = fetcher
            .download(&format!("{}/slow", server.uri()), &output)
            .await;

        assert!(matches!(
            result,
            Err(InstallError::Timeout { timeout_ms: 200, .. })
        ));
        assert!(!output.exists());
    }

    #[tokio::test]
    async fn test_request_text() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/checksums-linux-x64.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("abc  mdv-linux-x64\n"))
            .mount(&server)
            .await;

        let text = fetcher()
            .request_text(&format!("{}/checksums-linux-x64.txt", server.uri()))
            .await
            .unwrap();
        assert_eq!(text, "abc  mdv-linux-x64\n");
    }

    #[derive(Debug, Deserialize)]
    struct ReleaseName {
        name: String,
    }

    #[tokio::test]
    async fn test_request_json_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(serde_json::json!({"name": "v1.0.0"}).to_string(), "application/json"),
            )
            .mount(&server)
            .await;

        let release: ReleaseName = fetcher()
            .request_json(
                &format!("{}/releases/latest", server.uri()),
                Some("secret-token"),
            )
            .await
            .unwrap();
        assert_eq!(release.name, "v1.0.0");
    }

    #[tokio::test]
    async fn test_request_json_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let result: InstallResult<ReleaseName> = fetcher()
            .request_json(&format!("{}/releases/latest", server.uri()), None)
            .await;
        assert!(matches!(
            result,
            Err(InstallError::HttpStatus { status: 403, .. })
        ));
    }

    fn json_body(name: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .set_body_raw(serde_json::json!({ "name": name }).to_string(), "application/json")
    }

    #[tokio::test]
    async fn test_request_json_drops_token_on_cross_origin_redirect() {
        let api = MockServer::start().await;
        let other = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", format!("{}/landing", other.uri()).as_str()),
            )
            .expect(1)
            .mount(&api)
            .await;

        Mock::given(method("GET"))
            .and(path("/landing"))
            .and(header_exists("authorization"))
            .respond_with(json_body("leaked"))
            .expect(0)
            .mount(&other)
            .await;
        Mock::given(method("GET"))
            .and(path("/landing"))
            .respond_with(json_body("v1.0.0"))
            .expect(1)
            .mount(&other)
            .await;

        let release: ReleaseName = fetcher()
            .request_json(
                &format!("{}/releases/latest", api.uri()),
                Some("secret-token"),
            )
            .await
            .unwrap();
        assert_eq!(release.name, "v1.0.0");
    }

    #[tokio::test]
    async fn test_request_json_keeps_token_on_same_origin_redirect() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/releases/latest"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/releases/v1"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/releases/v1"))
            .and(header("authorization", "Bearer secret-token"))
            .respond_with(json_body("v1.0.0"))
            .expect(1)
            .mount(&server)
            .await;

        let release: ReleaseName = fetcher()
            .request_json(
                &format!("{}/releases/latest", server.uri()),
                Some("secret-token"),
            )
            .await
            .unwrap();
        assert_eq!(release.name, "v1.0.0");
    }

    #[tokio::test]
    async fn test_request_json_redirect_without_location_is_status_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(302).set_body_string("not json"))
            .mount(&server)
            .await;

        let result: InstallResult<ReleaseName> = fetcher()
            .request_json(&format!("{}/releases/latest", server.uri()), None)
            .await;
        assert!(matches!(
            result,
            Err(InstallError::HttpStatus { status: 302, .. })
        ));
    }
}
