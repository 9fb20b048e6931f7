//! Registry HTTP client.
//!
//! Consumes the read-only registry contract:
//! - `GET /packages/v1/{owner}/{slug}` — metadata with latest + versions
//! - `GET /packages/v1/{owner}/{slug}/versions` — versions map only
//! - `GET /packages/v1/{owner}/{slug}/tarball/{version}` — tarball URL
//!
//! Only HTTPS is allowed, except loopback addresses for test fixtures.
//! Authentication is a long-lived bearer token; a 401 surfaces as
//! `AUTH_REQUIRED` and is never retried. Idempotent GETs that fail with a
//! connection error or a 5xx are retried exactly once after 200 ms.

use crate::error::{Error, ErrorKind, Result};
use crate::integrity::IntegrityHasher;
use crate::spec::PackageName;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::time::Duration;
use url::{Host, Url};

/// Maximum tarball size accepted from the registry (200 MB).
pub const MAX_TARBALL_SIZE: u64 = 200 * 1024 * 1024;

/// Delay before the single retry of a failed idempotent GET.
const RETRY_DELAY: Duration = Duration::from_millis(200);

/// Request timeout per call.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Metadata for a single published version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VersionMeta {
    /// Declared dependencies (name -> range).
    #[serde(default)]
    pub dependencies: BTreeMap<String, String>,
    /// Yanked versions must not be used for new resolutions.
    #[serde(default)]
    pub yanked: bool,
    /// Publication timestamp, RFC 3339.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    /// Canonical integrity of the tarball, when the registry knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

/// Package-level metadata: latest plus the full versions map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageMeta {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub latest: String,
    #[serde(default)]
    pub versions: BTreeMap<String, VersionMeta>,
}

#[derive(Debug, Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: BTreeMap<String, VersionMeta>,
}

/// Tarball indirection: the registry may hand out CDN URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TarballInfo {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integrity: Option<String>,
}

/// A downloaded tarball with its integrity computed on the fly.
#[derive(Debug, Clone)]
pub struct DownloadedTarball {
    pub bytes: Bytes,
    pub integrity: String,
}

/// Async registry client. Clone freely; the underlying HTTP client is
/// connection-pooled.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: Url,
    http: Client,
    token: Option<String>,
}

impl RegistryClient {
    /// Create a client for the given base URL and optional bearer token.
    ///
    /// # Errors
    /// `INVALID_ARGUMENT` for an unparseable URL, `SECURITY_VIOLATION` for
    /// a plaintext URL outside loopback.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::invalid_argument(format!("invalid registry URL '{base_url}': {e}")))?;
        require_https_or_loopback(&base_url)?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(8)
            .user_agent(concat!("tz/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            http,
            token,
        })
    }

    /// The registry base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn package_url(&self, name: &PackageName, suffix: &str) -> Result<Url> {
        let path = format!(
            "packages/v1/{}/{}{}",
            name.owner(),
            name.slug(),
            suffix
        );
        self.base_url
            .join(&path)
            .map_err(|e| Error::internal(format!("failed to build URL for '{name}': {e}")))
    }

    /// Fetch package metadata: latest plus the full versions map.
    ///
    /// # Errors
    /// `PACKAGE_NOT_FOUND` on 404, `AUTH_REQUIRED` on 401, `NETWORK_ERROR`
    /// otherwise.
    pub async fn get_package(&self, name: &PackageName) -> Result<PackageMeta> {
        let url = self.package_url(name, "")?;
        let response = self.get_with_retry(&url).await?;
        let response = check_status(response, name, None)?;
        response
            .json()
            .await
            .map_err(|e| Error::network(format!("invalid metadata for '{name}': {e}")))
    }

    /// Fetch the versions map for a package.
    ///
    /// # Errors
    /// `PACKAGE_NOT_FOUND` on 404, `AUTH_REQUIRED` on 401, `NETWORK_ERROR`
    /// otherwise.
    pub async fn get_versions(&self, name: &PackageName) -> Result<BTreeMap<String, VersionMeta>> {
        let url = self.package_url(name, "/versions")?;
        let response = self.get_with_retry(&url).await?;
        let response = check_status(response, name, None)?;
        let parsed: VersionsResponse = response
            .json()
            .await
            .map_err(|e| Error::network(format!("invalid versions for '{name}': {e}")))?;
        Ok(parsed.versions)
    }

    /// Resolve the tarball URL (and optional integrity) for an exact version.
    ///
    /// # Errors
    /// `VERSION_NOT_FOUND` on 404, `AUTH_REQUIRED` on 401, `NETWORK_ERROR`
    /// otherwise.
    pub async fn get_tarball_info(&self, name: &PackageName, version: &str) -> Result<TarballInfo> {
        let url = self.package_url(name, &format!("/tarball/{version}"))?;
        let response = self.get_with_retry(&url).await?;
        let response = check_status(response, name, Some(version))?;
        response
            .json()
            .await
            .map_err(|e| Error::network(format!("invalid tarball info for '{name}': {e}")))
    }

    /// Download a tarball, computing its integrity while streaming.
    ///
    /// The bearer token is attached only when the tarball is served from
    /// the registry host itself, never to third-party CDNs.
    ///
    /// # Errors
    /// `SECURITY_VIOLATION` for plaintext non-loopback URLs,
    /// `NETWORK_ERROR` on transport failures or oversized payloads.
    pub async fn download_tarball(&self, url: &str) -> Result<DownloadedTarball> {
        let url = Url::parse(url)
            .map_err(|e| Error::network(format!("invalid tarball URL '{url}': {e}")))?;
        require_https_or_loopback(&url)?;

        let mut request = self.http.get(url.clone());
        if url.host() == self.base_url.host() {
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::auth_required(format!(
                "registry rejected credentials for '{url}'"
            )));
        }
        if !status.is_success() {
            return Err(Error::network(format!(
                "download failed with status {status} for '{url}'"
            )));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_TARBALL_SIZE {
                return Err(Error::network(format!(
                    "tarball too large: {len} bytes (max {MAX_TARBALL_SIZE})"
                )));
            }
        }

        let mut hasher = IntegrityHasher::new();
        let mut buf = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            if hasher.bytes_seen() > MAX_TARBALL_SIZE {
                return Err(Error::network(format!(
                    "tarball too large: exceeded {MAX_TARBALL_SIZE} bytes"
                )));
            }
            buf.extend_from_slice(&chunk);
        }

        Ok(DownloadedTarball {
            bytes: Bytes::from(buf),
            integrity: hasher.finalize(),
        })
    }

    /// GET with bearer auth and the single-retry policy: one retry after
    /// 200 ms on a connection-level failure or a 5xx response.
    async fn get_with_retry(&self, url: &Url) -> Result<Response> {
        match self.get_once(url).await {
            Ok(response) if response.status().is_server_error() => {
                tracing::debug!(%url, status = %response.status(), "retrying after 5xx");
                tokio::time::sleep(RETRY_DELAY).await;
                self.get_once(url).await.map_err(Error::from)
            }
            Ok(response) => Ok(response),
            Err(e) if e.is_connect() || e.is_timeout() => {
                tracing::debug!(%url, "retrying after connection failure");
                tokio::time::sleep(RETRY_DELAY).await;
                self.get_once(url).await.map_err(Error::from)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_once(&self, url: &Url) -> std::result::Result<Response, reqwest::Error> {
        let mut request = self.http.get(url.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        request.send().await
    }

}

fn check_status(
    response: Response,
    name: &PackageName,
    version: Option<&str>,
) -> Result<Response> {
    match response.status() {
        StatusCode::UNAUTHORIZED => Err(Error::auth_required(format!(
            "registry requires authentication for '{name}'"
        ))),
        StatusCode::NOT_FOUND => match version {
            Some(version) => Err(Error::version_not_found(&name.to_string(), version)),
            None => Err(Error::package_not_found(&name.to_string())),
        },
        status if !status.is_success() => Err(Error::network(format!(
            "registry returned status {status} for '{name}'"
        ))),
        _ => Ok(response),
    }
}

/// HTTPS-only transport, with loopback (`127.0.0.0/8`, `::1`, `localhost`)
/// exempted for test fixtures.
fn require_https_or_loopback(url: &Url) -> Result<()> {
    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(url) => Ok(()),
        scheme => Err(Error::new(
            ErrorKind::SecurityViolation,
            format!("refusing non-HTTPS registry URL '{url}' (scheme '{scheme}')"),
        )),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip).is_loopback(),
        Some(Host::Ipv6(ip)) => IpAddr::V6(ip).is_loopback(),
        None => false,
    }
}
