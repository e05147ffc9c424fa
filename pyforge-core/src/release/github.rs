//! GitHub Releases as a release source
//!
//! Enumerates releases through the REST API (`/repos/{owner}/{repo}/releases`)
//! and downloads assets from their browser download URLs.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{Asset, Release, ReleasePage, ReleaseSource};
use crate::error::{ForgeError, Result};

const API_BASE: &str = "https://api.github.com";

/// Releases requested per page (GitHub's maximum)
const PER_PAGE: usize = 100;

/// Release source backed by a GitHub repository
///
/// `timeout` bounds API calls as a whole. Asset downloads may take as long
/// as they need, but fail once no data arrives for `timeout`.
pub struct GitHubReleaseSource {
    client: reqwest::Client,
    api_base: String,
    repository: String,
    token: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct GhRelease {
    tag_name: String,
    published_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    #[serde(default)]
    assets: Vec<GhAsset>,
}

#[derive(Debug, Deserialize)]
struct GhAsset {
    name: String,
    browser_download_url: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    digest: Option<String>,
}

impl From<GhRelease> for Release {
    fn from(gh: GhRelease) -> Self {
        Release {
            tag: gh.tag_name,
            published_at: gh.published_at.unwrap_or(gh.created_at),
            assets: gh
                .assets
                .into_iter()
                .map(|a| Asset {
                    name: a.name,
                    download_url: a.browser_download_url,
                    size: a.size,
                    digest: a.digest,
                })
                .collect(),
        }
    }
}

impl GitHubReleaseSource {
    /// Create a source for `owner/repo`
    pub fn new(repository: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("pyforge/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {e}"))?;

        Ok(Self {
            client,
            api_base: API_BASE.to_string(),
            repository: repository.to_string(),
            token,
            timeout,
        })
    }

    /// Point the source at a different API host (GitHub Enterprise, mirrors)
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let builder = self.client.get(url).header("Accept", accept);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// API call returning JSON, bounded by the request timeout
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let request = self
            .request(url, "application/vnd.github+json")
            .timeout(self.timeout);
        self.send(url, request)
            .await?
            .json()
            .await
            .map_err(|e| network_error(url, &e))
    }

    async fn send(&self, url: &str, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(|e| network_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForgeError::Network {
                url: url.to_string(),
                reason: format!("HTTP {status}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ReleaseSource for GitHubReleaseSource {
    async fn list_releases(&self, page: Option<String>) -> Result<ReleasePage> {
        let page_number: usize = page.as_deref().and_then(|p| p.parse().ok()).unwrap_or(1);
        let url = format!(
            "{}/repos/{}/releases?per_page={}&page={}",
            self.api_base, self.repository, PER_PAGE, page_number
        );

        tracing::debug!("Listing releases: {}", url);
        let releases: Vec<GhRelease> = self.get_json(&url).await?;

        let next_page = (releases.len() == PER_PAGE).then(|| (page_number + 1).to_string());
        Ok(ReleasePage {
            releases: releases.into_iter().map(Release::from).collect(),
            next_page,
        })
    }

    async fn get_release_by_tag(&self, tag: &str) -> Result<Release> {
        let url = format!(
            "{}/repos/{}/releases/tags/{}",
            self.api_base, self.repository, tag
        );
        let release: GhRelease = self.get_json(&url).await?;
        Ok(release.into())
    }

    async fn download_asset(&self, asset: &Asset, dest_dir: &Path) -> Result<PathBuf> {
        let url = asset.download_url.as_str();
        tracing::info!("Downloading {} from {}", asset.name, url);

        let mut response = tokio::time::timeout(
            self.timeout,
            self.send(url, self.request(url, "application/octet-stream")),
        )
        .await
        .map_err(|_| stalled(url, self.timeout))??;

        let path = dest_dir.join(&asset.name);
        let mut file = tokio::fs::File::create(&path).await?;
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::time::timeout(self.timeout, response.chunk())
                .await
                .map_err(|_| stalled(url, self.timeout))?
                .map_err(|e| network_error(url, &e))?;
            let Some(chunk) = chunk else { break };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        tracing::debug!("Downloaded {} bytes to {:?}", written, path);
        Ok(path)
    }

    fn name(&self) -> &str {
        &self.repository
    }
}

fn stalled(url: &str, timeout: Duration) -> ForgeError {
    ForgeError::Network {
        url: url.to_string(),
        reason: format!("no data received for {}s", timeout.as_secs()),
        retryable: true,
    }
}

fn network_error(url: &str, e: &reqwest::Error) -> ForgeError {
    ForgeError::Network {
        url: url.to_string(),
        reason: e.to_string(),
        retryable: e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
    }
}
