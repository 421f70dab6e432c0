//! GitHub Actions artifact client

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{header, Client};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use super::{Artifact, ArtifactError, ArtifactSource};

const USER_AGENT: &str = concat!("feed-publisher/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Default ceiling on a downloaded archive (1 GiB)
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 1 << 30;

/// Largest buffer reserved up front from an advertised size
const MAX_PREALLOCATE_BYTES: u64 = 64 << 20;

/// Repository coordinates and credentials
#[derive(Debug, Clone)]
pub struct GithubConfig {
    /// API root, `https://api.github.com` unless running against a mirror
    pub api_url: String,
    pub owner: String,
    pub repo: String,
    /// Token with `actions:read`; artifact downloads require one
    pub token: Option<String>,
    pub timeout: Duration,
    /// Downloads larger than this fail instead of being buffered
    pub max_archive_bytes: u64,
}

#[derive(Debug, Deserialize)]
struct ArtifactList {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

/// [`ArtifactSource`] backed by the GitHub Actions REST API
pub struct GithubArtifacts {
    config: GithubConfig,
    client: Client,
}

impl GithubArtifacts {
    pub fn new(config: GithubConfig) -> Result<Self, ArtifactError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            header::HeaderValue::from_static(API_VERSION),
        );
        if let Some(ref token) = config.token {
            let value = header::HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ArtifactError::Archive(format!("invalid token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { config, client })
    }
}

#[async_trait]
impl ArtifactSource for GithubArtifacts {
    async fn list_artifacts(&self, name: &str) -> Result<Vec<Artifact>, ArtifactError> {
        let url = format!(
            "{}/repos/{}/{}/actions/artifacts?name={}&per_page=100",
            self.config.api_url.trim_end_matches('/'),
            urlencoding::encode(&self.config.owner),
            urlencoding::encode(&self.config.repo),
            urlencoding::encode(name)
        );

        debug!("Listing artifacts: {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Server { status, message });
        }

        let list: ArtifactList = response.json().await?;
        Ok(list.artifacts)
    }

    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError> {
        info!(
            artifact = artifact.id,
            size = artifact.size_in_bytes,
            "Downloading artifact '{}'", artifact.name
        );

        let response = self.client.get(&artifact.archive_download_url).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(ArtifactError::Server { status, message });
        }

        let limit = self.config.max_archive_bytes;
        let total_size = response.content_length().unwrap_or(artifact.size_in_bytes);
        if response.content_length().is_some_and(|len| len > limit) {
            return Err(too_large(total_size, limit));
        }

        let capacity = total_size.min(limit).min(MAX_PREALLOCATE_BYTES);
        let mut data = Vec::with_capacity(capacity as usize);
        let mut last_percent = 0u64;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (data.len() + chunk.len()) as u64 > limit {
                return Err(too_large((data.len() + chunk.len()) as u64, limit));
            }
            data.extend_from_slice(&chunk);

            if total_size > 0 {
                let percent = (data.len() as u64 * 100) / total_size;
                if percent >= last_percent + 10 {
                    last_percent = percent;
                    debug!("Download progress: {}%", percent.min(100));
                }
            }
        }

        info!(bytes = data.len(), "Artifact downloaded");
        Ok(data)
    }
}

fn too_large(size: u64, limit: u64) -> ArtifactError {
    ArtifactError::Archive(format!(
        "archive of {} bytes exceeds the {} byte limit",
        size, limit
    ))
}
