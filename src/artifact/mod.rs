//! Build artifact retrieval
//!
//! The CI platform is an external collaborator: the pipeline only needs to
//! list artifacts by name, pick the newest, and download its archive.
//! [`GithubArtifacts`] talks to the GitHub Actions API; [`InMemoryArtifacts`]
//! serves canned archives for tests.

pub mod github;
pub mod workspace;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

pub use github::{GithubArtifacts, GithubConfig, DEFAULT_MAX_ARCHIVE_BYTES};
pub use workspace::Workspace;

/// Artifact retrieval errors
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<zip::result::ZipError> for ArtifactError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}

/// A build artifact as the CI platform lists it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size_in_bytes: u64,
    pub archive_download_url: String,
    #[serde(default)]
    pub expired: bool,
    pub created_at: DateTime<Utc>,
}

/// Source of build artifacts
#[async_trait]
pub trait ArtifactSource: Send + Sync {
    /// Artifacts whose name matches `name`, in any order
    async fn list_artifacts(&self, name: &str) -> Result<Vec<Artifact>, ArtifactError>;

    /// Download the artifact's zip archive
    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError>;
}

/// Newest non-expired artifact named exactly `name`
pub fn select_newest<'a>(artifacts: &'a [Artifact], name: &str) -> Option<&'a Artifact> {
    artifacts
        .iter()
        .filter(|a| a.name == name && !a.expired)
        .max_by_key(|a| a.created_at)
}

// ============================================================================
// In-memory source
// ============================================================================

/// Canned artifacts keyed by id
#[derive(Default)]
pub struct InMemoryArtifacts {
    entries: Mutex<Vec<(Artifact, Vec<u8>)>>,
    downloads: Mutex<Vec<u64>>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, artifact: Artifact, archive: Vec<u8>) {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((artifact, archive));
    }

    /// Ids of downloaded artifacts, in download order
    pub fn downloads(&self) -> Vec<u64> {
        self.downloads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }
}

#[async_trait]
impl ArtifactSource for InMemoryArtifacts {
    async fn list_artifacts(&self, name: &str) -> Result<Vec<Artifact>, ArtifactError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|(a, _)| a.name == name)
            .map(|(a, _)| a.clone())
            .collect())
    }

    async fn download(&self, artifact: &Artifact) -> Result<Vec<u8>, ArtifactError> {
        let archive = self
            .entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(a, _)| a.id == artifact.id)
            .map(|(_, data)| data.clone())
            .ok_or_else(|| ArtifactError::Server {
                status: 404,
                message: format!("artifact {} not found", artifact.id),
            })?;

        self.downloads
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(artifact.id);
        Ok(archive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn artifact(id: u64, name: &str, day: u32, expired: bool) -> Artifact {
        Artifact {
            id,
            name: name.to_string(),
            size_in_bytes: 1024,
            archive_download_url: format!("https://example.invalid/{}", id),
            expired,
            created_at: Utc.with_ymd_and_hms(2026, 3, day, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_select_newest_by_creation_time() {
        let artifacts = vec![
            artifact(1, "site", 1, false),
            artifact(2, "site", 9, false),
            artifact(3, "site", 4, false),
        ];

        assert_eq!(select_newest(&artifacts, "site").unwrap().id, 2);
    }

    #[test]
    fn test_select_ignores_expired_and_other_names() {
        let artifacts = vec![
            artifact(1, "site", 1, false),
            artifact(2, "site", 9, true),
            artifact(3, "site-preview", 20, false),
        ];

        assert_eq!(select_newest(&artifacts, "site").unwrap().id, 1);
        assert!(select_newest(&artifacts, "docs").is_none());
    }

    #[tokio::test]
    async fn test_in_memory_source() {
        let source = InMemoryArtifacts::new();
        source.add(artifact(7, "site", 2, false), vec![1, 2, 3]);

        let listed = source.list_artifacts("site").await.unwrap();
        assert_eq!(listed.len(), 1);

        let data = source.download(&listed[0]).await.unwrap();
        assert_eq!(data, vec![1, 2, 3]);
        assert_eq!(source.downloads(), vec![7]);

        assert!(source.download(&artifact(8, "site", 3, false)).await.is_err());
    }
}
