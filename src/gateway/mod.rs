//! Storage network gateway
//!
//! The pipeline talks to the storage network only through
//! [`StorageGateway`]. Two implementations ship with the crate:
//!
//! - [`HttpGateway`] speaks the storage node's HTTP API
//! - [`MemoryGateway`] keeps an in-process network for tests

pub mod http;
pub mod memory;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::keystore::SigningIdentity;
use crate::types::{
    ContentReference, ManifestOptions, PointerEntry, PointerManifest, PointerTopic,
    StorageAllocation, UploadTag,
};

pub use http::{HttpGateway, HttpGatewayConfig};
pub use memory::MemoryGateway;

/// Gateway errors
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Storage node returned an error
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Local file access failed while preparing an upload
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry signature rejected
    #[error("Signature error: {0}")]
    Signature(String),
}

/// Operations the publish pipeline needs from the storage network
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Allocations (postage batches) owned by the node, in node order
    async fn list_allocations(&self) -> Result<Vec<StorageAllocation>, GatewayError>;

    /// Create a progress tag to attach to an upload
    async fn create_upload_tag(&self) -> Result<UploadTag, GatewayError>;

    /// Upload every file below `path` as one collection
    async fn upload_directory(
        &self,
        allocation_id: &str,
        path: &Path,
        tag_id: u64,
        options: &ManifestOptions,
    ) -> Result<ContentReference, GatewayError>;

    /// Fresh snapshot of a tag's counters
    async fn retrieve_tag(&self, tag_id: u64) -> Result<UploadTag, GatewayError>;

    /// Create (or re-create, idempotently) the sequence feed manifest
    async fn create_pointer_manifest(
        &self,
        allocation_id: &str,
        topic: &PointerTopic,
        owner: &str,
    ) -> Result<PointerManifest, GatewayError>;

    /// Sign and store the next entry of the feed
    async fn write_pointer_entry(
        &self,
        allocation_id: &str,
        identity: &SigningIdentity,
        topic: &PointerTopic,
        reference: &ContentReference,
    ) -> Result<PointerEntry, GatewayError>;
}

/// A file scheduled for a collection upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionFile {
    /// Path relative to the collection root, `/`-separated
    pub name: String,
    pub path: PathBuf,
}

/// List regular files below `root`, sorted by collection path
pub fn collect_files(root: &Path) -> Result<Vec<CollectionFile>, GatewayError> {
    let mut files = Vec::new();

    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            GatewayError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(|e| GatewayError::InvalidResponse(e.to_string()))?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        files.push(CollectionFile {
            name,
            path: entry.path().to_path_buf(),
        });
    }

    files.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(files)
}

/// Guess MIME type from file extension
pub fn guess_content_type(name: &str) -> &'static str {
    match name.rsplit('.').next() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "application/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("txt") => "text/plain; charset=utf-8",
        Some("xml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("ico") => "image/x-icon",
        Some("webp") => "image/webp",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("wasm") => "application/wasm",
        Some("pdf") => "application/pdf",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_collect_files_sorted_and_relative() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("assets/img")).unwrap();
        std::fs::write(dir.path().join("index.html"), "<html></html>").unwrap();
        std::fs::write(dir.path().join("assets/app.js"), "1").unwrap();
        std::fs::write(dir.path().join("assets/img/logo.png"), [0u8; 4]).unwrap();

        let files = collect_files(dir.path()).unwrap();
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();

        assert_eq!(names, vec!["assets/app.js", "assets/img/logo.png", "index.html"]);
    }

    #[test]
    fn test_content_type_guess() {
        assert_eq!(guess_content_type("index.html"), "text/html; charset=utf-8");
        assert_eq!(guess_content_type("a/b/c.woff2"), "font/woff2");
        assert_eq!(guess_content_type("LICENSE"), "application/octet-stream");
    }
}
