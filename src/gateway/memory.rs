//! In-process storage network
//!
//! Used by tests. Tag progress can be scripted so the
//! replication monitor can be driven through stalls and resumptions, and
//! every operation can be made to fail on demand.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::{collect_files, GatewayError, StorageGateway};
use crate::keystore::SigningIdentity;
use crate::pointer::{sign_entry, verify_entry};
use crate::types::{
    ContentReference, ManifestOptions, PointerEntry, PointerManifest, PointerTopic,
    StorageAllocation, UploadTag,
};

/// Chunk size used to estimate `split` for uploaded files
const CHUNK_SIZE: u64 = 4096;

#[derive(Default)]
struct MemoryState {
    allocations: Vec<StorageAllocation>,
    next_tag: u64,
    tags: HashMap<u64, UploadTag>,
    /// Scripted (seen, synced) snapshots, consumed one per retrieval
    tag_script: Vec<(u64, u64)>,
    script_cursor: usize,
    split_override: Option<u64>,
    uploads: Vec<UploadRecord>,
    manifests: Vec<PointerManifest>,
    feeds: HashMap<(String, PointerTopic), Vec<PointerEntry>>,
    tag_polls: usize,
    upload_error: Option<String>,
    tag_error: Option<String>,
    pointer_error: Option<String>,
}

/// An upload accepted by the in-memory network
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub allocation_id: String,
    pub tag_id: u64,
    pub files: Vec<String>,
    pub options: ManifestOptions,
    pub reference: ContentReference,
}

/// In-memory [`StorageGateway`]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    /// A network with one long-lived usable allocation
    pub fn new() -> Self {
        Self::with_allocations(vec![StorageAllocation::new("memory-batch", 86_400, true)])
    }

    pub fn with_allocations(allocations: Vec<StorageAllocation>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                allocations,
                next_tag: 1,
                ..Default::default()
            }),
        }
    }

    /// Force the chunk count reported for the next uploads
    pub fn with_split(self, split: u64) -> Self {
        self.lock().split_override = Some(split);
        self
    }

    /// Script the `(seen, synced)` counters returned by successive tag
    /// retrievals. The last snapshot repeats once the script runs out.
    pub fn script_tag_progress(&self, snapshots: Vec<(u64, u64)>) {
        let mut state = self.lock();
        state.tag_script = snapshots;
        state.script_cursor = 0;
    }

    pub fn fail_uploads(&self, message: &str) {
        self.lock().upload_error = Some(message.to_string());
    }

    pub fn fail_tag_retrieval(&self, message: &str) {
        self.lock().tag_error = Some(message.to_string());
    }

    pub fn fail_pointer_writes(&self, message: &str) {
        self.lock().pointer_error = Some(message.to_string());
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.lock().uploads.clone()
    }

    /// Number of tag retrievals served
    pub fn tag_polls(&self) -> usize {
        self.lock().tag_polls
    }

    pub fn manifests(&self) -> Vec<PointerManifest> {
        self.lock().manifests.clone()
    }

    /// Entries written to a feed, oldest first
    pub fn feed_entries(&self, owner: &str, topic: &PointerTopic) -> Vec<PointerEntry> {
        self.lock()
            .feeds
            .get(&(owner.to_string(), *topic))
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageGateway for MemoryGateway {
    async fn list_allocations(&self) -> Result<Vec<StorageAllocation>, GatewayError> {
        Ok(self.lock().allocations.clone())
    }

    async fn create_upload_tag(&self) -> Result<UploadTag, GatewayError> {
        let mut state = self.lock();
        let tag = UploadTag::new(state.next_tag);
        state.next_tag += 1;
        state.tags.insert(tag.id, tag);
        Ok(tag)
    }

    async fn upload_directory(
        &self,
        allocation_id: &str,
        path: &Path,
        tag_id: u64,
        options: &ManifestOptions,
    ) -> Result<ContentReference, GatewayError> {
        let upload_error = self.lock().upload_error.clone();
        if let Some(message) = upload_error {
            return Err(GatewayError::Server {
                status: 500,
                message,
            });
        }

        let files = collect_files(path)?;
        let mut hasher = Sha256::new();
        let mut chunks = 0u64;
        for file in &files {
            let data = tokio::fs::read(&file.path).await?;
            hasher.update(file.name.as_bytes());
            hasher.update((data.len() as u64).to_be_bytes());
            hasher.update(&data);
            chunks += (data.len() as u64).div_ceil(CHUNK_SIZE).max(1);
        }
        let digest = hasher.finalize();

        let reference = if options.encrypt {
            // Encrypted references carry a 32-byte decryption key
            let key = Sha256::digest(digest);
            format!("{}{}", hex::encode(digest), hex::encode(key))
        } else {
            hex::encode(digest)
        };
        let reference =
            ContentReference::parse(&reference).map_err(GatewayError::InvalidResponse)?;

        let mut state = self.lock();
        if !state.allocations.iter().any(|a| a.id == allocation_id) {
            return Err(GatewayError::NotFound(format!("allocation {}", allocation_id)));
        }
        let split = state.split_override.unwrap_or(chunks + 1);
        let tag = state
            .tags
            .get_mut(&tag_id)
            .ok_or_else(|| GatewayError::NotFound(format!("tag {}", tag_id)))?;
        tag.split = split;

        state.uploads.push(UploadRecord {
            allocation_id: allocation_id.to_string(),
            tag_id,
            files: files.into_iter().map(|f| f.name).collect(),
            options: options.clone(),
            reference: reference.clone(),
        });

        Ok(reference)
    }

    async fn retrieve_tag(&self, tag_id: u64) -> Result<UploadTag, GatewayError> {
        let mut state = self.lock();
        state.tag_polls += 1;

        if let Some(message) = state.tag_error.clone() {
            return Err(GatewayError::Server {
                status: 503,
                message,
            });
        }

        let snapshot = if state.tag_script.is_empty() {
            None
        } else {
            let index = state.script_cursor.min(state.tag_script.len() - 1);
            state.script_cursor += 1;
            Some(state.tag_script[index])
        };

        let tag = state
            .tags
            .get_mut(&tag_id)
            .ok_or_else(|| GatewayError::NotFound(format!("tag {}", tag_id)))?;
        match snapshot {
            Some((seen, synced)) => {
                tag.seen = seen;
                tag.synced = synced;
            }
            // Unscripted uploads replicate instantly
            None => tag.synced = tag.split.saturating_sub(tag.seen),
        }

        Ok(*tag)
    }

    async fn create_pointer_manifest(
        &self,
        _allocation_id: &str,
        topic: &PointerTopic,
        owner: &str,
    ) -> Result<PointerManifest, GatewayError> {
        let manifest =
            PointerManifest::derive(owner, topic).map_err(GatewayError::InvalidResponse)?;
        let mut state = self.lock();
        if !state.manifests.contains(&manifest) {
            state.manifests.push(manifest.clone());
        }
        Ok(manifest)
    }

    async fn write_pointer_entry(
        &self,
        _allocation_id: &str,
        identity: &SigningIdentity,
        topic: &PointerTopic,
        reference: &ContentReference,
    ) -> Result<PointerEntry, GatewayError> {
        let mut state = self.lock();
        if let Some(message) = state.pointer_error.clone() {
            return Err(GatewayError::Signature(message));
        }

        let feed = state
            .feeds
            .entry((identity.address().to_string(), *topic))
            .or_default();
        let index = feed.len() as u64;
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;

        let mut entry = sign_entry(identity, topic, index, timestamp, reference);
        if !verify_entry(&identity.verifying_key(), topic, &entry) {
            return Err(GatewayError::Signature("entry signature does not verify".into()));
        }
        entry.entry_reference = Some(entry.identifier.clone());
        feed.push(entry.clone());

        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn site() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>hello</h1>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_upload_reference_is_content_derived() {
        let gateway = MemoryGateway::new();
        let dir = site();
        let options = ManifestOptions::default();

        let tag_a = gateway.create_upload_tag().await.unwrap();
        let a = gateway
            .upload_directory("memory-batch", dir.path(), tag_a.id, &options)
            .await
            .unwrap();
        let tag_b = gateway.create_upload_tag().await.unwrap();
        let b = gateway
            .upload_directory("memory-batch", dir.path(), tag_b.id, &options)
            .await
            .unwrap();
        assert_eq!(a, b);

        std::fs::write(dir.path().join("app.js"), "console.log(2)").unwrap();
        let tag_c = gateway.create_upload_tag().await.unwrap();
        let c = gateway
            .upload_directory("memory-batch", dir.path(), tag_c.id, &options)
            .await
            .unwrap();
        assert_ne!(a, c);

        assert_eq!(gateway.uploads().len(), 3);
        assert_eq!(gateway.uploads()[0].files, vec!["app.js", "index.html"]);
    }

    #[tokio::test]
    async fn test_encrypted_upload_has_long_reference() {
        let gateway = MemoryGateway::new();
        let dir = site();
        let options = ManifestOptions {
            encrypt: true,
            ..Default::default()
        };

        let tag = gateway.create_upload_tag().await.unwrap();
        let reference = gateway
            .upload_directory("memory-batch", dir.path(), tag.id, &options)
            .await
            .unwrap();
        assert_eq!(reference.to_bytes().len(), 64);
    }

    #[tokio::test]
    async fn test_scripted_progress_repeats_last_snapshot() {
        let gateway = MemoryGateway::new().with_split(10);
        let dir = site();
        let tag = gateway.create_upload_tag().await.unwrap();
        gateway
            .upload_directory("memory-batch", dir.path(), tag.id, &ManifestOptions::default())
            .await
            .unwrap();

        gateway.script_tag_progress(vec![(1, 1), (3, 4)]);
        assert_eq!(gateway.retrieve_tag(tag.id).await.unwrap().progress(), 2);
        assert_eq!(gateway.retrieve_tag(tag.id).await.unwrap().progress(), 7);
        assert_eq!(gateway.retrieve_tag(tag.id).await.unwrap().progress(), 7);
        assert_eq!(gateway.tag_polls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_tag_and_allocation() {
        let gateway = MemoryGateway::new();
        assert!(matches!(
            gateway.retrieve_tag(99).await,
            Err(GatewayError::NotFound(_))
        ));

        let dir = site();
        let tag = gateway.create_upload_tag().await.unwrap();
        let result = gateway
            .upload_directory("missing", dir.path(), tag.id, &ManifestOptions::default())
            .await;
        assert!(matches!(result, Err(GatewayError::NotFound(_))));
    }
}
