//! Domain types shared by the pipeline stages

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// Storage allocations
// =============================================================================

/// A prepaid, time-limited storage grant (postage batch)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageAllocation {
    /// Allocation identifier, as the storage node names it
    pub id: String,

    /// Remaining time-to-live in seconds. Zero or negative means expired.
    pub ttl_secs: i64,

    /// Whether the node reports the allocation as usable for uploads
    pub usable: bool,

    /// Optional human label, logged only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Batch depth, logged only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u8>,
}

impl StorageAllocation {
    pub fn new(id: impl Into<String>, ttl_secs: i64, usable: bool) -> Self {
        Self {
            id: id.into(),
            ttl_secs,
            usable,
            label: None,
            depth: None,
        }
    }

    /// An allocation can pay for an upload iff it has time left and is usable
    pub fn is_eligible(&self) -> bool {
        self.ttl_secs > 0 && self.usable
    }
}

// =============================================================================
// Upload tags
// =============================================================================

/// Server-side progress tracker for one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadTag {
    pub id: u64,
    /// Total chunks the upload was split into
    pub split: u64,
    /// Chunks already present on the network
    pub seen: u64,
    /// Chunks pushed and acknowledged
    pub synced: u64,
}

impl UploadTag {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            split: 0,
            seen: 0,
            synced: 0,
        }
    }

    /// Replication progress as the network counts it
    pub fn progress(&self) -> u64 {
        self.seen.saturating_add(self.synced)
    }

    pub fn is_complete(&self) -> bool {
        self.progress() >= self.split
    }
}

// =============================================================================
// Content references
// =============================================================================

/// Content-derived address of an upload.
///
/// 32 bytes for plain uploads, 64 bytes when the upload is encrypted.
/// Stored lowercase hex; constructed only through [`ContentReference::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentReference(String);

impl ContentReference {
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim().trim_start_matches("0x").to_lowercase();
        if value.len() != 64 && value.len() != 128 {
            return Err(format!(
                "reference must be 32 or 64 bytes of hex, got {} characters",
                value.len()
            ));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("reference is not hex".to_string());
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // Validated as hex on construction
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl TryFrom<String> for ContentReference {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentReference> for String {
    fn from(reference: ContentReference) -> Self {
        reference.0
    }
}

impl std::fmt::Display for ContentReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Pointer (feed) types
// =============================================================================

/// Feed topic: SHA-256 of the configured topic name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PointerTopic([u8; 32]);

impl PointerTopic {
    pub fn from_name(name: &str) -> Self {
        Self(Sha256::digest(name.as_bytes()).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for PointerTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Only sequence-indexed feeds are published
pub const FEED_TYPE: &str = "sequence";

/// Stable address under which the latest feed entry resolves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerManifest {
    pub address: String,
    pub owner: String,
    pub topic: String,
}

impl PointerManifest {
    /// Derive the manifest address locally.
    ///
    /// Depends only on `(owner, topic)`; the number of entries later written
    /// to the feed does not change it. The owner is hashed as raw address
    /// bytes, so it must be hex (an optional `0x` prefix is accepted).
    pub fn derive(owner: &str, topic: &PointerTopic) -> Result<Self, String> {
        let owner = owner.trim_start_matches("0x").to_lowercase();
        let owner_bytes =
            hex::decode(&owner).map_err(|e| format!("owner address '{}' is not hex: {}", owner, e))?;

        let mut hasher = Sha256::new();
        hasher.update(FEED_TYPE.as_bytes());
        hasher.update(&owner_bytes);
        hasher.update(topic.as_bytes());

        Ok(Self {
            address: hex::encode(hasher.finalize()),
            owner,
            topic: topic.to_hex(),
        })
    }
}

/// One signed update of a sequence feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerEntry {
    /// Sequence index, strictly increasing per feed
    pub index: u64,
    /// Hex identifier the entry is stored under
    pub identifier: String,
    /// Content the entry points at
    pub reference: ContentReference,
    /// Unix seconds when the entry was signed
    pub timestamp: u64,
    /// Hex Ed25519 signature over the entry digest
    pub signature: String,
    /// Address of the stored entry, when the network reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_reference: Option<String>,
}

// =============================================================================
// Upload options
// =============================================================================

/// Erasure-coding level requested for an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyLevel {
    Medium,
    Strong,
    Insane,
    Paranoid,
}

impl RedundancyLevel {
    /// Numeric level sent to the storage node
    pub fn level(&self) -> u8 {
        match self {
            RedundancyLevel::Medium => 1,
            RedundancyLevel::Strong => 2,
            RedundancyLevel::Insane => 3,
            RedundancyLevel::Paranoid => 4,
        }
    }
}

impl std::str::FromStr for RedundancyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "medium" | "1" => Ok(RedundancyLevel::Medium),
            "strong" | "2" => Ok(RedundancyLevel::Strong),
            "insane" | "3" => Ok(RedundancyLevel::Insane),
            "paranoid" | "4" => Ok(RedundancyLevel::Paranoid),
            other => Err(format!("unknown redundancy level: {}", other)),
        }
    }
}

/// Options applied to a directory (collection) upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestOptions {
    /// Document served for the collection root
    pub index_document: String,
    /// Document served when a path is missing
    pub error_document: Option<String>,
    /// Pin the content on the uploading node
    pub pin: bool,
    /// Encrypt chunks at rest
    pub encrypt: bool,
    /// Return as soon as the node has the data instead of after push-sync
    pub deferred: bool,
    /// Erasure coding; `None` leaves the node default
    pub redundancy: Option<RedundancyLevel>,
}

impl Default for ManifestOptions {
    fn default() -> Self {
        Self {
            index_document: "index.html".to_string(),
            error_document: None,
            pin: false,
            encrypt: false,
            deferred: true,
            redundancy: None,
        }
    }
}
