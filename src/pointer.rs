//! Sequence feed publishing
//!
//! A feed is a stable address (the manifest) whose latest entry points at
//! the most recent upload. Entries are single-owner records:
//!
//! ```text
//! identifier = sha256(topic || index_be_u64)
//! payload    = timestamp_be_u64 || reference
//! digest     = sha256(identifier || sha256(payload))
//! signature  = ed25519(owner_key, digest)
//! ```
//!
//! Publishing writes exactly one entry per call and never retries. When it
//! fails, the content is already stored on the network but the feed still
//! points at the previous upload; the error carries the stored reference so
//! the operator can see the gap.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{PublishError, Result};
use crate::gateway::StorageGateway;
use crate::keystore::SigningIdentity;
use crate::types::{ContentReference, PointerEntry, PointerManifest, PointerTopic};

// =============================================================================
// Entry construction
// =============================================================================

/// Identifier an entry is stored under
pub fn entry_identifier(topic: &PointerTopic, index: u64) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(topic.as_bytes());
    hasher.update(index.to_be_bytes());
    hasher.finalize().into()
}

/// Body of an entry: signing time followed by the raw reference
pub fn entry_payload(timestamp: u64, reference: &ContentReference) -> Vec<u8> {
    let reference = reference.to_bytes();
    let mut payload = Vec::with_capacity(8 + reference.len());
    payload.extend_from_slice(&timestamp.to_be_bytes());
    payload.extend_from_slice(&reference);
    payload
}

/// Digest the owner signs
pub fn entry_digest(identifier: &[u8; 32], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(identifier);
    hasher.update(Sha256::digest(payload));
    hasher.finalize().into()
}

/// Build and sign the entry for `index`
pub fn sign_entry(
    identity: &SigningIdentity,
    topic: &PointerTopic,
    index: u64,
    timestamp: u64,
    reference: &ContentReference,
) -> PointerEntry {
    let identifier = entry_identifier(topic, index);
    let payload = entry_payload(timestamp, reference);
    let signature = identity.sign(&entry_digest(&identifier, &payload));

    PointerEntry {
        index,
        identifier: hex::encode(identifier),
        reference: reference.clone(),
        timestamp,
        signature: hex::encode(signature.to_bytes()),
        entry_reference: None,
    }
}

/// Check an entry against the owner's public key and the feed topic
pub fn verify_entry(
    verifying_key: &VerifyingKey,
    topic: &PointerTopic,
    entry: &PointerEntry,
) -> bool {
    let identifier = entry_identifier(topic, entry.index);
    if hex::encode(identifier) != entry.identifier {
        return false;
    }

    let Ok(bytes) = hex::decode(&entry.signature) else {
        return false;
    };
    let Ok(signature) = Signature::from_slice(&bytes) else {
        return false;
    };

    let payload = entry_payload(entry.timestamp, &entry.reference);
    verifying_key
        .verify(&entry_digest(&identifier, &payload), &signature)
        .is_ok()
}

// =============================================================================
// Publisher
// =============================================================================

/// Result of a successful feed update
#[derive(Debug, Clone)]
pub struct PublishedPointer {
    pub topic: PointerTopic,
    pub manifest: PointerManifest,
    pub entry: PointerEntry,
}

/// Appends entries to a sequence feed through a [`StorageGateway`]
pub struct PointerPublisher<G: StorageGateway> {
    gateway: Arc<G>,
}

impl<G: StorageGateway> PointerPublisher<G> {
    pub fn new(gateway: Arc<G>) -> Self {
        Self { gateway }
    }

    /// Point the feed named `topic_name` at `reference`
    pub async fn publish(
        &self,
        allocation_id: &str,
        identity: &SigningIdentity,
        topic_name: &str,
        reference: &ContentReference,
    ) -> Result<PublishedPointer> {
        let topic = PointerTopic::from_name(topic_name);
        info!(
            topic = %topic,
            owner = identity.address(),
            "Publishing feed entry for topic '{}'", topic_name
        );

        let manifest = self
            .gateway
            .create_pointer_manifest(allocation_id, &topic, identity.address())
            .await
            .map_err(|e| self.failure(reference, format!("manifest creation: {e}")))?;

        let entry = self
            .gateway
            .write_pointer_entry(allocation_id, identity, &topic, reference)
            .await
            .map_err(|e| self.failure(reference, format!("entry write: {e}")))?;

        info!(
            manifest = %manifest.address,
            index = entry.index,
            reference = %entry.reference,
            "Feed updated"
        );

        Ok(PublishedPointer {
            topic,
            manifest,
            entry,
        })
    }

    fn failure(&self, reference: &ContentReference, reason: String) -> PublishError {
        warn!(
            reference = %reference,
            "Content is stored but the feed was not updated: {}", reason
        );
        PublishError::PointerPublishFailure {
            reference: reference.clone(),
            reason,
        }
    }
}
