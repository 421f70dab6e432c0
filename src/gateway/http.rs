//! HTTP client for a storage node's API

use async_trait::async_trait;
use reqwest::{header, multipart, Client, StatusCode};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use super::{collect_files, guess_content_type, GatewayError, StorageGateway};
use crate::keystore::SigningIdentity;
use crate::pointer::{entry_payload, sign_entry};
use crate::types::{
    ContentReference, ManifestOptions, PointerEntry, PointerManifest, PointerTopic,
    StorageAllocation, UploadTag, FEED_TYPE,
};

const HEADER_BATCH: &str = "swarm-postage-batch-id";
const HEADER_TAG: &str = "swarm-tag";
const HEADER_COLLECTION: &str = "swarm-collection";
const HEADER_INDEX_DOCUMENT: &str = "swarm-index-document";
const HEADER_ERROR_DOCUMENT: &str = "swarm-error-document";
const HEADER_PIN: &str = "swarm-pin";
const HEADER_ENCRYPT: &str = "swarm-encrypt";
const HEADER_DEFERRED: &str = "swarm-deferred-upload";
const HEADER_REDUNDANCY: &str = "swarm-redundancy-level";
const HEADER_FEED_INDEX_NEXT: &str = "swarm-feed-index-next";

/// Connection settings for [`HttpGateway`]
#[derive(Debug, Clone)]
pub struct HttpGatewayConfig {
    /// Storage node API root, e.g. `http://localhost:1633`
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1633".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

// ==================== Wire types ====================

#[derive(Debug, Deserialize)]
struct StampsResponse {
    #[serde(default)]
    stamps: Vec<StampDto>,
}

#[derive(Debug, Deserialize)]
struct StampDto {
    #[serde(rename = "batchID")]
    batch_id: String,
    #[serde(rename = "batchTTL")]
    batch_ttl: i64,
    usable: bool,
    #[serde(default)]
    depth: Option<u8>,
    #[serde(default)]
    label: Option<String>,
}

impl From<StampDto> for StorageAllocation {
    fn from(dto: StampDto) -> Self {
        StorageAllocation {
            id: dto.batch_id,
            ttl_secs: dto.batch_ttl,
            usable: dto.usable,
            label: dto.label.filter(|l| !l.is_empty()),
            depth: dto.depth,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TagDto {
    uid: u64,
    #[serde(default)]
    split: u64,
    #[serde(default)]
    seen: u64,
    #[serde(default)]
    synced: u64,
}

impl From<TagDto> for UploadTag {
    fn from(dto: TagDto) -> Self {
        UploadTag {
            id: dto.uid,
            split: dto.split,
            seen: dto.seen,
            synced: dto.synced,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ReferenceResponse {
    reference: String,
}

// ==================== Client ====================

/// [`StorageGateway`] over the storage node's HTTP API
pub struct HttpGateway {
    base_url: String,
    client: Client,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn feed_url(&self, owner: &str, topic: &PointerTopic) -> String {
        format!(
            "{}/feeds/{}/{}?type={}",
            self.base_url,
            urlencoding::encode(owner),
            topic.to_hex(),
            FEED_TYPE
        )
    }

    /// Index the next feed entry must use; 0 for a feed with no entries
    async fn next_feed_index(&self, owner: &str, topic: &PointerTopic) -> Result<u64, GatewayError> {
        let response = self.client.get(self.feed_url(owner, topic)).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let next = response
            .headers()
            .get(HEADER_FEED_INDEX_NEXT)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                GatewayError::InvalidResponse(format!("missing {} header", HEADER_FEED_INDEX_NEXT))
            })?;

        u64::from_str_radix(next.trim(), 16).map_err(|e| {
            GatewayError::InvalidResponse(format!("bad feed index '{}': {}", next, e))
        })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, GatewayError> {
        if response.status() == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(what.to_string()));
        }

        if !response.status().is_success() {
            return Err(server_error(response).await);
        }

        let body = response.json().await?;
        Ok(body)
    }
}

async fn server_error(response: reqwest::Response) -> GatewayError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    GatewayError::Server { status, message }
}

fn parse_reference(raw: &str) -> Result<ContentReference, GatewayError> {
    ContentReference::parse(raw).map_err(GatewayError::InvalidResponse)
}

#[async_trait]
impl StorageGateway for HttpGateway {
    async fn list_allocations(&self) -> Result<Vec<StorageAllocation>, GatewayError> {
        let url = format!("{}/stamps", self.base_url);
        let response = self.client.get(&url).send().await?;
        let body: StampsResponse = self.handle_response(response, "stamps").await?;

        Ok(body.stamps.into_iter().map(StorageAllocation::from).collect())
    }

    async fn create_upload_tag(&self) -> Result<UploadTag, GatewayError> {
        let url = format!("{}/tags", self.base_url);
        let response = self
            .client
            .post(&url)
            .header(header::CONTENT_TYPE, "application/json")
            .body("{}")
            .send()
            .await?;
        let tag: TagDto = self.handle_response(response, "tags").await?;

        Ok(tag.into())
    }

    async fn upload_directory(
        &self,
        allocation_id: &str,
        path: &Path,
        tag_id: u64,
        options: &ManifestOptions,
    ) -> Result<ContentReference, GatewayError> {
        let files = collect_files(path)?;
        let mut total_bytes = 0usize;
        let mut form = multipart::Form::new();

        for file in &files {
            let data = tokio::fs::read(&file.path).await?;
            total_bytes += data.len();
            let part = multipart::Part::bytes(data)
                .file_name(file.name.clone())
                .mime_str(guess_content_type(&file.name))?;
            form = form.part(file.name.clone(), part);
        }

        info!(
            files = files.len(),
            bytes = total_bytes,
            tag = tag_id,
            "Uploading collection from {}",
            path.display()
        );

        let url = format!("{}/bzz", self.base_url);
        let mut request = self
            .client
            .post(&url)
            .header(HEADER_BATCH, allocation_id)
            .header(HEADER_TAG, tag_id.to_string())
            .header(HEADER_COLLECTION, "true")
            .header(HEADER_INDEX_DOCUMENT, &options.index_document)
            .header(HEADER_PIN, options.pin.to_string())
            .header(HEADER_ENCRYPT, options.encrypt.to_string())
            .header(HEADER_DEFERRED, options.deferred.to_string());
        if let Some(ref error_document) = options.error_document {
            request = request.header(HEADER_ERROR_DOCUMENT, error_document);
        }
        if let Some(level) = options.redundancy {
            request = request.header(HEADER_REDUNDANCY, level.level().to_string());
        }

        let response = request.multipart(form).send().await?;
        let body: ReferenceResponse = self.handle_response(response, "bzz").await?;

        parse_reference(&body.reference)
    }

    async fn retrieve_tag(&self, tag_id: u64) -> Result<UploadTag, GatewayError> {
        let url = format!("{}/tags/{}", self.base_url, tag_id);
        let response = self.client.get(&url).send().await?;
        let tag: TagDto = self
            .handle_response(response, &format!("tag {}", tag_id))
            .await?;

        debug!(tag = tag.uid, split = tag.split, seen = tag.seen, synced = tag.synced, "Tag snapshot");
        Ok(tag.into())
    }

    async fn create_pointer_manifest(
        &self,
        allocation_id: &str,
        topic: &PointerTopic,
        owner: &str,
    ) -> Result<PointerManifest, GatewayError> {
        let response = self
            .client
            .post(self.feed_url(owner, topic))
            .header(HEADER_BATCH, allocation_id)
            .send()
            .await?;
        let body: ReferenceResponse = self.handle_response(response, "feed manifest").await?;
        let address = parse_reference(&body.reference)?;

        Ok(PointerManifest {
            address: address.to_string(),
            owner: owner.trim_start_matches("0x").to_lowercase(),
            topic: topic.to_hex(),
        })
    }

    async fn write_pointer_entry(
        &self,
        allocation_id: &str,
        identity: &SigningIdentity,
        topic: &PointerTopic,
        reference: &ContentReference,
    ) -> Result<PointerEntry, GatewayError> {
        let index = self.next_feed_index(identity.address(), topic).await?;
        let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
        let mut entry = sign_entry(identity, topic, index, timestamp, reference);
        let payload = entry_payload(timestamp, reference);

        debug!(index, identifier = %entry.identifier, "Writing feed entry");

        let url = format!(
            "{}/soc/{}/{}?sig={}",
            self.base_url,
            urlencoding::encode(identity.address()),
            entry.identifier,
            entry.signature
        );
        let response = self
            .client
            .post(&url)
            .header(HEADER_BATCH, allocation_id)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload)
            .send()
            .await?;
        let body: ReferenceResponse = self.handle_response(response, "feed entry").await?;

        entry.entry_reference = Some(body.reference);
        Ok(entry)
    }
}
