//! Publish pipeline
//!
//! One run: fetch the newest build artifact, extract it into the workspace,
//! pick a storage allocation, upload, wait for replication, then point the
//! feed at the new content. Any failure aborts the run; nothing is retried
//! and nothing already stored is rolled back.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::artifact::{select_newest, Artifact, ArtifactSource, Workspace};
use crate::error::{PublishError, Result};
use crate::gateway::StorageGateway;
use crate::keystore::SigningIdentity;
use crate::monitor::{MonitorConfig, ProgressObserver, ReplicationMonitor};
use crate::pointer::PointerPublisher;
use crate::selector::select_allocation;
use crate::types::{ContentReference, ManifestOptions};

/// What a run publishes and where it stages it
#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Exact artifact name to look up
    pub artifact_name: String,
    /// Directory the artifact is extracted into; cleared at the start of a run
    pub build_dir: std::path::PathBuf,
    /// Feed topic name, hashed into the 32-byte topic
    pub topic: String,
    pub manifest: ManifestOptions,
    pub monitor: MonitorConfig,
}

/// Summary of a successful run, printed as JSON by the binary
#[derive(Debug, Clone, Serialize)]
pub struct PublishReport {
    pub artifact_id: u64,
    pub artifact_name: String,
    pub artifact_created_at: DateTime<Utc>,
    pub files: usize,
    pub allocation_id: String,
    pub tag_id: u64,
    pub chunks: u64,
    pub reference: ContentReference,
    pub owner: String,
    pub topic: String,
    pub manifest: String,
    pub feed_index: u64,
    pub replication_polls: u32,
    pub replication_ms: u64,
    pub elapsed_ms: u64,
}

/// Sequences the pipeline over injected collaborators
pub struct Orchestrator<S: ArtifactSource, G: StorageGateway> {
    artifacts: Arc<S>,
    gateway: Arc<G>,
    observer: Arc<dyn ProgressObserver>,
    settings: PublishSettings,
}

impl<S: ArtifactSource, G: StorageGateway> Orchestrator<S, G> {
    pub fn new(
        artifacts: Arc<S>,
        gateway: Arc<G>,
        observer: Arc<dyn ProgressObserver>,
        settings: PublishSettings,
    ) -> Self {
        Self {
            artifacts,
            gateway,
            observer,
            settings,
        }
    }

    /// Run the full pipeline, signing the feed entry with `identity`
    pub async fn run(&self, identity: &SigningIdentity) -> Result<PublishReport> {
        let started = Instant::now();
        let workspace = Workspace::new(&self.settings.build_dir);

        workspace.prepare()?;

        let artifact = self.fetch_artifact().await?;
        let files = self.extract_artifact(&workspace, &artifact).await?;
        workspace.verify_entry_point(&self.settings.manifest.index_document)?;

        let allocations = self
            .gateway
            .list_allocations()
            .await
            .map_err(|e| PublishError::UploadFailure(format!("listing allocations: {}", e)))?;
        let allocation = select_allocation(&allocations)?;
        info!(
            allocation = %allocation.id,
            ttl_secs = allocation.ttl_secs,
            label = allocation.label.as_deref().unwrap_or(""),
            "Selected storage allocation"
        );

        let tag = self
            .gateway
            .create_upload_tag()
            .await
            .map_err(|e| PublishError::UploadFailure(format!("creating upload tag: {}", e)))?;
        debug!(tag = tag.id, "Created upload tag");

        let reference = self
            .gateway
            .upload_directory(&allocation.id, workspace.root(), tag.id, &self.settings.manifest)
            .await
            .map_err(|e| PublishError::UploadFailure(e.to_string()))?;
        info!(reference = %reference, tag = tag.id, "Upload accepted");

        let monitor = ReplicationMonitor::new(
            self.gateway.clone(),
            self.settings.monitor.clone(),
            self.observer.clone(),
        );
        let replication = monitor.wait_for_sync(tag.id).await?;

        let publisher = PointerPublisher::new(self.gateway.clone());
        let pointer = publisher
            .publish(&allocation.id, identity, &self.settings.topic, &reference)
            .await?;

        let report = PublishReport {
            artifact_id: artifact.id,
            artifact_name: artifact.name,
            artifact_created_at: artifact.created_at,
            files,
            allocation_id: allocation.id.clone(),
            tag_id: tag.id,
            chunks: replication.tag.split,
            reference,
            owner: identity.address().to_string(),
            topic: pointer.topic.to_hex(),
            manifest: pointer.manifest.address,
            feed_index: pointer.entry.index,
            replication_polls: replication.polls,
            replication_ms: duration_ms(replication.elapsed),
            elapsed_ms: duration_ms(started.elapsed()),
        };

        info!(
            reference = %report.reference,
            manifest = %report.manifest,
            index = report.feed_index,
            elapsed_ms = report.elapsed_ms,
            "Publish complete"
        );
        Ok(report)
    }

    async fn fetch_artifact(&self) -> Result<Artifact> {
        let name = &self.settings.artifact_name;
        let artifacts = self
            .artifacts
            .list_artifacts(name)
            .await
            .map_err(|e| PublishError::ArtifactFetch(format!("listing artifacts: {}", e)))?;

        let artifact = select_newest(&artifacts, name).cloned().ok_or_else(|| {
            PublishError::PreconditionFailed(format!(
                "no unexpired artifact named '{}' ({} listed)",
                name,
                artifacts.len()
            ))
        })?;

        info!(
            artifact = artifact.id,
            created_at = %artifact.created_at,
            "Found artifact '{}'", artifact.name
        );
        Ok(artifact)
    }

    async fn extract_artifact(&self, workspace: &Workspace, artifact: &Artifact) -> Result<usize> {
        let archive = self
            .artifacts
            .download(artifact)
            .await
            .map_err(|e| PublishError::ArtifactFetch(format!("downloading artifact: {}", e)))?;

        workspace
            .extract_zip(&archive)
            .map_err(|e| PublishError::ArtifactFetch(format!("extracting artifact: {}", e)))
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}
