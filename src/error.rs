//! Error types for feed-publisher
//!
//! Every fatal condition of a publish run maps onto one [`PublishError`]
//! variant. The variant name doubles as the log category and all of them
//! terminate the process with exit status 1.

use std::time::Duration;

use crate::types::ContentReference;

/// Why the replication monitor gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutReason {
    /// No forward progress for `max_stall_trials` consecutive polls
    Stalled,
    /// The optional wall-clock ceiling elapsed
    Deadline,
}

impl std::fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutReason::Stalled => write!(f, "stalled"),
            TimeoutReason::Deadline => write!(f, "deadline exceeded"),
        }
    }
}

/// Main error type for a publish run
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("No usable storage allocation (checked {checked})")]
    ResourceUnavailable { checked: usize },

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("Artifact fetch failed: {0}")]
    ArtifactFetch(String),

    #[error("Upload failed: {0}")]
    UploadFailure(String),

    #[error(
        "Replication timed out ({reason}) for tag {tag}: {progress}/{split} chunks after {polls} polls in {elapsed:?}"
    )]
    ReplicationTimeout {
        tag: u64,
        reason: TimeoutReason,
        progress: u64,
        split: u64,
        polls: u32,
        elapsed: Duration,
    },

    #[error("Pointer publish failed ({reference} is stored but not referenced by the feed): {reason}")]
    PointerPublishFailure {
        reference: ContentReference,
        reason: String,
    },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Workspace error: {0}")]
    Workspace(String),
}

impl PublishError {
    /// Stable category name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ResourceUnavailable { .. } => "resource_unavailable",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::ArtifactFetch(_) => "artifact_fetch",
            Self::UploadFailure(_) => "upload_failure",
            Self::ReplicationTimeout { .. } => "replication_timeout",
            Self::PointerPublishFailure { .. } => "pointer_publish_failure",
            Self::Configuration(_) => "configuration",
            Self::Workspace(_) => "workspace",
        }
    }

    /// Process exit status for this failure.
    ///
    /// There is no partial-success code: content stored without a pointer
    /// update still exits non-zero.
    pub fn exit_code(&self) -> i32 {
        1
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        Self::Workspace(err.to_string())
    }
}

/// Result type alias for publish operations
pub type Result<T> = std::result::Result<T, PublishError>;
