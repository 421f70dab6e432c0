//! Replication monitor
//!
//! Confirms that every chunk of an upload has propagated through the
//! network before the feed is moved. The timeout is stall-based: the
//! monitor gives up only after `max_stall_trials` consecutive polls with no
//! forward progress, and any increase resets that budget in full.
//!
//! # State machine
//!
//! ```text
//!            progress >= split
//!  Polling ─────────────────────▶ Synced
//!     │ ▲
//!     │ └── otherwise (sleep poll_interval)
//!     │
//!     └──── trials_without_progress >= max_stall_trials ──▶ TimedOut
//! ```
//!
//! The completion check runs before the stall check, so a poll that both
//! reaches `split` and exhausts the stall budget counts as synced.
//! `Synced` and `TimedOut` are terminal.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{PublishError, Result, TimeoutReason};
use crate::gateway::StorageGateway;
use crate::types::UploadTag;

/// Polls with no progress before giving up
pub const DEFAULT_MAX_STALL_TRIALS: u32 = 15;

/// Delay between tag polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Monitor settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub max_stall_trials: u32,
    /// Optional wall-clock ceiling. `None` keeps waiting as long as progress
    /// keeps arriving.
    pub max_wait: Option<Duration>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_stall_trials: DEFAULT_MAX_STALL_TRIALS,
            max_wait: None,
        }
    }
}

/// Monitor state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Polling,
    Synced,
    TimedOut,
}

impl MonitorState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MonitorState::Polling)
    }
}

// =============================================================================
// Stall tracker
// =============================================================================

/// Pure transition logic of the monitor, one call per tag snapshot
#[derive(Debug, Clone)]
pub struct StallTracker {
    max_stall_trials: u32,
    trials_without_progress: u32,
    last_progress: u64,
    polls: u32,
    state: MonitorState,
}

impl StallTracker {
    pub fn new(max_stall_trials: u32) -> Self {
        Self {
            max_stall_trials,
            trials_without_progress: 0,
            last_progress: 0,
            polls: 0,
            state: MonitorState::Polling,
        }
    }

    /// Apply one snapshot and return the resulting state
    pub fn observe(&mut self, tag: &UploadTag) -> MonitorState {
        if self.state.is_terminal() {
            return self.state;
        }
        self.polls += 1;

        let progress = tag.progress();
        if progress > self.last_progress {
            self.trials_without_progress = 0;
            self.last_progress = progress;
        } else {
            self.trials_without_progress += 1;
        }

        self.state = if progress >= tag.split {
            MonitorState::Synced
        } else if self.trials_without_progress >= self.max_stall_trials {
            MonitorState::TimedOut
        } else {
            MonitorState::Polling
        };
        self.state
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }

    pub fn trials_without_progress(&self) -> u32 {
        self.trials_without_progress
    }

    pub fn last_progress(&self) -> u64 {
        self.last_progress
    }
}

// =============================================================================
// Progress observers
// =============================================================================

/// Receives `(current_progress, total)` on every poll
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, current: u64, total: u64);
}

/// Discards progress
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_progress(&self, _current: u64, _total: u64) {}
}

/// Logs progress through `tracing`, at info level whenever the percentage moves
pub struct TracingProgress {
    last_percent: std::sync::atomic::AtomicU64,
}

impl TracingProgress {
    pub fn new() -> Self {
        Self {
            last_percent: std::sync::atomic::AtomicU64::new(u64::MAX),
        }
    }
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for TracingProgress {
    fn on_progress(&self, current: u64, total: u64) {
        use std::sync::atomic::Ordering;

        let percent = if total == 0 {
            100
        } else {
            (current.min(total) * 100) / total
        };

        if self.last_percent.swap(percent, Ordering::Relaxed) != percent {
            info!(current, total, "Replication {}%", percent);
        } else {
            debug!(current, total, "Replication unchanged");
        }
    }
}

// =============================================================================
// Monitor
// =============================================================================

/// Successful replication summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationOutcome {
    pub tag: UploadTag,
    pub polls: u32,
    pub elapsed: Duration,
}

/// Polls an upload tag until it is fully replicated or stalls
pub struct ReplicationMonitor<G: StorageGateway> {
    gateway: Arc<G>,
    config: MonitorConfig,
    observer: Arc<dyn ProgressObserver>,
}

impl<G: StorageGateway> ReplicationMonitor<G> {
    pub fn new(gateway: Arc<G>, config: MonitorConfig, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            gateway,
            config,
            observer,
        }
    }

    /// Wait until `tag_id` reports `seen + synced >= split`.
    ///
    /// Tag retrieval errors are not retried.
    pub async fn wait_for_sync(&self, tag_id: u64) -> Result<ReplicationOutcome> {
        let started = Instant::now();
        let mut tracker = StallTracker::new(self.config.max_stall_trials);

        info!(
            tag = tag_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_stall_trials = self.config.max_stall_trials,
            "Waiting for replication"
        );

        loop {
            let tag = self.gateway.retrieve_tag(tag_id).await.map_err(|e| {
                PublishError::UploadFailure(format!("tag {} retrieval failed: {}", tag_id, e))
            })?;

            let state = tracker.observe(&tag);
            self.observer.on_progress(tag.progress(), tag.split);
            debug!(
                tag = tag_id,
                progress = tag.progress(),
                split = tag.split,
                stalled = tracker.trials_without_progress(),
                "Replication poll"
            );

            match state {
                MonitorState::Synced => {
                    if tag.split == 0 {
                        warn!(tag = tag_id, "Upload reported zero chunks, treating as synced");
                    }
                    let outcome = ReplicationOutcome {
                        tag,
                        polls: tracker.polls(),
                        elapsed: started.elapsed(),
                    };
                    info!(
                        tag = tag_id,
                        polls = outcome.polls,
                        elapsed_ms = outcome.elapsed.as_millis() as u64,
                        "Replication complete"
                    );
                    return Ok(outcome);
                }
                MonitorState::TimedOut => {
                    return Err(self.timeout(&tag, &tracker, TimeoutReason::Stalled, started));
                }
                MonitorState::Polling => {}
            }

            if let Some(max_wait) = self.config.max_wait {
                if started.elapsed() + self.config.poll_interval > max_wait {
                    return Err(self.timeout(&tag, &tracker, TimeoutReason::Deadline, started));
                }
            }

            tokio::time::sleep(self.config.poll_interval).await;
        }
    }

    fn timeout(
        &self,
        tag: &UploadTag,
        tracker: &StallTracker,
        reason: TimeoutReason,
        started: Instant,
    ) -> PublishError {
        PublishError::ReplicationTimeout {
            tag: tag.id,
            reason,
            progress: tracker.last_progress(),
            split: tag.split,
            polls: tracker.polls(),
            elapsed: started.elapsed(),
        }
    }
}
