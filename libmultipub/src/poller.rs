//! Status polling for targets the platform is still processing
//!
//! A polled target keeps its job claim for the whole wait, so no worker can pick
//! it up again until the poller resolves it. Each entry is checked at its own
//! interval and resolved as `Timeout` once its deadline passes.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::error::ErrorKind;
use crate::platforms::{PollStatus, PublishContext, Uploader};
use crate::queue::JobClaim;

/// One target waiting on platform-side processing
#[derive(Debug)]
pub struct PollEntry {
    pub claim: JobClaim,
    pub poll_token: String,
    /// Upload session holding the poll token, for chunked uploads
    pub session_id: Option<String>,
    pub ctx: PublishContext,
    pub next_check_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub interval: chrono::Duration,
    pub cancel: Arc<AtomicBool>,
    /// A resolution reached earlier that could not be recorded yet
    pub pending: Option<PollResolution>,
}

impl PollEntry {
    pub fn target_id(&self) -> &str {
        self.claim.target_id()
    }

    pub fn record_id(&self) -> &str {
        &self.claim.job().record_id
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollResolution {
    Released {
        work_id: String,
        url: Option<String>,
    },
    Failed {
        kind: ErrorKind,
        message: String,
    },
}

#[derive(Debug)]
pub enum PollStep {
    /// Still processing; reschedule the entry
    Continue(PollEntry),
    Finished {
        entry: PollEntry,
        resolution: PollResolution,
    },
}

#[derive(Default)]
pub struct StatusPoller {
    entries: Mutex<Vec<PollEntry>>,
}

impl StatusPoller {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<PollEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn register(&self, entry: PollEntry) {
        debug!(
            "Polling {} every {}s until {}",
            entry.target_id(),
            entry.interval.num_seconds(),
            entry.deadline
        );
        self.entries().push(entry);
    }

    /// Remove and return every entry that is due or has been cancelled
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<PollEntry> {
        let mut entries = self.entries();
        let (due, waiting): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|e| e.next_check_at <= now || e.is_cancelled());
        *entries = waiting;
        due
    }

    /// Put an entry back, due after its interval but never past its deadline
    pub fn reschedule(&self, mut entry: PollEntry, now: DateTime<Utc>) {
        entry.next_check_at = (now + entry.interval).min(entry.deadline);
        self.entries().push(entry);
    }

    pub fn contains(&self, target_id: &str) -> bool {
        self.entries().iter().any(|e| e.target_id() == target_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}

/// Check one entry against the platform
///
/// Cancellation wins over a pending resolution, then the deadline, then the
/// platform's answer. Retryable poll errors keep the entry alive until the
/// deadline.
pub async fn check(
    mut entry: PollEntry,
    uploader: &dyn Uploader,
    now: DateTime<Utc>,
) -> PollStep {
    if entry.is_cancelled() {
        return PollStep::Finished {
            entry,
            resolution: PollResolution::Failed {
                kind: ErrorKind::Cancelled,
                message: "Cancelled while awaiting processing".to_string(),
            },
        };
    }

    if let Some(resolution) = entry.pending.take() {
        return PollStep::Finished { entry, resolution };
    }

    if now >= entry.deadline {
        let message = format!(
            "Platform processing did not finish by {}",
            entry.deadline.to_rfc3339()
        );
        return PollStep::Finished {
            entry,
            resolution: PollResolution::Failed {
                kind: ErrorKind::Timeout,
                message,
            },
        };
    }

    match uploader.poll_status(&entry.ctx, &entry.poll_token).await {
        Ok(PollStatus::Processing) => PollStep::Continue(entry),
        Ok(PollStatus::Succeeded { work_id, url }) => PollStep::Finished {
            entry,
            resolution: PollResolution::Released { work_id, url },
        },
        Ok(PollStatus::Failed { reason }) => PollStep::Finished {
            entry,
            resolution: PollResolution::Failed {
                kind: ErrorKind::Permanent,
                message: reason,
            },
        },
        Err(e) if e.is_retryable() => {
            warn!("Status poll for {} failed, will retry: {}", entry.target_id(), e);
            PollStep::Continue(entry)
        }
        Err(e) => PollStep::Finished {
            entry,
            resolution: PollResolution::Failed {
                kind: e.kind(),
                message: e.to_string(),
            },
        },
    }
}
