//! Publish engine
//!
//! `PublishEngine` is the entry point of the orchestration core. It owns the job
//! queue, the worker pool, the status poller and the posting budget, and exposes
//! the submission and control operations callers use.
//!
//! ```no_run
//! use std::sync::Arc;
//! use libmultipub::platforms::mock::{InMemoryMediaSource, MockUploader, StaticCredentials};
//! use libmultipub::platforms::UploaderRegistry;
//! use libmultipub::service::PublishEngine;
//! use libmultipub::types::{Account, ContentItem, MediaRef, PlatformKind};
//! use libmultipub::Config;
//!
//! # async fn example() -> libmultipub::Result<()> {
//! let registry = UploaderRegistry::new().with(Arc::new(MockUploader::new(PlatformKind::Tiktok)));
//! let engine = PublishEngine::builder(
//!     Config::default_config(),
//!     registry,
//!     Arc::new(StaticCredentials::allow_all()),
//!     Arc::new(InMemoryMediaSource::new()),
//! )
//! .build()?;
//!
//! let content = ContentItem::new()
//!     .with_description("Launch day")
//!     .with_media(MediaRef::video("launch.mp4", 8_000_000, 1080, 1920, 42.0));
//! let outcome = engine
//!     .submit_publish(content, &[Account::new("acct-1", PlatformKind::Tiktok)], None, None)
//!     .await?;
//!
//! engine.tick_and_wait().await;
//! let status = engine.get_record_status(&outcome.record.record_id).await?;
//! println!("{}", status.aggregate_state);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::events::{Event, EventBus, EventReceiver};
use crate::backoff::RetryPolicy;
use crate::clock::{Clock, SystemClock};
use crate::db::Database;
use crate::error::{ErrorKind, MultipubError, Result};
use crate::fanout::{fanout, target_id_for, AccountRejection, AccountWarnings};
use crate::platforms::{AccountCredentialProvider, MediaSource, UploaderRegistry};
use crate::poller::{PollEntry, StatusPoller};
use crate::queue::{EnqueueOutcome, JobQueue, RemoveOutcome};
use crate::rate_limiter::RateLimiter;
use crate::store::{MemoryStore, PublishStore};
use crate::types::{
    Account, AggregateState, AttemptLogEntry, AttemptOutcome, ContentItem, PlatformKind,
    PublishRecord, PublishTarget, TargetId, TargetState,
};
use crate::validation::ConstraintTable;
use crate::Config;

/// Rate windows older than this are pruned on every tick
const RATE_WINDOW_RETENTION_SECS: i64 = 2 * 3600;

/// Result of a submission
#[derive(Debug, Clone)]
pub struct SubmitOutcome {
    pub record: PublishRecord,
    /// Targets created and queued by this call
    pub queued: Vec<TargetId>,
    /// Accounts that already had a target in the record
    pub skipped: Vec<String>,
    pub rejected: Vec<AccountRejection>,
    pub warnings: Vec<AccountWarnings>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetStatus {
    pub target_id: TargetId,
    pub account_id: String,
    pub platform: PlatformKind,
    pub state: TargetState,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub external_work_id: Option<String>,
    pub work_url: Option<String>,
    pub attempt_count: u32,
    pub retry_of: Option<TargetId>,
}

impl From<&PublishTarget> for TargetStatus {
    fn from(target: &PublishTarget) -> Self {
        Self {
            target_id: target.target_id.clone(),
            account_id: target.account_id.clone(),
            platform: target.platform,
            state: target.state,
            error_kind: target.error_kind,
            error_message: target.error_message.clone(),
            external_work_id: target.external_work_id.clone(),
            work_url: target.work_url.clone(),
            attempt_count: target.attempt_count,
            retry_of: target.retry_of.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordStatus {
    pub record_id: String,
    pub aggregate_state: AggregateState,
    pub targets: Vec<TargetStatus>,
}

impl RecordStatus {
    pub fn target(&self, target_id: &str) -> Option<&TargetStatus> {
        self.targets.iter().find(|t| t.target_id == target_id)
    }

    pub fn failed(&self) -> impl Iterator<Item = &TargetStatus> {
        self.targets.iter().filter(|t| t.state == TargetState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was still waiting; the target is now Failed/Cancelled
    Cancelled,
    /// A worker or the poller holds the job; it stops at its next checkpoint
    Signalled,
    AlreadyTerminal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub polling: usize,
    pub failed: usize,
}

pub(crate) struct EngineInner {
    pub(super) config: Config,
    pub(super) constraints: ConstraintTable,
    pub(super) registry: UploaderRegistry,
    pub(super) credentials: Arc<dyn AccountCredentialProvider>,
    pub(super) media: Arc<dyn MediaSource>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) store: Arc<dyn PublishStore>,
    pub(super) queue: Arc<JobQueue>,
    pub(super) poller: StatusPoller,
    pub(super) rate_limiter: RateLimiter,
    pub(super) retry_policy: RetryPolicy,
    pub(super) workers: Arc<Semaphore>,
    pub(super) cancels: Mutex<HashMap<TargetId, Arc<AtomicBool>>>,
    pub(super) events: EventBus,
    pub(super) rng: Mutex<StdRng>,
    /// Serializes record-level mutations (submission and manual retry)
    pub(super) records_lock: tokio::sync::Mutex<()>,
}

/// The publish orchestration engine
///
/// Cheap to clone; clones share the same queue, poller and store.
#[derive(Clone)]
pub struct PublishEngine {
    inner: Arc<EngineInner>,
}

pub struct PublishEngineBuilder {
    config: Config,
    registry: UploaderRegistry,
    credentials: Arc<dyn AccountCredentialProvider>,
    media: Arc<dyn MediaSource>,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn PublishStore>>,
    constraints: Option<ConstraintTable>,
    rng_seed: Option<u64>,
}

impl PublishEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persistence backend; defaults to a fresh [`MemoryStore`]
    pub fn store(mut self, store: Arc<dyn PublishStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Constraint table; defaults to the one named by the config
    pub fn constraints(mut self, constraints: ConstraintTable) -> Self {
        self.constraints = Some(constraints);
        self
    }

    /// Seed for backoff jitter
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    pub fn build(self) -> Result<PublishEngine> {
        self.config.validate()?;
        let constraints = match self.constraints {
            Some(table) => table,
            None => ConstraintTable::from_config(&self.config)?,
        };
        let rng = match self.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let inner = EngineInner {
            constraints,
            registry: self.registry,
            credentials: self.credentials,
            media: self.media,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            store: self
                .store
                .unwrap_or_else(|| Arc::new(MemoryStore::new())),
            queue: Arc::new(JobQueue::new()),
            poller: StatusPoller::new(),
            rate_limiter: RateLimiter::new(self.config.rate_limits()),
            retry_policy: RetryPolicy::from_config(&self.config.engine),
            workers: Arc::new(Semaphore::new(self.config.engine.workers)),
            cancels: Mutex::new(HashMap::new()),
            events: EventBus::new(self.config.engine.event_capacity),
            rng: Mutex::new(rng),
            records_lock: tokio::sync::Mutex::new(()),
            config: self.config,
        };

        Ok(PublishEngine {
            inner: Arc::new(inner),
        })
    }
}

impl PublishEngine {
    pub fn builder(
        config: Config,
        registry: UploaderRegistry,
        credentials: Arc<dyn AccountCredentialProvider>,
        media: Arc<dyn MediaSource>,
    ) -> PublishEngineBuilder {
        PublishEngineBuilder {
            config,
            registry,
            credentials,
            media,
            clock: None,
            store: None,
            constraints: None,
            rng_seed: None,
        }
    }

    /// Engine backed by the SQLite database named in `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the constraint table
    /// cannot be loaded, or the database cannot be opened or migrated.
    pub async fn from_config(
        config: Config,
        registry: UploaderRegistry,
        credentials: Arc<dyn AccountCredentialProvider>,
        media: Arc<dyn MediaSource>,
    ) -> Result<Self> {
        let db = Database::new(&config.database_path()).await?;
        Self::builder(config, registry, credentials, media)
            .store(Arc::new(db))
            .build()
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn constraints(&self) -> &ConstraintTable {
        &self.inner.constraints
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.inner.events.subscribe()
    }

    /// Validate, fan out and queue one content item
    ///
    /// Accounts that fail validation are reported in `rejected` and never queued.
    /// With an `idempotency_key` the key becomes the record id: repeating the call
    /// with the same key and accounts queues nothing new, and new accounts are
    /// appended to the existing record. Reusing a key for different content is an
    /// error.
    pub async fn submit_publish(
        &self,
        content: ContentItem,
        accounts: &[Account],
        scheduled_at: Option<DateTime<Utc>>,
        idempotency_key: Option<&str>,
    ) -> Result<SubmitOutcome> {
        let inner = &self.inner;
        let _guard = inner.records_lock.lock().await;
        let now = inner.clock.now();

        let existing = match idempotency_key {
            Some(key) => match inner.store.get_record(key).await? {
                Some(record) => {
                    if record.content_id != content.id {
                        return Err(MultipubError::InvalidInput(format!(
                            "Idempotency key {} already used for content {}",
                            key, record.content_id
                        )));
                    }
                    let targets = inner.store.list_record_targets(key).await?;
                    Some((record, targets))
                }
                None => None,
            },
            None => None,
        };

        let plan = fanout(
            &inner.constraints,
            &content,
            accounts,
            scheduled_at,
            idempotency_key,
            existing
                .as_ref()
                .map(|(record, targets)| (record, targets.as_slice())),
            now,
        );

        if plan.is_new_record {
            inner.store.insert_record(&plan.record, &content).await?;
        }
        for target in &plan.new_targets {
            inner.store.insert_target(target).await?;
        }
        if !plan.is_new_record && !plan.new_targets.is_empty() {
            inner
                .store
                .update_record_targets(&plan.record.record_id, &plan.record.target_ids)
                .await?;
        }

        for rejection in &plan.rejected {
            warn!(
                "Account {} rejected for {}: {}",
                rejection.account_id, rejection.platform, rejection.error
            );
        }

        let mut queued = Vec::with_capacity(plan.new_targets.len());
        for target in &plan.new_targets {
            if inner.enqueue_target(target, now) {
                queued.push(target.target_id.clone());
            }
        }

        info!(
            "Record {}: {} target(s) queued, {} rejected, {} skipped",
            plan.record.record_id,
            queued.len(),
            plan.rejected.len(),
            plan.skipped.len()
        );
        inner.events.emit(Event::RecordSubmitted {
            record_id: plan.record.record_id.clone(),
            target_ids: queued.clone(),
            rejected_accounts: plan
                .rejected
                .iter()
                .map(|r| r.account_id.clone())
                .collect(),
        });
        inner.publish_aggregate(&plan.record.record_id).await?;

        Ok(SubmitOutcome {
            record: plan.record,
            queued,
            skipped: plan.skipped,
            rejected: plan.rejected,
            warnings: plan.warnings,
        })
    }

    /// Current state of a record's active targets and their aggregate
    pub async fn get_record_status(&self, record_id: &str) -> Result<RecordStatus> {
        let record = self
            .inner
            .store
            .get_record(record_id)
            .await?
            .ok_or_else(|| MultipubError::NotFound(format!("record {}", record_id)))?;
        let targets = self.inner.active_targets(&record).await?;

        Ok(RecordStatus {
            record_id: record.record_id,
            aggregate_state: AggregateState::from_states(targets.iter().map(|t| t.state)),
            targets: targets.iter().map(TargetStatus::from).collect(),
        })
    }

    pub async fn get_target(&self, target_id: &str) -> Result<PublishTarget> {
        self.inner.load_target(target_id).await
    }

    /// Make a waiting timed target eligible now
    ///
    /// Promoting a target that a worker already holds is a no-op.
    pub async fn promote_to_immediate(&self, target_id: &str) -> Result<()> {
        let inner = &self.inner;
        let target = inner.load_target(target_id).await?;
        if target.state != TargetState::Pending {
            return Err(MultipubError::InvalidState(format!(
                "Target {} is {}; only pending targets can be promoted",
                target_id, target.state
            )));
        }

        let now = inner.clock.now();
        if inner.queue.promote(target_id, now) {
            info!("Promoted {} to immediate", target_id);
        } else if !inner.queue.is_claimed(target_id) {
            // Not queued at all, e.g. before recovery ran
            inner.queue.enqueue(
                target_id,
                &target.record_id,
                target.platform,
                None,
                now,
            );
        }
        Ok(())
    }

    pub async fn cancel_target(&self, target_id: &str) -> Result<CancelOutcome> {
        let inner = &self.inner;
        let target = inner.load_target(target_id).await?;
        if target.state.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal);
        }

        match inner.queue.remove(target_id) {
            RemoveOutcome::Removed => {
                // Removing the waiting job makes this call the owner of the target
                let mut target = inner.load_target(target_id).await?;
                let now = inner.clock.now();
                let from = target.fail(ErrorKind::Cancelled, "Cancelled by user", now)?;
                inner
                    .commit(&target, from, Some(AttemptOutcome::Failed))
                    .await?;
                inner.forget_cancel(target_id);
                Ok(CancelOutcome::Cancelled)
            }
            RemoveOutcome::Claimed => {
                inner.cancel_flag(target_id).store(true, Ordering::SeqCst);
                // The claim may have settled meanwhile; a waiting retry still sees the flag
                if !inner.queue.is_tracked(target_id) {
                    inner.forget_cancel(target_id);
                }
                info!("Cancellation requested for in-flight target {}", target_id);
                Ok(CancelOutcome::Signalled)
            }
            RemoveOutcome::Missing => Err(MultipubError::InvalidState(format!(
                "Target {} is {} but not queued",
                target_id, target.state
            ))),
        }
    }

    /// Start a fresh target for the same account after a failure
    ///
    /// The failed target and its attempt log stay as they are; the new target
    /// replaces it in the record's active set.
    pub async fn retry_target(&self, target_id: &str) -> Result<PublishTarget> {
        let inner = &self.inner;
        let _guard = inner.records_lock.lock().await;

        let failed = inner.load_target(target_id).await?;
        if failed.state != TargetState::Failed {
            return Err(MultipubError::InvalidState(format!(
                "Target {} is {}; only failed targets can be retried",
                target_id, failed.state
            )));
        }
        let mut record = inner
            .store
            .get_record(&failed.record_id)
            .await?
            .ok_or_else(|| MultipubError::NotFound(format!("record {}", failed.record_id)))?;
        let Some(slot) = record.target_ids.iter().position(|id| id == target_id) else {
            return Err(MultipubError::InvalidState(format!(
                "Target {} was already retried",
                target_id
            )));
        };

        let generation = inner
            .store
            .list_record_targets(&record.record_id)
            .await?
            .iter()
            .filter(|t| t.account_id == failed.account_id)
            .count() as u32;

        let account = Account {
            account_id: failed.account_id.clone(),
            platform: failed.platform,
            sub_category: failed.sub_category.clone(),
            display_name: None,
        };
        let now = inner.clock.now();
        let mut target = PublishTarget::new(
            target_id_for(&record.record_id, &failed.account_id, generation),
            record.record_id.clone(),
            &account,
            None,
            now,
        );
        target.retry_of = Some(failed.target_id.clone());

        inner.store.insert_target(&target).await?;
        record.target_ids[slot] = target.target_id.clone();
        inner
            .store
            .update_record_targets(&record.record_id, &record.target_ids)
            .await?;

        info!(
            "Retrying failed target {} as {}",
            failed.target_id, target.target_id
        );
        inner.enqueue_target(&target, now);
        inner.publish_aggregate(&record.record_id).await?;
        Ok(target)
    }

    pub async fn attempt_log(&self, target_id: &str) -> Result<Vec<AttemptLogEntry>> {
        self.inner.store.list_attempts(target_id).await
    }

    /// Run one scheduling pass
    ///
    /// Resolves due poll entries, then claims eligible jobs while worker permits
    /// are free. Returns the handles of the tasks it spawned.
    pub fn tick(&self) -> Vec<JoinHandle<()>> {
        let inner = &self.inner;
        let now = inner.clock.now();
        inner
            .rate_limiter
            .cleanup_old_windows(now.timestamp() - RATE_WINDOW_RETENTION_SECS);

        let mut handles = Vec::new();
        for entry in inner.poller.take_due(now) {
            let task_inner = Arc::clone(inner);
            handles.push(tokio::spawn(async move {
                task_inner.resolve_poll(entry).await;
            }));
        }

        loop {
            let Ok(permit) = Arc::clone(&inner.workers).try_acquire_owned() else {
                break;
            };
            let claim = inner.queue.claim_next(now, |job| {
                if inner.rate_limiter.check_and_record(job.platform, now.timestamp()) {
                    return true;
                }
                debug!("Posting budget for {} spent; deferring {}", job.platform, job.target_id);
                inner.events.emit(Event::TargetDeferred {
                    target_id: job.target_id.clone(),
                    platform: job.platform.to_string(),
                });
                false
            });
            let Some(claim) = claim else {
                break;
            };

            let task_inner = Arc::clone(inner);
            handles.push(tokio::spawn(async move {
                task_inner.run_job(claim, permit).await;
            }));
        }

        handles
    }

    /// Run one scheduling pass and wait for every task it spawned
    pub async fn tick_and_wait(&self) {
        for result in join_all(self.tick()).await {
            if let Err(e) = result {
                error!("Engine task panicked: {}", e);
            }
        }
    }

    /// Tick until `shutdown` is set
    ///
    /// Wakes on every tick interval and whenever a job is queued or promoted.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) -> Result<()> {
        let interval = self.inner.config.engine.tick_interval();
        info!(
            "Publish engine running with {} workers, tick every {:?}",
            self.inner.config.engine.workers, interval
        );

        while !shutdown.load(Ordering::Relaxed) {
            drop(self.tick());
            tokio::select! {
                _ = self.inner.queue.notified() => {}
                _ = sleep(interval) => {}
            }
        }

        info!("Shutdown requested, stopping publish engine");
        Ok(())
    }

    /// Rebuild the queue and poller from the store after a restart
    ///
    /// Pending and publishing targets are queued again (publishing ones resume
    /// their upload session where possible); targets awaiting processing are
    /// polled again against their original deadline.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let inner = &self.inner;
        let now = inner.clock.now();
        let mut report = RecoveryReport::default();

        for target in inner.store.list_unfinished_targets().await? {
            match target.state {
                TargetState::Pending | TargetState::Publishing => {
                    if inner.enqueue_target(&target, now) {
                        report.requeued += 1;
                    }
                }
                TargetState::AwaitingProcessing => {
                    if inner.recover_polling(target, now).await? {
                        report.polling += 1;
                    } else {
                        report.failed += 1;
                    }
                }
                TargetState::Released | TargetState::Failed => {}
            }
        }

        info!(
            "Recovered {} queued and {} polling target(s), {} could not resume",
            report.requeued, report.polling, report.failed
        );
        Ok(report)
    }

    /// Number of jobs waiting in the queue
    pub fn queued_len(&self) -> usize {
        self.inner.queue.waiting_len()
    }

    /// Number of targets waiting on platform processing
    pub fn polling_len(&self) -> usize {
        self.inner.poller.len()
    }
}

impl EngineInner {
    pub(super) async fn load_target(&self, target_id: &str) -> Result<PublishTarget> {
        self.store
            .get_target(target_id)
            .await?
            .ok_or_else(|| MultipubError::NotFound(format!("target {}", target_id)))
    }

    pub(super) async fn active_targets(
        &self,
        record: &PublishRecord,
    ) -> Result<Vec<PublishTarget>> {
        let mut targets = Vec::with_capacity(record.target_ids.len());
        for target_id in &record.target_ids {
            targets.push(self.load_target(target_id).await?);
        }
        Ok(targets)
    }

    /// Queue a target; pending targets keep their schedule, others run now
    pub(super) fn enqueue_target(&self, target: &PublishTarget, now: DateTime<Utc>) -> bool {
        let scheduled_at = match target.state {
            TargetState::Pending => target.scheduled_at,
            _ => None,
        };
        let outcome = self.queue.enqueue(
            &target.target_id,
            &target.record_id,
            target.platform,
            scheduled_at,
            now,
        );
        if outcome == EnqueueOutcome::Duplicate {
            return false;
        }
        self.events.emit(Event::TargetQueued {
            target_id: target.target_id.clone(),
            record_id: target.record_id.clone(),
            platform: target.platform.to_string(),
            scheduled_at,
        });
        true
    }

    pub(super) fn cancel_flag(&self, target_id: &str) -> Arc<AtomicBool> {
        let mut cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(
            cancels
                .entry(target_id.to_string())
                .or_insert_with(|| Arc::new(AtomicBool::new(false))),
        )
    }

    pub(super) fn forget_cancel(&self, target_id: &str) {
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(target_id);
    }

    async fn recover_polling(&self, mut target: PublishTarget, now: DateTime<Utc>) -> Result<bool> {
        let target_id = target.target_id.clone();
        self.queue
            .enqueue(&target_id, &target.record_id, target.platform, None, now);
        let Some(claim) = self.queue.claim_next(now, |job| job.target_id == target_id) else {
            return Ok(false);
        };

        let session = match &target.upload_session_id {
            Some(session_id) => self.store.get_session(session_id).await?,
            None => None,
        };
        let poll_token = session.as_ref().and_then(|s| s.poll_token.clone());

        let prepared = match poll_token {
            Some(token) => self.prepare_context(&target).await?.map(|ctx| (token, ctx)),
            None => Err((
                ErrorKind::Permanent,
                "Poll token lost before restart".to_string(),
            )),
        };
        match prepared {
            Ok((poll_token, ctx)) => {
                let interval = self.poll_interval(target.platform);
                self.poller.register(PollEntry {
                    claim,
                    poll_token,
                    session_id: session.map(|s| s.session_id),
                    next_check_at: now,
                    deadline: target.updated_at + self.poll_timeout(),
                    interval,
                    cancel: self.cancel_flag(&target_id),
                    ctx,
                    pending: None,
                });
                Ok(true)
            }
            Err((kind, message)) => {
                warn!("Cannot resume polling {}: {}", target_id, message);
                let from = target.fail(kind, message, now)?;
                self.commit(&target, from, Some(AttemptOutcome::Failed))
                    .await?;
                claim.complete();
                Ok(false)
            }
        }
    }

    pub(super) fn poll_interval(&self, platform: PlatformKind) -> chrono::Duration {
        let interval = self.config.poller.interval_for(platform);
        chrono::Duration::from_std(interval).unwrap_or_else(|_| chrono::Duration::seconds(2))
    }

    pub(super) fn poll_timeout(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.poller.timeout())
            .unwrap_or_else(|_| chrono::Duration::minutes(10))
    }
}
