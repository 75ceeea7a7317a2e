//! Job execution
//!
//! A worker task owns one [`JobClaim`] and one worker permit. It moves the target
//! to Publishing, resolves the account's credential, then publishes with a
//! single request or through the chunked upload driver. Every outcome ends in
//! exactly one of: Released, Failed, rescheduled for retry, or handed to the
//! status poller (claim kept, permit returned). A job stopped by a store error
//! goes back to the queue after a backoff delay, or fails once the target has
//! used up its attempts.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, error, info, warn};

use super::engine::EngineInner;
use super::events::Event;
use crate::error::{ErrorKind, MultipubError, Result, UploadError};
use crate::platforms::{PublishContext, PublishOutcome};
use crate::poller::{self, PollEntry, PollResolution, PollStep};
use crate::queue::JobClaim;
use crate::types::{
    AggregateState, AttemptLogEntry, AttemptOutcome, ContentItem, PublishTarget, TargetState,
    UploadPhase, UploadSession,
};
use crate::upload::{ChunkedUpload, UploadOutcome};

/// What one publish attempt produced
enum Attempt {
    Published {
        work_id: String,
        url: Option<String>,
    },
    AwaitProcessing {
        poll_token: String,
        session_id: String,
    },
    Cancelled,
    Failed(UploadError),
}

/// A reason the target cannot be attempted at all
type Refusal = (ErrorKind, String);

/// Where a job leaves its claim once the worker is done with it
enum Disposition {
    /// Released or failed; the key is freed
    Done,
    RetryAt(DateTime<Utc>),
    /// Processing on the platform; the poller takes over the claim
    Poll(PollHandoff),
}

struct PollHandoff {
    poll_token: String,
    session_id: String,
    ctx: PublishContext,
    cancel: Arc<AtomicBool>,
    deadline: DateTime<Utc>,
}

impl EngineInner {
    pub(super) async fn run_job(&self, claim: JobClaim, permit: OwnedSemaphorePermit) {
        let target_id = claim.target_id().to_string();
        match self.execute(&claim).await {
            Ok(Disposition::Done) => {
                claim.complete();
                self.forget_cancel(&target_id);
            }
            Ok(Disposition::RetryAt(at)) => claim.retry_at(at),
            Ok(Disposition::Poll(handoff)) => self.start_polling(claim, handoff),
            Err(e) => {
                error!("Job for {} aborted: {}", target_id, e);
                self.recover_job(claim, &e).await;
            }
        }
        drop(permit);
    }

    async fn execute(&self, claim: &JobClaim) -> Result<Disposition> {
        let mut target = self.load_target(claim.target_id()).await?;
        if target.state.is_terminal() {
            debug!("Skipping {}: already {}", target.target_id, target.state);
            return Ok(Disposition::Done);
        }

        let cancel = self.cancel_flag(&target.target_id);
        if cancel.load(Ordering::SeqCst) {
            return self
                .fail_target(target, ErrorKind::Cancelled, "Cancelled before start")
                .await;
        }
        if target.state == TargetState::AwaitingProcessing {
            return self.resume_polling(target, cancel).await;
        }

        let from = target.transition(TargetState::Publishing, self.clock.now())?;
        target.attempt_count += 1;
        self.commit(&target, from, None).await?;
        info!(
            "Publishing {} to {} account {} (attempt {})",
            target.target_id, target.platform, target.account_id, target.attempt_count
        );

        let ctx = match self.prepare_context(&target).await? {
            Ok(ctx) => ctx,
            Err((kind, message)) => return self.fail_target(target, kind, message).await,
        };

        let attempt = self.attempt(&mut target, &ctx, &cancel).await?;
        self.settle(target, ctx, attempt, cancel).await
    }

    fn start_polling(&self, claim: JobClaim, handoff: PollHandoff) {
        let interval = self.poll_interval(handoff.ctx.platform);
        self.poller.register(PollEntry {
            claim,
            poll_token: handoff.poll_token,
            session_id: Some(handoff.session_id),
            ctx: handoff.ctx,
            next_check_at: (self.clock.now() + interval).min(handoff.deadline),
            deadline: handoff.deadline,
            interval,
            cancel: handoff.cancel,
            pending: None,
        });
    }

    /// Poll again for a target whose job was requeued after reaching processing
    async fn resume_polling(
        &self,
        target: PublishTarget,
        cancel: Arc<AtomicBool>,
    ) -> Result<Disposition> {
        let session = match &target.upload_session_id {
            Some(session_id) => self.store.get_session(session_id).await?,
            None => None,
        };
        let (session_id, poll_token) = match session {
            Some(UploadSession {
                session_id,
                poll_token: Some(poll_token),
                ..
            }) => (session_id, poll_token),
            _ => {
                return self
                    .fail_target(target, ErrorKind::Permanent, "Poll token lost")
                    .await
            }
        };

        let ctx = match self.prepare_context(&target).await? {
            Ok(ctx) => ctx,
            Err((kind, message)) => return self.fail_target(target, kind, message).await,
        };
        debug!("Resuming status polling for {}", target.target_id);
        Ok(Disposition::Poll(PollHandoff {
            poll_token,
            session_id,
            ctx,
            cancel,
            deadline: target.updated_at + self.poll_timeout(),
        }))
    }

    /// Settle a claim whose job stopped on an engine error
    ///
    /// The target goes back to the queue after a backoff delay while it has
    /// attempts left and fails once it has none.
    async fn recover_job(&self, claim: JobClaim, cause: &MultipubError) {
        let target_id = claim.target_id().to_string();
        let target = match self.store.get_target(&target_id).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                claim.complete();
                self.forget_cancel(&target_id);
                return;
            }
            Err(e) => {
                warn!("Cannot reload {} after an aborted job: {}", target_id, e);
                claim.retry_at(self.retry_time(1));
                return;
            }
        };

        if target.state.is_terminal() {
            claim.complete();
            self.forget_cancel(&target_id);
            return;
        }

        let attempts = target.attempt_count;
        if !self.retry_policy.should_retry(attempts) {
            let message = format!("Gave up after {} attempts: {}", attempts, cause);
            match self.fail_target(target, ErrorKind::Transient, message).await {
                Ok(_) => {
                    claim.complete();
                    self.forget_cancel(&target_id);
                    return;
                }
                Err(e) => warn!("Cannot fail {} after an aborted job: {}", target_id, e),
            }
        }

        let retry_at = self.retry_time(attempts.max(1));
        info!("Requeued {} for {}", target_id, retry_at.to_rfc3339());
        claim.retry_at(retry_at);
    }

    /// When the retry following attempt number `attempt` may start
    fn retry_time(&self, attempt: u32) -> DateTime<Utc> {
        let delay = {
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            self.retry_policy.next_delay(attempt, &mut *rng)
        };
        self.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
    }

    /// Load the content and a live credential for `target`
    pub(super) async fn prepare_context(
        &self,
        target: &PublishTarget,
    ) -> Result<std::result::Result<PublishContext, Refusal>> {
        let Some(content) = self.load_content(&target.record_id).await? else {
            return Ok(Err((
                ErrorKind::Permanent,
                format!("Content for record {} is missing", target.record_id),
            )));
        };

        let credential = match self
            .credentials
            .resolve(&target.account_id, target.platform)
            .await
        {
            Ok(credential) => credential,
            Err(e) => return Ok(Err((ErrorKind::AuthExpired, e.to_string()))),
        };
        if let Some(expires_at) = credential.expires_at {
            if expires_at <= self.clock.now() {
                return Ok(Err((
                    ErrorKind::AuthExpired,
                    format!("Credentials for account {} expired", target.account_id),
                )));
            }
        }

        Ok(Ok(PublishContext {
            target_id: target.target_id.clone(),
            account_id: target.account_id.clone(),
            platform: target.platform,
            sub_category: target.sub_category.clone(),
            content: Arc::new(content),
            credential: Arc::new(credential),
        }))
    }

    async fn load_content(&self, record_id: &str) -> Result<Option<ContentItem>> {
        let record = self
            .store
            .get_record(record_id)
            .await?
            .ok_or_else(|| MultipubError::NotFound(format!("record {}", record_id)))?;
        self.store.get_content(&record.content_id).await
    }

    async fn attempt(
        &self,
        target: &mut PublishTarget,
        ctx: &PublishContext,
        cancel: &AtomicBool,
    ) -> Result<Attempt> {
        let Some(uploader) = self.registry.get(target.platform) else {
            return Ok(Attempt::Failed(UploadError::Permanent(format!(
                "No uploader registered for {}",
                target.platform
            ))));
        };

        let limit = uploader.single_request_limit();
        let oversized = ctx
            .content
            .largest_media()
            .filter(|m| m.size_bytes > limit)
            .cloned();

        let Some(media) = oversized else {
            return Ok(match uploader.publish_simple(ctx).await {
                Ok(PublishOutcome::Published { work_id, url }) => {
                    Attempt::Published { work_id, url }
                }
                Ok(PublishOutcome::AwaitProcessing { poll_token }) => {
                    // Keep the poll token durable so polling survives a restart
                    let mut session = UploadSession::new(target.target_id.clone(), 0, 0);
                    session.phase = UploadPhase::AwaitingProcessing;
                    session.poll_token = Some(poll_token.clone());
                    self.store.save_session(&session).await?;
                    target.upload_session_id = Some(session.session_id.clone());
                    Attempt::AwaitProcessing {
                        poll_token,
                        session_id: session.session_id,
                    }
                }
                Err(e) => Attempt::Failed(e),
            });
        };

        let Some(chunker) = uploader.chunked() else {
            return Ok(Attempt::Failed(UploadError::Permanent(format!(
                "Media of {} bytes exceeds the {} byte single-request limit of {}, \
                 which has no chunked upload",
                media.size_bytes, limit, target.platform
            ))));
        };

        let driver = ChunkedUpload::new(
            chunker,
            self.media.as_ref(),
            self.store.as_ref(),
            &self.events,
            cancel,
            self.config.engine.chunk_retry_limit,
        );
        let session = match self.resumable_session(target).await? {
            Some(session) => session,
            None => driver.new_session(&target.target_id, &media),
        };
        if target.upload_session_id.as_deref() != Some(session.session_id.as_str()) {
            target.upload_session_id = Some(session.session_id.clone());
            self.store.update_target(target).await?;
        }

        Ok(match driver.run(ctx, &media, session).await? {
            UploadOutcome::Published { work_id, url } => Attempt::Published { work_id, url },
            UploadOutcome::AwaitProcessing {
                poll_token,
                session,
            } => Attempt::AwaitProcessing {
                poll_token,
                session_id: session.session_id,
            },
            UploadOutcome::Cancelled => Attempt::Cancelled,
            UploadOutcome::Failed(e) => Attempt::Failed(e),
        })
    }

    /// The target's stored session, if it can continue appending
    async fn resumable_session(&self, target: &PublishTarget) -> Result<Option<UploadSession>> {
        let Some(session_id) = &target.upload_session_id else {
            return Ok(None);
        };
        match self.store.get_session(session_id).await? {
            Some(session)
                if session.phase == UploadPhase::Appending && session.session_token.is_some() =>
            {
                Ok(Some(session))
            }
            Some(stale) => {
                debug!(
                    "Discarding upload session {} in phase {}",
                    stale.session_id,
                    stale.phase.as_str()
                );
                self.store.delete_session(&stale.session_id).await?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn settle(
        &self,
        mut target: PublishTarget,
        ctx: PublishContext,
        attempt: Attempt,
        cancel: Arc<AtomicBool>,
    ) -> Result<Disposition> {
        if cancel.load(Ordering::SeqCst) {
            return self.settle_cancelled(target, attempt).await;
        }

        let now = self.clock.now();
        match attempt {
            Attempt::Published { work_id, url } => {
                let from = target.release(work_id, url, now)?;
                self.commit(&target, from, Some(AttemptOutcome::Released))
                    .await?;
                Ok(Disposition::Done)
            }
            Attempt::AwaitProcessing {
                poll_token,
                session_id,
            } => {
                let from = target.transition(TargetState::AwaitingProcessing, now)?;
                self.commit(&target, from, Some(AttemptOutcome::AwaitingProcessing))
                    .await?;
                Ok(Disposition::Poll(PollHandoff {
                    poll_token,
                    session_id,
                    ctx,
                    cancel,
                    deadline: now + self.poll_timeout(),
                }))
            }
            Attempt::Cancelled => {
                self.fail_target(target, ErrorKind::Cancelled, "Cancelled during upload")
                    .await
            }
            Attempt::Failed(error)
                if error.is_retryable() && self.retry_policy.should_retry(target.attempt_count) =>
            {
                self.schedule_retry(target, error).await
            }
            Attempt::Failed(error) => {
                self.fail_target(target, error.kind(), error.to_string()).await
            }
        }
    }

    /// The target was cancelled while its attempt was in flight
    ///
    /// The in-flight call was allowed to finish; whatever it produced, the target
    /// fails as cancelled.
    async fn settle_cancelled(
        &self,
        target: PublishTarget,
        attempt: Attempt,
    ) -> Result<Disposition> {
        let message = match attempt {
            Attempt::Published { work_id, .. } => {
                warn!(
                    "Target {} was cancelled after {} published {}",
                    target.target_id, target.platform, work_id
                );
                "Cancelled while publishing".to_string()
            }
            Attempt::AwaitProcessing { session_id, .. } => {
                self.store.delete_session(&session_id).await?;
                "Cancelled before processing started".to_string()
            }
            Attempt::Cancelled => "Cancelled during upload".to_string(),
            Attempt::Failed(error) => format!("Cancelled while publishing: {}", error),
        };
        self.fail_target(target, ErrorKind::Cancelled, message).await
    }

    async fn schedule_retry(
        &self,
        mut target: PublishTarget,
        error: UploadError,
    ) -> Result<Disposition> {
        let retry_at = self.retry_time(target.attempt_count);
        let now = self.clock.now();

        target.error_kind = Some(ErrorKind::Transient);
        target.error_message = Some(error.to_string());
        target.updated_at = now;
        self.commit(&target, target.state, Some(AttemptOutcome::Retrying))
            .await?;

        warn!(
            "Attempt {}/{} for {} failed, retrying in {}s: {}",
            target.attempt_count,
            self.retry_policy.max_attempts,
            target.target_id,
            (retry_at - now).num_seconds(),
            error
        );
        self.events.emit(Event::RetryScheduled {
            target_id: target.target_id.clone(),
            attempt: target.attempt_count,
            retry_at,
        });
        Ok(Disposition::RetryAt(retry_at))
    }

    async fn fail_target(
        &self,
        mut target: PublishTarget,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Result<Disposition> {
        let from = target.fail(kind, message, self.clock.now())?;
        warn!(
            "Target {} failed ({}): {}",
            target.target_id,
            kind,
            target.error_message.as_deref().unwrap_or_default()
        );
        self.commit(&target, from, Some(AttemptOutcome::Failed))
            .await?;
        Ok(Disposition::Done)
    }

    pub(super) async fn resolve_poll(&self, entry: PollEntry) {
        let now = self.clock.now();
        let step = match self.registry.get(entry.ctx.platform) {
            Some(uploader) => poller::check(entry, uploader.as_ref(), now).await,
            None => {
                let message = format!("No uploader registered for {}", entry.ctx.platform);
                PollStep::Finished {
                    entry,
                    resolution: PollResolution::Failed {
                        kind: ErrorKind::Permanent,
                        message,
                    },
                }
            }
        };

        let (mut entry, resolution) = match step {
            PollStep::Continue(entry) => {
                self.poller.reschedule(entry, self.clock.now());
                return;
            }
            PollStep::Finished { entry, resolution } => (entry, resolution),
        };

        match self.finish_poll(&entry, &resolution).await {
            Ok(()) => {
                let target_id = entry.target_id().to_string();
                entry.claim.complete();
                self.forget_cancel(&target_id);
            }
            Err(e) => {
                // Keep the claim and record the same resolution on the next check
                error!(
                    "Recording the poll result for {} failed, will retry: {}",
                    entry.target_id(),
                    e
                );
                entry.pending = Some(resolution);
                self.poller.reschedule(entry, self.clock.now());
            }
        }
    }

    async fn finish_poll(&self, entry: &PollEntry, resolution: &PollResolution) -> Result<()> {
        let mut target = self.load_target(entry.target_id()).await?;
        if !target.state.is_terminal() {
            let now = self.clock.now();
            let (from, outcome) = match resolution.clone() {
                PollResolution::Released { work_id, url } => {
                    (target.release(work_id, url, now)?, AttemptOutcome::Released)
                }
                PollResolution::Failed { kind, message } => {
                    warn!(
                        "Target {} failed while processing ({}): {}",
                        target.target_id, kind, message
                    );
                    (target.fail(kind, message, now)?, AttemptOutcome::Failed)
                }
            };
            self.commit(&target, from, Some(outcome)).await?;
        }

        if let Some(session_id) = &entry.session_id {
            self.store.delete_session(session_id).await?;
        }
        Ok(())
    }

    /// Persist a target change, log the attempt and publish the new aggregate
    pub(super) async fn commit(
        &self,
        target: &PublishTarget,
        from: TargetState,
        outcome: Option<AttemptOutcome>,
    ) -> Result<()> {
        self.store.update_target(target).await?;

        if let Some(outcome) = outcome {
            let failing = matches!(outcome, AttemptOutcome::Failed | AttemptOutcome::Retrying);
            self.store
                .append_attempt(&AttemptLogEntry {
                    target_id: target.target_id.clone(),
                    attempt_number: target.attempt_count,
                    outcome,
                    timestamp: target.updated_at,
                    error_kind: target.error_kind.filter(|_| failing),
                    message: target.error_message.clone().filter(|_| failing),
                })
                .await?;
        }

        if from != target.state {
            info!("Target {}: {} -> {}", target.target_id, from, target.state);
            self.events.emit(Event::TargetStateChanged {
                target_id: target.target_id.clone(),
                record_id: target.record_id.clone(),
                from,
                to: target.state,
                error_kind: target
                    .error_kind
                    .filter(|_| target.state == TargetState::Failed),
            });
            self.publish_aggregate(&target.record_id).await?;
        }
        Ok(())
    }

    /// Recompute a record's aggregate from its active targets and announce it
    pub(super) async fn publish_aggregate(&self, record_id: &str) -> Result<AggregateState> {
        let record = self
            .store
            .get_record(record_id)
            .await?
            .ok_or_else(|| MultipubError::NotFound(format!("record {}", record_id)))?;
        let targets = self.active_targets(&record).await?;
        let aggregate = AggregateState::from_states(targets.iter().map(|t| t.state));

        debug!("Record {} is {}", record_id, aggregate);
        self.events.emit(Event::RecordUpdated {
            record_id: record.record_id,
            aggregate_state: aggregate,
        });
        Ok(aggregate)
    }
}
