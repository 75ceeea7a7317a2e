//! Store errors in the middle of a job
//!
//! A job that hits a persistence error must leave its target with a way forward:
//! back in the queue, resolved by the poller, or failed.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use common::{harness_with, video_content};
use libmultipub::error::DbError;
use libmultipub::platforms::mock::MockUploader;
use libmultipub::platforms::{PollStatus, PublishOutcome};
use libmultipub::types::{AttemptLogEntry, AttemptOutcome, TargetId, UploadSession};
use libmultipub::{
    Account, AggregateState, Config, ContentItem, ErrorKind, MediaRef, MemoryStore,
    MultipubError, PlatformKind, PublishRecord, PublishStore, PublishTarget, Result,
    TargetState,
};

/// Memory store that fails a set number of upcoming writes
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    session_save_failures: AtomicUsize,
    target_update_failures: AtomicUsize,
    attempt_append_failures: AtomicUsize,
}

impl FlakyStore {
    fn fail_session_saves(&self, n: usize) {
        self.session_save_failures.store(n, Ordering::SeqCst);
    }

    fn fail_target_updates(&self, n: usize) {
        self.target_update_failures.store(n, Ordering::SeqCst);
    }

    fn fail_attempt_appends(&self, n: usize) {
        self.attempt_append_failures.store(n, Ordering::SeqCst);
    }

    fn trip(counter: &AtomicUsize) -> Result<()> {
        let tripped = counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(MultipubError::Database(DbError::IoError(
                std::io::Error::other("disk full"),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PublishStore for FlakyStore {
    async fn insert_record(&self, record: &PublishRecord, content: &ContentItem) -> Result<()> {
        self.inner.insert_record(record, content).await
    }

    async fn update_record_targets(&self, record_id: &str, target_ids: &[TargetId]) -> Result<()> {
        self.inner.update_record_targets(record_id, target_ids).await
    }

    async fn get_record(&self, record_id: &str) -> Result<Option<PublishRecord>> {
        self.inner.get_record(record_id).await
    }

    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        self.inner.get_content(content_id).await
    }

    async fn insert_target(&self, target: &PublishTarget) -> Result<()> {
        self.inner.insert_target(target).await
    }

    async fn update_target(&self, target: &PublishTarget) -> Result<()> {
        Self::trip(&self.target_update_failures)?;
        self.inner.update_target(target).await
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<PublishTarget>> {
        self.inner.get_target(target_id).await
    }

    async fn list_record_targets(&self, record_id: &str) -> Result<Vec<PublishTarget>> {
        self.inner.list_record_targets(record_id).await
    }

    async fn list_unfinished_targets(&self) -> Result<Vec<PublishTarget>> {
        self.inner.list_unfinished_targets().await
    }

    async fn save_session(&self, session: &UploadSession) -> Result<()> {
        Self::trip(&self.session_save_failures)?;
        self.inner.save_session(session).await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>> {
        self.inner.get_session(session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.inner.delete_session(session_id).await
    }

    async fn append_attempt(&self, entry: &AttemptLogEntry) -> Result<()> {
        Self::trip(&self.attempt_append_failures)?;
        self.inner.append_attempt(entry).await
    }

    async fn list_attempts(&self, target_id: &str) -> Result<Vec<AttemptLogEntry>> {
        self.inner.list_attempts(target_id).await
    }
}

fn chunked_content(h: &common::Harness) -> ContentItem {
    let media = MediaRef::video("clip.mp4", 10, 1080, 1920, 20.0);
    h.media.insert_generated(&media);
    ContentItem::new().with_media(media)
}

#[tokio::test]
async fn test_failed_session_save_requeues_the_target() {
    let store = Arc::new(FlakyStore::default());
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_chunking(1, 5);
    let h = harness_with(
        Config::default_config(),
        &[tiktok.clone()],
        Some(store.clone() as Arc<dyn PublishStore>),
        None,
    );

    let outcome = h
        .engine
        .submit_publish(
            chunked_content(&h),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    store.fail_session_saves(1);
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Publishing);
    assert_eq!(target.attempt_count, 1);
    assert_eq!(h.engine.queued_len(), 1, "The job must go back to the queue");
    assert_eq!(tiktok.init_calls(), 0);

    let status = h
        .settle(&outcome.record.record_id, Duration::seconds(30), 20)
        .await;
    assert_eq!(status.aggregate_state, AggregateState::Released);
    assert_eq!(status.targets[0].attempt_count, 2);
    assert_eq!(h.engine.queued_len(), 0);
    assert_eq!(tiktok.append_indices(), vec![0, 1]);
}

#[tokio::test]
async fn test_store_failure_on_last_attempt_fails_the_target() {
    let store = Arc::new(FlakyStore::default());
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_chunking(1, 5);
    let mut config = Config::default_config();
    config.engine.max_attempts = 1;
    let h = harness_with(
        config,
        &[tiktok.clone()],
        Some(store.clone() as Arc<dyn PublishStore>),
        None,
    );

    let outcome = h
        .engine
        .submit_publish(
            chunked_content(&h),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();

    store.fail_session_saves(1);
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&outcome.queued[0]).await.unwrap();
    assert_eq!(target.state, TargetState::Failed);
    assert_eq!(target.error_kind, Some(ErrorKind::Transient));
    assert!(target
        .error_message
        .as_deref()
        .unwrap_or_default()
        .contains("disk full"));
    assert_eq!(h.engine.queued_len(), 0);

    let status = h
        .engine
        .get_record_status(&outcome.record.record_id)
        .await
        .unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Failed);
}

#[tokio::test]
async fn test_unrecorded_poll_result_is_recorded_on_next_check() {
    let store = Arc::new(FlakyStore::default());
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    tiktok.push_publish(Ok(PublishOutcome::AwaitProcessing {
        poll_token: "poll-1".to_string(),
    }));
    tiktok.push_poll(Ok(PollStatus::Succeeded {
        work_id: "tt-video-1".to_string(),
        url: None,
    }));
    let h = harness_with(
        Config::default_config(),
        &[tiktok.clone()],
        Some(store.clone() as Arc<dyn PublishStore>),
        None,
    );

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();
    h.engine.tick_and_wait().await;
    assert_eq!(h.engine.polling_len(), 1);

    store.fail_target_updates(1);
    h.clock.advance(Duration::seconds(5));
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::AwaitingProcessing);
    assert_eq!(h.engine.polling_len(), 1, "The poller must keep the entry");

    h.clock.advance(Duration::seconds(5));
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Released);
    assert_eq!(target.external_work_id.as_deref(), Some("tt-video-1"));
    assert_eq!(tiktok.poll_calls(), 1, "The platform is not asked twice");
    assert_eq!(h.engine.polling_len(), 0);

    let log = h.engine.attempt_log(&target_id).await.unwrap();
    assert_eq!(log.last().map(|e| e.outcome), Some(AttemptOutcome::Released));
}

#[tokio::test]
async fn test_half_recorded_handoff_resumes_polling() {
    let store = Arc::new(FlakyStore::default());
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    tiktok.push_publish(Ok(PublishOutcome::AwaitProcessing {
        poll_token: "poll-2".to_string(),
    }));
    tiktok.push_poll(Ok(PollStatus::Succeeded {
        work_id: "tt-video-2".to_string(),
        url: None,
    }));
    let h = harness_with(
        Config::default_config(),
        &[tiktok.clone()],
        Some(store.clone() as Arc<dyn PublishStore>),
        None,
    );

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    // The state change lands but its attempt log entry does not
    store.fail_attempt_appends(1);
    h.engine.tick_and_wait().await;
    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::AwaitingProcessing);
    assert_eq!(h.engine.queued_len(), 1);
    assert_eq!(h.engine.polling_len(), 0);

    h.clock.advance(Duration::seconds(30));
    h.engine.tick_and_wait().await;
    assert_eq!(h.engine.polling_len(), 1);
    assert_eq!(tiktok.publish_calls().len(), 1, "Nothing is published twice");

    h.clock.advance(Duration::seconds(5));
    h.engine.tick_and_wait().await;
    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Released);
    assert_eq!(target.external_work_id.as_deref(), Some("tt-video-2"));
    assert_eq!(target.attempt_count, 1);
}
