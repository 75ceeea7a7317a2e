//! End-to-end publish scenarios driven through `PublishEngine`
//!
//! Every test runs against the in-memory store with scripted mock uploaders and a
//! manual clock, so backoff delays and poll deadlines are stepped explicitly.

mod common;

use std::sync::Arc;

use chrono::Duration;
use common::{drain_events, harness, harness_with, video_content};
use libmultipub::clock::Clock;
use libmultipub::config::RateLimitConfig;
use libmultipub::platforms::mock::MockUploader;
use libmultipub::platforms::{PollStatus, PublishOutcome};
use libmultipub::service::{CancelOutcome, Event};
use libmultipub::types::AttemptOutcome;
use libmultipub::{
    Account, AggregateState, Config, ContentItem, ErrorKind, MediaRef, MultipubError,
    PlatformKind, TargetState, UploadError,
};
use tokio::sync::Semaphore;

fn awaiting(token: &str) -> PublishOutcome {
    PublishOutcome::AwaitProcessing {
        poll_token: token.to_string(),
    }
}

#[tokio::test]
async fn test_oversized_instagram_post_is_rejected_before_queueing() {
    let instagram = MockUploader::new(PlatformKind::Instagram);
    let h = harness(&[instagram.clone()]);
    let content = ContentItem::new()
        .with_description("x".repeat(3_000))
        .with_media(MediaRef::image("photo.jpg", 500_000, 1080, 1350));

    let outcome = h
        .engine
        .submit_publish(
            content,
            &[Account::new("ig-1", PlatformKind::Instagram).with_sub_category("post")],
            None,
            None,
        )
        .await
        .unwrap();

    assert!(outcome.queued.is_empty());
    assert_eq!(outcome.rejected.len(), 1);
    assert_eq!(outcome.rejected[0].account_id, "ig-1");
    assert!(outcome.rejected[0].error.to_string().contains("2200"));

    h.engine.tick_and_wait().await;
    assert!(instagram.publish_calls().is_empty());
    assert_eq!(h.engine.queued_len(), 0);
}

#[tokio::test]
async fn test_transient_failures_retry_until_every_target_is_released() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    let youtube = MockUploader::new(PlatformKind::Youtube);
    youtube
        .push_publish(Err(UploadError::from_status(503, "upstream busy")))
        .push_publish(Err(UploadError::from_status(503, "upstream busy")));
    let h = harness(&[tiktok.clone(), youtube.clone()]);
    let mut events = h.engine.subscribe();

    let accounts = [
        Account::new("tt-1", PlatformKind::Tiktok),
        Account::new("tt-2", PlatformKind::Tiktok),
        Account::new("yt-1", PlatformKind::Youtube),
    ];
    let outcome = h
        .engine
        .submit_publish(video_content(), &accounts, None, None)
        .await
        .unwrap();
    assert_eq!(outcome.queued.len(), 3);
    let record_id = outcome.record.record_id.clone();

    h.engine.tick_and_wait().await;
    let status = h.engine.get_record_status(&record_id).await.unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Publishing);
    let released = status
        .targets
        .iter()
        .filter(|t| t.state == TargetState::Released)
        .count();
    assert_eq!(released, 2);

    let status = h.settle(&record_id, Duration::seconds(61), 10).await;
    assert_eq!(status.aggregate_state, AggregateState::Released);

    let yt = status
        .targets
        .iter()
        .find(|t| t.platform == PlatformKind::Youtube)
        .unwrap();
    assert_eq!(yt.attempt_count, 3);
    assert_eq!(youtube.publish_calls().len(), 3);
    assert_eq!(tiktok.publish_calls().len(), 2);

    let outcomes: Vec<AttemptOutcome> = h
        .engine
        .attempt_log(&yt.target_id)
        .await
        .unwrap()
        .into_iter()
        .map(|entry| entry.outcome)
        .collect();
    assert_eq!(
        outcomes,
        vec![
            AttemptOutcome::Retrying,
            AttemptOutcome::Retrying,
            AttemptOutcome::Released
        ]
    );

    let retries = drain_events(&mut events)
        .into_iter()
        .filter(|e| matches!(e, Event::RetryScheduled { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_permanent_failure_yields_partial_success() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    let youtube = MockUploader::new(PlatformKind::Youtube);
    youtube.push_publish(Err(UploadError::from_status(400, "video rejected")));
    let h = harness(&[tiktok.clone(), youtube.clone()]);

    let accounts = [
        Account::new("tt-1", PlatformKind::Tiktok),
        Account::new("tt-2", PlatformKind::Tiktok),
        Account::new("yt-1", PlatformKind::Youtube),
    ];
    let outcome = h
        .engine
        .submit_publish(video_content(), &accounts, None, None)
        .await
        .unwrap();

    let status = h
        .settle(&outcome.record.record_id, Duration::seconds(61), 5)
        .await;
    assert_eq!(status.aggregate_state, AggregateState::PartialSuccess);

    let failed: Vec<_> = status.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].account_id, "yt-1");
    assert_eq!(failed[0].error_kind, Some(ErrorKind::Permanent));
    assert_eq!(failed[0].attempt_count, 1);
    assert_eq!(youtube.publish_calls().len(), 1);
}

#[tokio::test]
async fn test_promoted_timed_target_runs_on_next_tick() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    let h = harness(&[tiktok.clone()]);
    let at = h.clock.now() + Duration::minutes(10);

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            Some(at),
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    h.engine.tick_and_wait().await;
    assert!(tiktok.publish_calls().is_empty());
    assert_eq!(
        h.engine.get_target(&target_id).await.unwrap().state,
        TargetState::Pending
    );

    h.engine.promote_to_immediate(&target_id).await.unwrap();
    h.engine.tick_and_wait().await;

    assert_eq!(tiktok.publish_calls(), vec![target_id.clone()]);
    assert_eq!(
        h.engine.get_target(&target_id).await.unwrap().state,
        TargetState::Released
    );

    let err = h.engine.promote_to_immediate(&target_id).await.unwrap_err();
    assert!(matches!(err, MultipubError::InvalidState(_)));
}

#[tokio::test]
async fn test_polling_resolves_released_without_holding_a_worker() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    tiktok.push_publish(Ok(awaiting("poll-1"))).push_poll(Ok(PollStatus::Succeeded {
        work_id: "tt-video-9".to_string(),
        url: Some("https://tiktok.example/tt-video-9".to_string()),
    }));
    let mut config = Config::default_config();
    config.engine.workers = 1;
    let h = harness_with(config, &[tiktok.clone()], None, None);

    let accounts = [
        Account::new("tt-1", PlatformKind::Tiktok),
        Account::new("tt-2", PlatformKind::Tiktok),
    ];
    let outcome = h
        .engine
        .submit_publish(video_content(), &accounts, None, None)
        .await
        .unwrap();
    let record_id = outcome.record.record_id.clone();

    h.engine.tick_and_wait().await;
    assert_eq!(h.engine.polling_len(), 1);

    // The single worker is free again while the first target is being polled
    h.engine.tick_and_wait().await;
    let status = h.engine.get_record_status(&record_id).await.unwrap();
    let states: Vec<TargetState> = status.targets.iter().map(|t| t.state).collect();
    assert!(states.contains(&TargetState::AwaitingProcessing));
    assert!(states.contains(&TargetState::Released));
    assert_eq!(tiktok.poll_calls(), 0);

    h.clock.advance(Duration::seconds(2));
    h.engine.tick_and_wait().await;

    let status = h.engine.get_record_status(&record_id).await.unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Released);
    assert!(status
        .targets
        .iter()
        .any(|t| t.external_work_id.as_deref() == Some("tt-video-9")));
    assert_eq!(h.engine.polling_len(), 0);
    assert_eq!(tiktok.poll_calls(), 1);
}

#[tokio::test]
async fn test_polling_times_out_at_deadline() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    tiktok.push_publish(Ok(awaiting("poll-1")));
    let h = harness(&[tiktok.clone()]);
    let started = h.clock.now();

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

    let status = h
        .settle(&outcome.record.record_id, Duration::seconds(30), 40)
        .await;
    assert_eq!(status.aggregate_state, AggregateState::Failed);
    assert_eq!(status.targets[0].error_kind, Some(ErrorKind::Timeout));

    let timeout = Duration::seconds(600);
    assert!(h.clock.now() - started <= timeout + Duration::seconds(30));
    assert!(tiktok.poll_calls() > 0);
    assert_eq!(h.engine.polling_len(), 0);
}

#[tokio::test]
async fn test_platform_processing_failure_is_permanent() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_default_poll(PollStatus::Failed {
        reason: "transcode failed".to_string(),
    });
    tiktok.push_publish(Ok(awaiting("poll-1")));
    let h = harness(&[tiktok.clone()]);

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

    let status = h
        .settle(&outcome.record.record_id, Duration::seconds(2), 5)
        .await;
    assert_eq!(status.aggregate_state, AggregateState::Failed);
    assert_eq!(status.targets[0].error_kind, Some(ErrorKind::Permanent));
    assert_eq!(
        status.targets[0].error_message.as_deref(),
        Some("transcode failed")
    );
    assert_eq!(tiktok.poll_calls(), 1);
}

#[tokio::test]
async fn test_claimed_target_is_not_picked_up_again() {
    let tiktok =
        MockUploader::new(PlatformKind::Tiktok).with_delay(std::time::Duration::from_millis(50));
    let h = harness(&[tiktok.clone()]);

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

    let first = h.engine.tick();
    assert_eq!(first.len(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    // Still uploading: neither a tick nor a promotion can claim it again
    assert!(h.engine.tick().is_empty());
    h.engine.promote_to_immediate(&target_id).await.unwrap_err();
    for handle in first {
        handle.await.unwrap();
    }

    assert_eq!(tiktok.publish_calls(), vec![target_id.clone()]);
    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.attempt_count, 1);
    assert_eq!(target.state, TargetState::Released);
}

#[tokio::test]
async fn test_cancel_waiting_target() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    let h = harness(&[tiktok.clone()]);
    let at = h.clock.now() + Duration::hours(1);

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            Some(at),
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    assert_eq!(
        h.engine.cancel_target(&target_id).await.unwrap(),
        CancelOutcome::Cancelled
    );
    assert_eq!(h.engine.queued_len(), 0);

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Failed);
    assert_eq!(target.error_kind, Some(ErrorKind::Cancelled));

    h.clock.advance(Duration::hours(2));
    h.engine.tick_and_wait().await;
    assert!(tiktok.publish_calls().is_empty());
    assert_eq!(
        h.engine.cancel_target(&target_id).await.unwrap(),
        CancelOutcome::AlreadyTerminal
    );

    let status = h
        .engine
        .get_record_status(&outcome.record.record_id)
        .await
        .unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Failed);
}

#[tokio::test]
async fn test_cancel_mid_upload_stops_before_next_chunk() {
    let gate = Arc::new(Semaphore::new(1));
    let tiktok = MockUploader::new(PlatformKind::Tiktok)
        .with_chunking(1, 5)
        .with_append_gate(Arc::clone(&gate));
    let h = harness(&[tiktok.clone()]);

    let media = MediaRef::video("long.mp4", 20, 1080, 1920, 30.0);
    h.media.insert_generated(&media);
    let content = ContentItem::new().with_media(media);

    let outcome = h
        .engine
        .submit_publish(
            content,
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    let handles = h.engine.tick();
    while tiktok.append_attempts() < 2 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    assert_eq!(
        h.engine.cancel_target(&target_id).await.unwrap(),
        CancelOutcome::Signalled
    );
    gate.add_permits(1);
    for handle in handles {
        handle.await.unwrap();
    }

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Failed);
    assert_eq!(target.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(tiktok.append_indices(), vec![0, 1]);
    assert_eq!(tiktok.finalize_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_last_chunk_skips_finalize() {
    let gate = Arc::new(Semaphore::new(1));
    let tiktok = MockUploader::new(PlatformKind::Tiktok)
        .with_chunking(1, 5)
        .with_append_gate(Arc::clone(&gate));
    let h = harness(&[tiktok.clone()]);

    let media = MediaRef::video("short.mp4", 10, 1080, 1920, 30.0);
    h.media.insert_generated(&media);
    let outcome = h
        .engine
        .submit_publish(
            ContentItem::new().with_media(media),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    let target_id = outcome.queued[0].clone();

    let handles = h.engine.tick();
    while tiktok.append_attempts() < 2 {
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert_eq!(
        h.engine.cancel_target(&target_id).await.unwrap(),
        CancelOutcome::Signalled
    );
    gate.add_permits(1);
    for handle in handles {
        handle.await.unwrap();
    }

    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.state, TargetState::Failed);
    assert_eq!(target.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(tiktok.append_indices(), vec![0, 1]);
    assert_eq!(tiktok.finalize_calls(), 0);
}

#[tokio::test]
async fn test_cancel_during_in_flight_publish_wins_over_its_result() {
    let delay = std::time::Duration::from_millis(200);
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_delay(delay);
    let youtube = MockUploader::new(PlatformKind::Youtube).with_delay(delay);
    youtube.push_publish(Err(UploadError::from_status(400, "rejected")));
    let h = harness(&[tiktok.clone(), youtube.clone()]);

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[
                Account::new("tt-1", PlatformKind::Tiktok),
                Account::new("yt-1", PlatformKind::Youtube),
            ],
            None,
            None,
        )
        .await
        .unwrap();

    let handles = h.engine.tick();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    for target_id in &outcome.queued {
        assert_eq!(
            h.engine.cancel_target(target_id).await.unwrap(),
            CancelOutcome::Signalled
        );
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Both calls ran to completion, one succeeding and one rejected
    assert_eq!(tiktok.publish_calls().len(), 1);
    assert_eq!(youtube.publish_calls().len(), 1);

    let status = h
        .engine
        .get_record_status(&outcome.record.record_id)
        .await
        .unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Failed);
    for target in &status.targets {
        assert_eq!(target.state, TargetState::Failed);
        assert_eq!(target.error_kind, Some(ErrorKind::Cancelled));
        assert!(target.external_work_id.is_none());

        let log = h.engine.attempt_log(&target.target_id).await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].outcome, AttemptOutcome::Failed);
        assert_eq!(log[0].error_kind, Some(ErrorKind::Cancelled));
    }
}

#[tokio::test]
async fn test_cancel_while_awaiting_processing() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    tiktok.push_publish(Ok(awaiting("poll-1")));
    let h = harness(&[tiktok.clone()]);

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
    assert_eq!(
        h.engine.cancel_target(&target_id).await.unwrap(),
        CancelOutcome::Signalled
    );

    // Cancelled entries are resolved without waiting for their next check
    h.engine.tick_and_wait().await;
    let target = h.engine.get_target(&target_id).await.unwrap();
    assert_eq!(target.error_kind, Some(ErrorKind::Cancelled));
    assert_eq!(h.engine.polling_len(), 0);
    assert_eq!(tiktok.poll_calls(), 0);
}

#[tokio::test]
async fn test_resubmission_with_same_key_queues_only_new_accounts() {
    let h = harness(&[
        MockUploader::new(PlatformKind::Tiktok),
        MockUploader::new(PlatformKind::Youtube),
    ]);
    let content = video_content();
    let accounts = vec![
        Account::new("tt-1", PlatformKind::Tiktok),
        Account::new("yt-1", PlatformKind::Youtube),
    ];

    let first = h
        .engine
        .submit_publish(content.clone(), &accounts, None, Some("launch-1"))
        .await
        .unwrap();
    assert_eq!(first.queued.len(), 2);
    assert_eq!(first.record.record_id, "launch-1");

    let again = h
        .engine
        .submit_publish(content.clone(), &accounts, None, Some("launch-1"))
        .await
        .unwrap();
    assert!(again.queued.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(again.record.target_ids, first.record.target_ids);

    let mut extended = accounts.clone();
    extended.push(Account::new("tt-2", PlatformKind::Tiktok));
    let third = h
        .engine
        .submit_publish(content, &extended, None, Some("launch-1"))
        .await
        .unwrap();
    assert_eq!(third.queued.len(), 1);

    let status = h.engine.get_record_status("launch-1").await.unwrap();
    assert_eq!(status.targets.len(), 3);
    assert_eq!(h.engine.queued_len(), 3);
}

#[tokio::test]
async fn test_spent_posting_budget_defers_target() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok);
    let mut config = Config::default_config();
    config
        .rate_limits
        .insert("tiktok".to_string(), RateLimitConfig { posts_per_hour: 1 });
    let h = harness_with(config, &[tiktok.clone()], None, None);
    let mut events = h.engine.subscribe();

    let accounts = [
        Account::new("tt-1", PlatformKind::Tiktok),
        Account::new("tt-2", PlatformKind::Tiktok),
    ];
    let outcome = h
        .engine
        .submit_publish(video_content(), &accounts, None, None)
        .await
        .unwrap();

    h.engine.tick_and_wait().await;
    assert_eq!(tiktok.publish_calls().len(), 1);
    assert_eq!(h.engine.queued_len(), 1);
    assert!(drain_events(&mut events)
        .iter()
        .any(|e| matches!(e, Event::TargetDeferred { .. })));

    let status = h
        .engine
        .get_record_status(&outcome.record.record_id)
        .await
        .unwrap();
    assert!(status
        .targets
        .iter()
        .any(|t| t.state == TargetState::Pending && t.attempt_count == 0));

    h.clock.advance(Duration::hours(1));
    h.engine.tick_and_wait().await;
    assert_eq!(tiktok.publish_calls().len(), 2);

    let status = h
        .engine
        .get_record_status(&outcome.record.record_id)
        .await
        .unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Released);
}

#[tokio::test]
async fn test_retry_target_replaces_failed_target() {
    let youtube = MockUploader::new(PlatformKind::Youtube);
    youtube.push_publish(Err(UploadError::from_status(400, "bad metadata")));
    let h = harness(&[youtube.clone()]);

    let outcome = h
        .engine
        .submit_publish(
            video_content(),
            &[Account::new("yt-1", PlatformKind::Youtube)],
            None,
            None,
        )
        .await
        .unwrap();
    let record_id = outcome.record.record_id.clone();
    let failed_id = outcome.queued[0].clone();

    h.engine.tick_and_wait().await;
    assert_eq!(
        h.engine.get_record_status(&record_id).await.unwrap().aggregate_state,
        AggregateState::Failed
    );

    let retry = h.engine.retry_target(&failed_id).await.unwrap();
    assert_ne!(retry.target_id, failed_id);
    assert_eq!(retry.retry_of.as_deref(), Some(failed_id.as_str()));
    assert_eq!(retry.state, TargetState::Pending);
    assert_eq!(
        h.engine.get_record_status(&record_id).await.unwrap().aggregate_state,
        AggregateState::Publishing
    );

    h.engine.tick_and_wait().await;

    let status = h.engine.get_record_status(&record_id).await.unwrap();
    assert_eq!(status.aggregate_state, AggregateState::Released);
    assert_eq!(status.targets.len(), 1);
    assert_eq!(status.targets[0].target_id, retry.target_id);

    let old = h.engine.get_target(&failed_id).await.unwrap();
    assert_eq!(old.state, TargetState::Failed);
    let old_log = h.engine.attempt_log(&failed_id).await.unwrap();
    assert_eq!(old_log.len(), 1);
    assert_eq!(old_log[0].outcome, AttemptOutcome::Failed);

    let err = h.engine.retry_target(&failed_id).await.unwrap_err();
    assert!(matches!(err, MultipubError::InvalidState(_)));
    let err = h.engine.retry_target(&retry.target_id).await.unwrap_err();
    assert!(matches!(err, MultipubError::InvalidState(_)));
}

#[tokio::test]
async fn test_chunked_upload_sends_chunks_in_order() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_chunking(10, 5);
    tiktok.push_append(Err(UploadError::Transient("connection reset".into())));
    let h = harness(&[tiktok.clone()]);
    let mut events = h.engine.subscribe();

    let media = MediaRef::video("clip.mp4", 23, 1080, 1920, 20.0);
    h.media.insert_generated(&media);

    let outcome = h
        .engine
        .submit_publish(
            ContentItem::new().with_media(media),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&outcome.queued[0]).await.unwrap();
    assert_eq!(target.state, TargetState::Released);
    assert_eq!(target.attempt_count, 1);

    assert_eq!(tiktok.append_indices(), vec![0, 1, 2, 3, 4]);
    assert_eq!(tiktok.append_attempts(), 6);
    let lens: Vec<usize> = tiktok.appends().iter().map(|a| a.len).collect();
    assert_eq!(lens, vec![5, 5, 5, 5, 3]);
    assert_eq!(tiktok.init_calls(), 1);
    assert_eq!(tiktok.finalize_calls(), 1);
    assert!(tiktok.publish_calls().is_empty());

    let chunks: Vec<u32> = drain_events(&mut events)
        .into_iter()
        .filter_map(|e| match e {
            Event::ChunkUploaded { chunk_index, .. } => Some(chunk_index),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn test_oversized_media_without_chunking_fails_permanently() {
    let tiktok = MockUploader::new(PlatformKind::Tiktok).with_single_request_limit(10);
    let h = harness(&[tiktok.clone()]);
    let media = MediaRef::video("clip.mp4", 23, 1080, 1920, 20.0);
    h.media.insert_generated(&media);

    let outcome = h
        .engine
        .submit_publish(
            ContentItem::new().with_media(media),
            &[Account::new("tt-1", PlatformKind::Tiktok)],
            None,
            None,
        )
        .await
        .unwrap();
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&outcome.queued[0]).await.unwrap();
    assert_eq!(target.state, TargetState::Failed);
    assert_eq!(target.error_kind, Some(ErrorKind::Permanent));
    assert!(tiktok.publish_calls().is_empty());
}

#[tokio::test]
async fn test_chunked_image_set_streams_largest_image_only() {
    let xhs = MockUploader::new(PlatformKind::Xiaohongshu).with_chunking(5_000, 4_000);
    let h = harness(&[xhs.clone()]);

    let small = MediaRef::image("a.jpg", 3_000, 1080, 1350);
    let large = MediaRef::image("b.jpg", 9_000, 1080, 1350);
    let medium = MediaRef::image("c.jpg", 4_000, 1080, 1350);
    h.media.insert_generated(&large);
    let content = ContentItem::new()
        .with_title("Album")
        .with_media(small)
        .with_media(large)
        .with_media(medium);

    let outcome = h
        .engine
        .submit_publish(
            content,
            &[Account::new("xhs-1", PlatformKind::Xiaohongshu)],
            None,
            None,
        )
        .await
        .unwrap();
    h.engine.tick_and_wait().await;

    let target = h.engine.get_target(&outcome.queued[0]).await.unwrap();
    assert_eq!(target.state, TargetState::Released);
    assert!(xhs.publish_calls().is_empty());
    assert_eq!(xhs.init_media(), vec!["b.jpg".to_string()]);
    assert_eq!(xhs.append_indices(), vec![0, 1, 2]);
    assert_eq!(
        xhs.finalized_media(),
        vec![vec!["a.jpg".to_string(), "b.jpg".to_string(), "c.jpg".to_string()]]
    );
}
