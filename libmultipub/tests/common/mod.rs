//! Shared setup for engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Duration;
use libmultipub::clock::ManualClock;
use libmultipub::platforms::mock::{InMemoryMediaSource, MockUploader, StaticCredentials};
use libmultipub::platforms::UploaderRegistry;
use libmultipub::service::{Event, EventReceiver, RecordStatus};
use libmultipub::{AggregateState, Config, ContentItem, MediaRef, PublishEngine, PublishStore};

pub struct Harness {
    pub engine: PublishEngine,
    pub clock: Arc<ManualClock>,
    pub media: InMemoryMediaSource,
    pub credentials: StaticCredentials,
}

pub fn harness(uploaders: &[MockUploader]) -> Harness {
    harness_with(Config::default_config(), uploaders, None, None)
}

pub fn harness_with(
    config: Config,
    uploaders: &[MockUploader],
    store: Option<Arc<dyn PublishStore>>,
    clock: Option<Arc<ManualClock>>,
) -> Harness {
    let mut registry = UploaderRegistry::new();
    for uploader in uploaders {
        registry.register(Arc::new(uploader.clone()));
    }

    let clock = clock.unwrap_or_default();
    let media = InMemoryMediaSource::new();
    let credentials = StaticCredentials::allow_all();

    let mut builder = PublishEngine::builder(
        config,
        registry,
        Arc::new(credentials.clone()),
        Arc::new(media.clone()),
    )
    .clock(clock.clone())
    .rng_seed(42);
    if let Some(store) = store {
        builder = builder.store(store);
    }

    Harness {
        engine: builder.build().unwrap(),
        clock,
        media,
        credentials,
    }
}

impl Harness {
    /// Tick, advancing the clock between ticks, until the record settles
    pub async fn settle(&self, record_id: &str, step: Duration, max_ticks: usize) -> RecordStatus {
        for _ in 0..max_ticks {
            self.engine.tick_and_wait().await;
            let status = self.engine.get_record_status(record_id).await.unwrap();
            if status.aggregate_state != AggregateState::Publishing {
                return status;
            }
            self.clock.advance(step);
        }
        panic!("Record {} did not settle within {} ticks", record_id, max_ticks);
    }
}

/// A short vertical video every platform in the built-in table accepts
pub fn video_content() -> ContentItem {
    ContentItem::new()
        .with_title("Clip")
        .with_description("A short clip")
        .with_media(MediaRef::video("clip.mp4", 2_000_000, 1080, 1920, 20.0))
}

/// Every event currently buffered in `receiver`
pub fn drain_events(receiver: &mut EventReceiver) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = receiver.try_recv() {
        events.push(event);
    }
    events
}
