//! Progress events
//!
//! An in-process event bus built on `tokio::sync::broadcast`. Emitting never
//! blocks: with no subscribers the event is dropped, and lagging subscribers lose
//! the oldest events first.
//!
//! ```no_run
//! use libmultipub::service::events::{Event, EventBus};
//!
//! # async fn watch(bus: EventBus) {
//! let mut progress = bus.subscribe();
//! while let Ok(event) = progress.recv().await {
//!     if let Event::RecordUpdated { record_id, aggregate_state } = event {
//!         println!("{} is now {}", record_id, aggregate_state);
//!     }
//! }
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::ErrorKind;
use crate::types::{AggregateState, TargetState};

pub type EventReceiver = broadcast::Receiver<Event>;

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` is the number of events buffered per subscriber
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: Event) {
        // send() only fails when nobody is listening
        let _ = self.sender.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A submission created or extended a record
    RecordSubmitted {
        record_id: String,
        target_ids: Vec<String>,
        rejected_accounts: Vec<String>,
    },

    TargetQueued {
        target_id: String,
        record_id: String,
        platform: String,
        scheduled_at: Option<DateTime<Utc>>,
    },

    /// The platform's posting budget is spent; the job stays queued
    TargetDeferred { target_id: String, platform: String },

    TargetStateChanged {
        target_id: String,
        record_id: String,
        from: TargetState,
        to: TargetState,
        error_kind: Option<ErrorKind>,
    },

    RetryScheduled {
        target_id: String,
        attempt: u32,
        retry_at: DateTime<Utc>,
    },

    ChunkUploaded {
        target_id: String,
        chunk_index: u32,
        total_chunks: u32,
        bytes_sent: u64,
    },

    /// Aggregate state after a target transition
    RecordUpdated {
        record_id: String,
        aggregate_state: AggregateState,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_sees_each_event() {
        let bus = EventBus::new(10);
        let mut engine_view = bus.subscribe();
        let mut ui_view = bus.subscribe();

        let event = Event::RecordUpdated {
            record_id: "r1".to_string(),
            aggregate_state: AggregateState::PartialSuccess,
        };
        bus.emit(event.clone());

        assert_eq!(engine_view.recv().await.unwrap(), event);
        assert_eq!(ui_view.recv().await.unwrap(), event);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_loses_oldest_chunks() {
        let bus = EventBus::new(2);
        let mut slow = bus.subscribe();

        for chunk_index in 0..4 {
            bus.emit(Event::ChunkUploaded {
                target_id: "t1".to_string(),
                chunk_index,
                total_chunks: 4,
                bytes_sent: u64::from(chunk_index + 1) * 5,
            });
        }

        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(2))
        ));
        match slow.recv().await.unwrap() {
            Event::ChunkUploaded { chunk_index, .. } => assert_eq!(chunk_index, 2),
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_no_subscribers() {
        let event_bus = EventBus::new(10);
        // Must not panic or block
        event_bus.emit(Event::RecordSubmitted {
            record_id: "r1".to_string(),
            target_ids: vec![],
            rejected_accounts: vec!["acct".to_string()],
        });
        assert_eq!(event_bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::TargetStateChanged {
            target_id: "t1".to_string(),
            record_id: "r1".to_string(),
            from: TargetState::Publishing,
            to: TargetState::Failed,
            error_kind: Some(ErrorKind::Timeout),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"target_state_changed\""));
        assert!(json.contains("\"to\":\"failed\""));
        assert!(json.contains("\"error_kind\":\"timeout\""));

        let deserialized: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, event);
    }
}
