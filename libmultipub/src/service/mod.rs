//! Service layer for Multipub
//!
//! The publish engine and its parts:
//!
//! - `engine`: `PublishEngine`, the submission and control API plus the scheduler tick
//! - `worker`: execution of one claimed job and resolution of polled targets
//! - `events`: progress event distribution
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::AtomicBool;
//! use libmultipub::platforms::mock::{InMemoryMediaSource, StaticCredentials};
//! use libmultipub::platforms::UploaderRegistry;
//! use libmultipub::service::PublishEngine;
//! use libmultipub::Config;
//!
//! # async fn example() -> libmultipub::Result<()> {
//! let engine = PublishEngine::from_config(
//!     Config::load()?,
//!     UploaderRegistry::new(),
//!     Arc::new(StaticCredentials::new()),
//!     Arc::new(InMemoryMediaSource::new()),
//! )
//! .await?;
//!
//! engine.recover().await?;
//! engine.run(Arc::new(AtomicBool::new(false))).await?;
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod events;
mod worker;

// Re-export commonly used types
pub use engine::{
    CancelOutcome, PublishEngine, PublishEngineBuilder, RecordStatus, RecoveryReport,
    SubmitOutcome, TargetStatus,
};
pub use events::{Event, EventBus, EventReceiver};
