//! Multipub - publish orchestration for many accounts across many platforms
//!
//! This library validates content against per-platform constraint tables, fans
//! one content item out into per-account publish targets, and drives those
//! targets through a queue, chunked uploads and status polling to a final
//! Released or Failed state.

pub mod backoff;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod fanout;
pub mod logging;
pub mod platforms;
pub mod poller;
pub mod queue;
pub mod rate_limiter;
pub mod service;
pub mod store;
pub mod types;
pub mod upload;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{ErrorKind, MultipubError, Result, UploadError};
pub use service::{PublishEngine, RecordStatus, SubmitOutcome};
pub use store::{MemoryStore, PublishStore};
pub use types::{
    Account, AggregateState, ContentItem, MediaKind, MediaRef, PlatformKind, PublishRecord,
    PublishTarget, TargetState,
};
pub use validation::{ConstraintTable, ValidationError, ValidationWarning};
