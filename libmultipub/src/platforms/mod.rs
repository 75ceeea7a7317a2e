//! Collaborator interfaces for platform uploads
//!
//! The engine never talks to a platform API directly. Each platform kind is served
//! by an [`Uploader`] registered in an [`UploaderRegistry`], which is built at
//! startup and handed to the engine explicitly. Media bytes come from a
//! [`MediaSource`] and access tokens from an [`AccountCredentialProvider`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use libmultipub::platforms::{mock::MockUploader, UploaderRegistry};
//! use libmultipub::types::PlatformKind;
//!
//! let mut registry = UploaderRegistry::new();
//! registry.register(Arc::new(MockUploader::new(PlatformKind::Tiktok)));
//! assert!(registry.get(PlatformKind::Tiktok).is_some());
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::error::UploadError;
use crate::types::{AccountId, ContentItem, MediaRef, PlatformKind, TargetId};

// Mock uploaders are available for all builds (not just tests) to support integration tests
pub mod mock;

/// Everything an uploader needs to act for one target
#[derive(Clone)]
pub struct PublishContext {
    pub target_id: TargetId,
    pub account_id: AccountId,
    pub platform: PlatformKind,
    pub sub_category: Option<String>,
    pub content: Arc<ContentItem>,
    pub credential: Arc<Credential>,
}

impl std::fmt::Debug for PublishContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishContext")
            .field("target_id", &self.target_id)
            .field("account_id", &self.account_id)
            .field("platform", &self.platform)
            .field("sub_category", &self.sub_category)
            .finish_non_exhaustive()
    }
}

/// Result of a publish request or a chunked-upload finalize
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The platform assigned a permanent identifier
    Published { work_id: String, url: Option<String> },
    /// The platform is still processing; query with the poll token
    AwaitProcessing { poll_token: String },
}

/// Platform-reported processing state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Processing,
    Succeeded { work_id: String, url: Option<String> },
    Failed { reason: String },
}

/// Metadata handed to [`ChunkUploader::init`]
#[derive(Debug, Clone, PartialEq)]
pub struct UploadMeta {
    pub media: MediaRef,
    pub total_bytes: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
}

/// A platform publishing capability
#[async_trait]
pub trait Uploader: Send + Sync {
    fn platform(&self) -> PlatformKind;

    /// Largest media (in bytes) the platform accepts in one request
    fn single_request_limit(&self) -> u64;

    /// Publish in a single request
    async fn publish_simple(&self, ctx: &PublishContext) -> Result<PublishOutcome, UploadError>;

    /// The chunked Init/Append/Finalize protocol, when the platform supports it
    fn chunked(&self) -> Option<&dyn ChunkUploader>;

    async fn poll_status(
        &self,
        ctx: &PublishContext,
        poll_token: &str,
    ) -> Result<PollStatus, UploadError>;
}

/// Init/Append/Finalize upload protocol
///
/// A session streams exactly one media item: the largest in `ctx.content`, which
/// is the one over [`Uploader::single_request_limit`]. The rest of the content
/// (other media, title, description, options) never goes through the session;
/// implementations attach it themselves, normally in `finalize`, from `ctx`.
///
/// Appends for one session are always issued one at a time in increasing
/// `chunk_index` order starting at zero.
#[async_trait]
pub trait ChunkUploader: Send + Sync {
    fn max_chunk_size(&self) -> u64;

    /// Open a session; returns the platform's session token
    async fn init(&self, ctx: &PublishContext, meta: &UploadMeta) -> Result<String, UploadError>;

    async fn append(
        &self,
        ctx: &PublishContext,
        session_token: &str,
        chunk_index: u32,
        bytes: &[u8],
    ) -> Result<(), UploadError>;

    async fn finalize(
        &self,
        ctx: &PublishContext,
        session_token: &str,
    ) -> Result<PublishOutcome, UploadError>;
}

/// Byte-range access to media files
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn read_range(
        &self,
        media: &MediaRef,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, UploadError>;
}

/// A live access credential for one account
pub struct Credential {
    pub account_id: AccountId,
    pub access_token: SecretString,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(account_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            access_token: SecretString::from(access_token.into()),
            expires_at: None,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("account_id", &self.account_id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("No credentials for account {0}")]
    NotFound(String),

    #[error("Credentials for account {0} expired and could not be refreshed")]
    Expired(String),

    #[error("Credential provider unavailable: {0}")]
    Unavailable(String),
}

/// Resolves accounts to live credentials, refreshing them when needed
///
/// The engine treats every failure as `AuthExpired`; re-authentication happens
/// outside the engine.
#[async_trait]
pub trait AccountCredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        account_id: &str,
        platform: PlatformKind,
    ) -> Result<Credential, CredentialError>;
}

/// Capability table from platform kind to uploader
#[derive(Clone, Default)]
pub struct UploaderRegistry {
    uploaders: HashMap<PlatformKind, Arc<dyn Uploader>>,
}

impl UploaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an uploader under the platform it reports; replaces any previous one
    pub fn register(&mut self, uploader: Arc<dyn Uploader>) -> &mut Self {
        self.uploaders.insert(uploader.platform(), uploader);
        self
    }

    pub fn with(mut self, uploader: Arc<dyn Uploader>) -> Self {
        self.register(uploader);
        self
    }

    pub fn get(&self, platform: PlatformKind) -> Option<Arc<dyn Uploader>> {
        self.uploaders.get(&platform).cloned()
    }

    pub fn platforms(&self) -> impl Iterator<Item = PlatformKind> + '_ {
        self.uploaders.keys().copied()
    }
}
