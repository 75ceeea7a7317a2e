//! Core types for Multipub

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{ErrorKind, MultipubError, Result};

pub type TargetId = String;
pub type RecordId = String;
pub type AccountId = String;

/// Platforms the engine knows how to validate and route
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlatformKind {
    Bilibili,
    Douyin,
    Kwai,
    Xiaohongshu,
    WechatChannels,
    WechatOfficial,
    Tiktok,
    Youtube,
    Twitter,
    Facebook,
    Instagram,
    Threads,
    Pinterest,
    Linkedin,
}

impl PlatformKind {
    pub const ALL: [PlatformKind; 14] = [
        PlatformKind::Bilibili,
        PlatformKind::Douyin,
        PlatformKind::Kwai,
        PlatformKind::Xiaohongshu,
        PlatformKind::WechatChannels,
        PlatformKind::WechatOfficial,
        PlatformKind::Tiktok,
        PlatformKind::Youtube,
        PlatformKind::Twitter,
        PlatformKind::Facebook,
        PlatformKind::Instagram,
        PlatformKind::Threads,
        PlatformKind::Pinterest,
        PlatformKind::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlatformKind::Bilibili => "bilibili",
            PlatformKind::Douyin => "douyin",
            PlatformKind::Kwai => "kwai",
            PlatformKind::Xiaohongshu => "xiaohongshu",
            PlatformKind::WechatChannels => "wechat_channels",
            PlatformKind::WechatOfficial => "wechat_official",
            PlatformKind::Tiktok => "tiktok",
            PlatformKind::Youtube => "youtube",
            PlatformKind::Twitter => "twitter",
            PlatformKind::Facebook => "facebook",
            PlatformKind::Instagram => "instagram",
            PlatformKind::Threads => "threads",
            PlatformKind::Pinterest => "pinterest",
            PlatformKind::Linkedin => "linkedin",
        }
    }
}

impl FromStr for PlatformKind {
    type Err = MultipubError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase();
        PlatformKind::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == normalized)
            .ok_or_else(|| MultipubError::InvalidInput(format!("Unknown platform: {}", s)))
    }
}

impl std::fmt::Display for PlatformKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
}

/// Reference to one media file attached to a content item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaRef {
    pub id: String,
    pub kind: MediaKind,
    /// Location the media source resolves (URL, object key, path)
    pub uri: String,
    pub size_bytes: u64,
    pub width: u32,
    pub height: u32,
    /// Duration in seconds, videos only
    #[serde(default)]
    pub duration_secs: Option<f64>,
}

impl MediaRef {
    pub fn image(uri: impl Into<String>, size_bytes: u64, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MediaKind::Image,
            uri: uri.into(),
            size_bytes,
            width,
            height,
            duration_secs: None,
        }
    }

    pub fn video(
        uri: impl Into<String>,
        size_bytes: u64,
        width: u32,
        height: u32,
        duration_secs: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: MediaKind::Video,
            uri: uri.into(),
            size_bytes,
            width,
            height,
            duration_secs: Some(duration_secs),
        }
    }
}

/// Immutable payload of one publish submission
///
/// Content is shared between targets as `Arc<ContentItem>` and never edited after
/// validation; a resubmission builds a new item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
    #[serde(default)]
    pub topics: Vec<String>,
    /// Platform-specific fields such as `category` or `board_id`
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

impl ContentItem {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: None,
            description: None,
            media: Vec::new(),
            topics: Vec::new(),
            options: BTreeMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_media(mut self, media: MediaRef) -> Self {
        self.media.push(media);
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topics.push(topic.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn images(&self) -> impl Iterator<Item = &MediaRef> {
        self.media.iter().filter(|m| m.kind == MediaKind::Image)
    }

    pub fn videos(&self) -> impl Iterator<Item = &MediaRef> {
        self.media.iter().filter(|m| m.kind == MediaKind::Video)
    }

    /// The media file that dominates transfer cost
    pub fn largest_media(&self) -> Option<&MediaRef> {
        self.media.iter().max_by_key(|m| m.size_bytes)
    }
}

impl Default for ContentItem {
    fn default() -> Self {
        Self::new()
    }
}

/// A destination account chosen by the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: AccountId,
    pub platform: PlatformKind,
    /// Content category on the platform (`post`, `reel`, `story`, ...)
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Account {
    pub fn new(account_id: impl Into<String>, platform: PlatformKind) -> Self {
        Self {
            account_id: account_id.into(),
            platform,
            sub_category: None,
            display_name: None,
        }
    }

    pub fn with_sub_category(mut self, sub_category: impl Into<String>) -> Self {
        self.sub_category = Some(sub_category.into());
        self
    }
}

/// Lifecycle of a single publish target
///
/// `AwaitingProcessing` is a sub-state of publishing entered when the platform
/// processes uploaded media asynchronously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Pending,
    Publishing,
    AwaitingProcessing,
    Released,
    Failed,
}

impl TargetState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetState::Pending => "pending",
            TargetState::Publishing => "publishing",
            TargetState::AwaitingProcessing => "awaiting_processing",
            TargetState::Released => "released",
            TargetState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TargetState::Pending),
            "publishing" => Some(TargetState::Publishing),
            "awaiting_processing" => Some(TargetState::AwaitingProcessing),
            "released" => Some(TargetState::Released),
            "failed" => Some(TargetState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TargetState::Released | TargetState::Failed)
    }

    /// Whether the state machine permits moving from `self` to `to`
    pub fn can_transition_to(&self, to: TargetState) -> bool {
        use TargetState::*;
        matches!(
            (self, to),
            (Pending, Publishing)
                | (Pending, Failed)
                | (Publishing, Publishing)
                | (Publishing, AwaitingProcessing)
                | (Publishing, Released)
                | (Publishing, Failed)
                | (AwaitingProcessing, Released)
                | (AwaitingProcessing, Failed)
        )
    }
}

impl std::fmt::Display for TargetState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (content, account) publish attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishTarget {
    pub target_id: TargetId,
    pub record_id: RecordId,
    pub account_id: AccountId,
    pub platform: PlatformKind,
    pub sub_category: Option<String>,
    /// `None` means publish as soon as a worker is free
    pub scheduled_at: Option<DateTime<Utc>>,
    pub state: TargetState,
    pub upload_session_id: Option<String>,
    pub external_work_id: Option<String>,
    pub work_url: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    pub attempt_count: u32,
    /// Failed target this one was created to retry
    pub retry_of: Option<TargetId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PublishTarget {
    pub fn new(
        target_id: TargetId,
        record_id: RecordId,
        account: &Account,
        scheduled_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            target_id,
            record_id,
            account_id: account.account_id.clone(),
            platform: account.platform,
            sub_category: account.sub_category.clone(),
            scheduled_at,
            state: TargetState::Pending,
            upload_session_id: None,
            external_work_id: None,
            work_url: None,
            error_kind: None,
            error_message: None,
            attempt_count: 0,
            retry_of: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to a new state, refusing anything that leaves a terminal state
    pub fn transition(&mut self, to: TargetState, now: DateTime<Utc>) -> Result<TargetState> {
        if !self.state.can_transition_to(to) {
            return Err(MultipubError::InvalidTransition {
                target_id: self.target_id.clone(),
                from: self.state.to_string(),
                to: to.to_string(),
            });
        }
        let from = self.state;
        self.state = to;
        self.updated_at = now;
        Ok(from)
    }

    /// Resolve the target as released with the platform's permanent identifier
    pub fn release(
        &mut self,
        work_id: String,
        url: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<TargetState> {
        let from = self.transition(TargetState::Released, now)?;
        self.external_work_id = Some(work_id);
        self.work_url = url;
        self.error_kind = None;
        self.error_message = None;
        Ok(from)
    }

    pub fn fail(
        &mut self,
        kind: ErrorKind,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<TargetState> {
        let from = self.transition(TargetState::Failed, now)?;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        Ok(from)
    }
}

/// Aggregate status of a record, always derived from its targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateState {
    Publishing,
    Released,
    PartialSuccess,
    Failed,
}

impl AggregateState {
    /// Compute the aggregate over the active target states of one record
    ///
    /// A record without targets is `Failed`: nothing will ever be published.
    pub fn from_states<I>(states: I) -> Self
    where
        I: IntoIterator<Item = TargetState>,
    {
        let mut total = 0usize;
        let mut released = 0usize;
        let mut failed = 0usize;
        for state in states {
            total += 1;
            match state {
                TargetState::Released => released += 1,
                TargetState::Failed => failed += 1,
                _ => {}
            }
        }

        if total == 0 || failed == total {
            AggregateState::Failed
        } else if released == total {
            AggregateState::Released
        } else if released + failed == total {
            AggregateState::PartialSuccess
        } else {
            AggregateState::Publishing
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateState::Publishing => "publishing",
            AggregateState::Released => "released",
            AggregateState::PartialSuccess => "partial_success",
            AggregateState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for AggregateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate over the targets created from one content submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRecord {
    pub record_id: RecordId,
    pub content_id: String,
    /// Active targets; a retried target is replaced by its successor
    pub target_ids: Vec<TargetId>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadPhase {
    Init,
    Appending,
    Finalizing,
    AwaitingProcessing,
    Done,
    Failed,
}

impl UploadPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadPhase::Init => "init",
            UploadPhase::Appending => "appending",
            UploadPhase::Finalizing => "finalizing",
            UploadPhase::AwaitingProcessing => "awaiting_processing",
            UploadPhase::Done => "done",
            UploadPhase::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "init" => Some(UploadPhase::Init),
            "appending" => Some(UploadPhase::Appending),
            "finalizing" => Some(UploadPhase::Finalizing),
            "awaiting_processing" => Some(UploadPhase::AwaitingProcessing),
            "done" => Some(UploadPhase::Done),
            "failed" => Some(UploadPhase::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadPhase::Done | UploadPhase::Failed)
    }
}

/// State of one chunked transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadSession {
    pub session_id: String,
    pub target_id: TargetId,
    pub phase: UploadPhase,
    pub total_bytes: u64,
    pub bytes_sent: u64,
    /// Index of the next chunk to send
    pub chunk_index: u32,
    pub chunk_size: u64,
    pub session_token: Option<String>,
    pub poll_token: Option<String>,
}

impl UploadSession {
    pub fn new(target_id: TargetId, total_bytes: u64, chunk_size: u64) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            target_id,
            phase: UploadPhase::Init,
            total_bytes,
            bytes_sent: 0,
            chunk_index: 0,
            chunk_size,
            session_token: None,
            poll_token: None,
        }
    }

    pub fn total_chunks(&self) -> u32 {
        if self.total_bytes == 0 || self.chunk_size == 0 {
            return 0;
        }
        self.total_bytes.div_ceil(self.chunk_size) as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Released,
    AwaitingProcessing,
    Retrying,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::Released => "released",
            AttemptOutcome::AwaitingProcessing => "awaiting_processing",
            AttemptOutcome::Retrying => "retrying",
            AttemptOutcome::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "released" => Some(AttemptOutcome::Released),
            "awaiting_processing" => Some(AttemptOutcome::AwaitingProcessing),
            "retrying" => Some(AttemptOutcome::Retrying),
            "failed" => Some(AttemptOutcome::Failed),
            _ => None,
        }
    }
}

/// Append-only record of one attempt, enough to rebuild `attempt_count`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptLogEntry {
    pub target_id: TargetId,
    pub attempt_number: u32,
    pub outcome: AttemptOutcome,
    pub timestamp: DateTime<Utc>,
    pub error_kind: Option<ErrorKind>,
    pub message: Option<String>,
}
