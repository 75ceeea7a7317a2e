//! Scriptable fakes for the platform collaborators
//!
//! `MockUploader` plays back queued outcomes for each call and records what the
//! engine asked of it, so tests can assert on retry counts and chunk ordering
//! without network access. Clones share their recorded state.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;

use super::{
    AccountCredentialProvider, ChunkUploader, Credential, CredentialError, MediaSource,
    PollStatus, PublishContext, PublishOutcome, UploadMeta, Uploader,
};
use crate::error::UploadError;
use crate::types::{MediaRef, PlatformKind};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

/// One append call as observed by the mock
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCall {
    pub target_id: String,
    pub session_token: String,
    pub chunk_index: u32,
    pub len: usize,
}

#[derive(Default)]
struct MockState {
    publish_outcomes: VecDeque<Result<PublishOutcome, UploadError>>,
    init_outcomes: VecDeque<Result<String, UploadError>>,
    append_outcomes: VecDeque<Result<(), UploadError>>,
    finalize_outcomes: VecDeque<Result<PublishOutcome, UploadError>>,
    poll_outcomes: VecDeque<Result<PollStatus, UploadError>>,
    publish_calls: Vec<String>,
    init_calls: usize,
    init_media: Vec<String>,
    append_attempts: usize,
    appends: Vec<AppendCall>,
    finalize_calls: usize,
    finalized_media: Vec<Vec<String>>,
    poll_calls: usize,
    work_counter: usize,
}

/// Configurable fake uploader
#[derive(Clone)]
pub struct MockUploader {
    platform: PlatformKind,
    single_request_limit: u64,
    max_chunk_size: Option<u64>,
    default_poll: PollStatus,
    delay: Duration,
    append_gate: Option<Arc<Semaphore>>,
    state: Arc<Mutex<MockState>>,
}

impl MockUploader {
    /// Uploader whose simple publish always succeeds
    pub fn new(platform: PlatformKind) -> Self {
        Self {
            platform,
            single_request_limit: u64::MAX,
            max_chunk_size: None,
            default_poll: PollStatus::Processing,
            delay: Duration::ZERO,
            append_gate: None,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Enable the chunked protocol for media above `single_request_limit`
    pub fn with_chunking(mut self, single_request_limit: u64, max_chunk_size: u64) -> Self {
        self.single_request_limit = single_request_limit;
        self.max_chunk_size = Some(max_chunk_size);
        self
    }

    /// Media above this size needs chunking; without chunk support the target fails
    pub fn with_single_request_limit(mut self, limit: u64) -> Self {
        self.single_request_limit = limit;
        self
    }

    /// Status returned once the scripted poll outcomes run out
    pub fn with_default_poll(mut self, status: PollStatus) -> Self {
        self.default_poll = status;
        self
    }

    /// Simulated latency for every call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Each append waits for a permit from `gate` before it runs
    pub fn with_append_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.append_gate = Some(gate);
        self
    }

    pub fn push_publish(&self, outcome: Result<PublishOutcome, UploadError>) -> &Self {
        lock(&self.state).publish_outcomes.push_back(outcome);
        self
    }

    pub fn push_init(&self, outcome: Result<String, UploadError>) -> &Self {
        lock(&self.state).init_outcomes.push_back(outcome);
        self
    }

    pub fn push_append(&self, outcome: Result<(), UploadError>) -> &Self {
        lock(&self.state).append_outcomes.push_back(outcome);
        self
    }

    pub fn push_finalize(&self, outcome: Result<PublishOutcome, UploadError>) -> &Self {
        lock(&self.state).finalize_outcomes.push_back(outcome);
        self
    }

    pub fn push_poll(&self, outcome: Result<PollStatus, UploadError>) -> &Self {
        lock(&self.state).poll_outcomes.push_back(outcome);
        self
    }

    /// Target ids passed to `publish_simple`, in call order
    pub fn publish_calls(&self) -> Vec<String> {
        lock(&self.state).publish_calls.clone()
    }

    pub fn init_calls(&self) -> usize {
        lock(&self.state).init_calls
    }

    /// Append calls that started, including ones still waiting on the gate
    pub fn append_attempts(&self) -> usize {
        lock(&self.state).append_attempts
    }

    /// Successful append calls
    pub fn appends(&self) -> Vec<AppendCall> {
        lock(&self.state).appends.clone()
    }

    pub fn append_indices(&self) -> Vec<u32> {
        lock(&self.state).appends.iter().map(|a| a.chunk_index).collect()
    }

    /// Media URI each chunked session was opened for
    pub fn init_media(&self) -> Vec<String> {
        lock(&self.state).init_media.clone()
    }

    /// Media URIs of the content each finalize call could see
    pub fn finalized_media(&self) -> Vec<Vec<String>> {
        lock(&self.state).finalized_media.clone()
    }

    pub fn finalize_calls(&self) -> usize {
        lock(&self.state).finalize_calls
    }

    pub fn poll_calls(&self) -> usize {
        lock(&self.state).poll_calls
    }

    fn next_work(&self) -> PublishOutcome {
        let mut state = lock(&self.state);
        state.work_counter += 1;
        let work_id = format!("{}-work-{}", self.platform, state.work_counter);
        PublishOutcome::Published {
            url: Some(format!("https://{}.example/{}", self.platform, work_id)),
            work_id,
        }
    }

    async fn simulate_latency(&self) {
        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl Uploader for MockUploader {
    fn platform(&self) -> PlatformKind {
        self.platform
    }

    fn single_request_limit(&self) -> u64 {
        self.single_request_limit
    }

    async fn publish_simple(&self, ctx: &PublishContext) -> Result<PublishOutcome, UploadError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.publish_calls.push(ctx.target_id.clone());
            state.publish_outcomes.pop_front()
        };
        self.simulate_latency().await;
        scripted.unwrap_or_else(|| Ok(self.next_work()))
    }

    fn chunked(&self) -> Option<&dyn ChunkUploader> {
        self.max_chunk_size.map(|_| self as &dyn ChunkUploader)
    }

    async fn poll_status(
        &self,
        _ctx: &PublishContext,
        _poll_token: &str,
    ) -> Result<PollStatus, UploadError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.poll_calls += 1;
            state.poll_outcomes.pop_front()
        };
        self.simulate_latency().await;
        scripted.unwrap_or_else(|| Ok(self.default_poll.clone()))
    }
}

#[async_trait]
impl ChunkUploader for MockUploader {
    fn max_chunk_size(&self) -> u64 {
        self.max_chunk_size.unwrap_or(0)
    }

    async fn init(&self, ctx: &PublishContext, meta: &UploadMeta) -> Result<String, UploadError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.init_calls += 1;
            state.init_media.push(meta.media.uri.clone());
            state.init_outcomes.pop_front()
        };
        self.simulate_latency().await;
        scripted.unwrap_or_else(|| Ok(format!("session-{}", ctx.target_id)))
    }

    async fn append(
        &self,
        ctx: &PublishContext,
        session_token: &str,
        chunk_index: u32,
        bytes: &[u8],
    ) -> Result<(), UploadError> {
        lock(&self.state).append_attempts += 1;
        if let Some(gate) = &self.append_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        self.simulate_latency().await;

        let mut state = lock(&self.state);
        let outcome = state.append_outcomes.pop_front().unwrap_or(Ok(()));
        if outcome.is_ok() {
            state.appends.push(AppendCall {
                target_id: ctx.target_id.clone(),
                session_token: session_token.to_string(),
                chunk_index,
                len: bytes.len(),
            });
        }
        outcome
    }

    async fn finalize(
        &self,
        ctx: &PublishContext,
        _session_token: &str,
    ) -> Result<PublishOutcome, UploadError> {
        let scripted = {
            let mut state = lock(&self.state);
            state.finalize_calls += 1;
            let media = ctx.content.media.iter().map(|m| m.uri.clone()).collect();
            state.finalized_media.push(media);
            state.finalize_outcomes.pop_front()
        };
        self.simulate_latency().await;
        scripted.unwrap_or_else(|| Ok(self.next_work()))
    }
}

/// Media source serving bytes from memory, keyed by media URI
#[derive(Clone, Default)]
pub struct InMemoryMediaSource {
    files: Arc<Mutex<HashMap<String, Arc<Vec<u8>>>>>,
}

impl InMemoryMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, uri: impl Into<String>, bytes: Vec<u8>) {
        lock(&self.files).insert(uri.into(), Arc::new(bytes));
    }

    /// Register a file of `media.size_bytes` patterned bytes
    pub fn insert_generated(&self, media: &MediaRef) {
        let bytes = (0..media.size_bytes).map(|i| (i % 251) as u8).collect();
        self.insert(media.uri.clone(), bytes);
    }
}

#[async_trait]
impl MediaSource for InMemoryMediaSource {
    async fn read_range(
        &self,
        media: &MediaRef,
        offset: u64,
        len: u64,
    ) -> Result<Vec<u8>, UploadError> {
        let file = lock(&self.files)
            .get(&media.uri)
            .cloned()
            .ok_or_else(|| UploadError::Permanent(format!("Media not found: {}", media.uri)))?;

        let start = usize::try_from(offset).unwrap_or(usize::MAX);
        if start > file.len() {
            return Err(UploadError::Permanent(format!(
                "Offset {} beyond end of {}",
                offset, media.uri
            )));
        }
        let end = start.saturating_add(usize::try_from(len).unwrap_or(usize::MAX));
        Ok(file[start..end.min(file.len())].to_vec())
    }
}

/// Credential provider backed by a fixed set of accounts
#[derive(Clone, Default)]
pub struct StaticCredentials {
    allow_all: bool,
    accounts: Arc<Mutex<HashMap<String, String>>>,
    revoked: Arc<Mutex<HashSet<String>>>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve any account that has not been revoked
    pub fn allow_all() -> Self {
        Self {
            allow_all: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, account_id: impl Into<String>, token: impl Into<String>) {
        lock(&self.accounts).insert(account_id.into(), token.into());
    }

    /// Make `resolve` fail for the account as if its refresh token expired
    pub fn revoke(&self, account_id: impl Into<String>) {
        lock(&self.revoked).insert(account_id.into());
    }
}

#[async_trait]
impl AccountCredentialProvider for StaticCredentials {
    async fn resolve(
        &self,
        account_id: &str,
        _platform: PlatformKind,
    ) -> Result<Credential, CredentialError> {
        if lock(&self.revoked).contains(account_id) {
            return Err(CredentialError::Expired(account_id.to_string()));
        }
        if let Some(token) = lock(&self.accounts).get(account_id) {
            return Ok(Credential::new(account_id, token.clone()));
        }
        if self.allow_all {
            return Ok(Credential::new(account_id, format!("token-{}", account_id)));
        }
        Err(CredentialError::NotFound(account_id.to_string()))
    }
}
