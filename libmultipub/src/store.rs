//! Persistence interface for records, targets, upload sessions and the attempt log

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::error::{MultipubError, Result};
use crate::types::{
    AttemptLogEntry, ContentItem, PublishRecord, PublishTarget, TargetId, UploadSession,
};

#[async_trait]
pub trait PublishStore: Send + Sync {
    /// Store a new record together with the content it publishes
    async fn insert_record(&self, record: &PublishRecord, content: &ContentItem) -> Result<()>;

    /// Replace the active target list of a record
    async fn update_record_targets(&self, record_id: &str, target_ids: &[TargetId]) -> Result<()>;

    async fn get_record(&self, record_id: &str) -> Result<Option<PublishRecord>>;

    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>>;

    async fn insert_target(&self, target: &PublishTarget) -> Result<()>;

    async fn update_target(&self, target: &PublishTarget) -> Result<()>;

    async fn get_target(&self, target_id: &str) -> Result<Option<PublishTarget>>;

    /// Every target created for a record, retried ones included, oldest first
    async fn list_record_targets(&self, record_id: &str) -> Result<Vec<PublishTarget>>;

    /// Targets not yet Released or Failed
    async fn list_unfinished_targets(&self) -> Result<Vec<PublishTarget>>;

    async fn save_session(&self, session: &UploadSession) -> Result<()>;

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>>;

    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn append_attempt(&self, entry: &AttemptLogEntry) -> Result<()>;

    /// Attempts for a target in attempt order
    async fn list_attempts(&self, target_id: &str) -> Result<Vec<AttemptLogEntry>>;
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<String, PublishRecord>,
    contents: HashMap<String, ContentItem>,
    targets: HashMap<String, PublishTarget>,
    sessions: HashMap<String, UploadSession>,
    attempts: HashMap<String, Vec<AttemptLogEntry>>,
}

/// Process-local store; the engine's default
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PublishStore for MemoryStore {
    async fn insert_record(&self, record: &PublishRecord, content: &ContentItem) -> Result<()> {
        let mut state = self.state();
        if state.records.contains_key(&record.record_id) {
            return Err(MultipubError::InvalidState(format!(
                "Record {} already exists",
                record.record_id
            )));
        }
        state
            .contents
            .entry(content.id.clone())
            .or_insert_with(|| content.clone());
        state.records.insert(record.record_id.clone(), record.clone());
        Ok(())
    }

    async fn update_record_targets(&self, record_id: &str, target_ids: &[TargetId]) -> Result<()> {
        let mut state = self.state();
        let record = state
            .records
            .get_mut(record_id)
            .ok_or_else(|| MultipubError::NotFound(format!("record {}", record_id)))?;
        record.target_ids = target_ids.to_vec();
        Ok(())
    }

    async fn get_record(&self, record_id: &str) -> Result<Option<PublishRecord>> {
        Ok(self.state().records.get(record_id).cloned())
    }

    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        Ok(self.state().contents.get(content_id).cloned())
    }

    async fn insert_target(&self, target: &PublishTarget) -> Result<()> {
        let mut state = self.state();
        if state.targets.contains_key(&target.target_id) {
            return Err(MultipubError::InvalidState(format!(
                "Target {} already exists",
                target.target_id
            )));
        }
        state
            .targets
            .insert(target.target_id.clone(), target.clone());
        Ok(())
    }

    async fn update_target(&self, target: &PublishTarget) -> Result<()> {
        let mut state = self.state();
        match state.targets.get_mut(&target.target_id) {
            Some(existing) => {
                *existing = target.clone();
                Ok(())
            }
            None => Err(MultipubError::NotFound(format!(
                "target {}",
                target.target_id
            ))),
        }
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<PublishTarget>> {
        Ok(self.state().targets.get(target_id).cloned())
    }

    async fn list_record_targets(&self, record_id: &str) -> Result<Vec<PublishTarget>> {
        let mut targets: Vec<PublishTarget> = self
            .state()
            .targets
            .values()
            .filter(|t| t.record_id == record_id)
            .cloned()
            .collect();
        targets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.target_id.cmp(&b.target_id))
        });
        Ok(targets)
    }

    async fn list_unfinished_targets(&self) -> Result<Vec<PublishTarget>> {
        let mut targets: Vec<PublishTarget> = self
            .state()
            .targets
            .values()
            .filter(|t| !t.state.is_terminal())
            .cloned()
            .collect();
        targets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(targets)
    }

    async fn save_session(&self, session: &UploadSession) -> Result<()> {
        self.state()
            .sessions
            .insert(session.session_id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>> {
        Ok(self.state().sessions.get(session_id).cloned())
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        self.state().sessions.remove(session_id);
        Ok(())
    }

    async fn append_attempt(&self, entry: &AttemptLogEntry) -> Result<()> {
        self.state()
            .attempts
            .entry(entry.target_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn list_attempts(&self, target_id: &str) -> Result<Vec<AttemptLogEntry>> {
        let mut attempts = self
            .state()
            .attempts
            .get(target_id)
            .cloned()
            .unwrap_or_default();
        attempts.sort_by_key(|a| a.attempt_number);
        Ok(attempts)
    }
}
