//! SQLite-backed publish store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePool, SqliteRow};
use sqlx::Row;
use std::path::Path;

use crate::error::{DbError, ErrorKind, MultipubError, Result};
use crate::store::PublishStore;
use crate::types::{
    AttemptLogEntry, AttemptOutcome, ContentItem, PublishRecord, PublishTarget, TargetId,
    TargetState, UploadPhase, UploadSession,
};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and run migrations
    pub async fn new(db_path: &str) -> Result<Self> {
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(DbError::IoError)?;
        }

        // Forward slashes work on every platform; mode=rwc creates the file
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(table: &'static str, ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| corrupt(table, format!("bad timestamp {}", ms)))
}

fn corrupt(table: &'static str, reason: impl Into<String>) -> MultipubError {
    DbError::CorruptRow {
        table,
        reason: reason.into(),
    }
    .into()
}

fn target_from_row(r: &SqliteRow) -> Result<PublishTarget> {
    const TABLE: &str = "publish_targets";

    let state: String = r.get("state");
    let platform: String = r.get("platform");
    let error_kind: Option<String> = r.get("error_kind");
    let scheduled_at: Option<i64> = r.get("scheduled_at");

    Ok(PublishTarget {
        target_id: r.get("target_id"),
        record_id: r.get("record_id"),
        account_id: r.get("account_id"),
        platform: platform
            .parse()
            .map_err(|_| corrupt(TABLE, format!("unknown platform {}", platform)))?,
        sub_category: r.get("sub_category"),
        scheduled_at: scheduled_at.map(|ms| from_millis(TABLE, ms)).transpose()?,
        state: TargetState::parse(&state)
            .ok_or_else(|| corrupt(TABLE, format!("unknown state {}", state)))?,
        upload_session_id: r.get("upload_session_id"),
        external_work_id: r.get("external_work_id"),
        work_url: r.get("work_url"),
        error_kind: error_kind
            .map(|k| {
                ErrorKind::parse(&k)
                    .ok_or_else(|| corrupt(TABLE, format!("unknown error kind {}", k)))
            })
            .transpose()?,
        error_message: r.get("error_message"),
        attempt_count: r.get::<i64, _>("attempt_count") as u32,
        retry_of: r.get("retry_of"),
        created_at: from_millis(TABLE, r.get("created_at"))?,
        updated_at: from_millis(TABLE, r.get("updated_at"))?,
    })
}

const TARGET_COLUMNS: &str = "target_id, record_id, account_id, platform, sub_category, \
     scheduled_at, state, upload_session_id, external_work_id, work_url, error_kind, \
     error_message, attempt_count, retry_of, created_at, updated_at";

#[async_trait]
impl PublishStore for Database {
    async fn insert_record(&self, record: &PublishRecord, content: &ContentItem) -> Result<()> {
        let body = serde_json::to_string(content)
            .map_err(|e| MultipubError::InvalidInput(format!("Unserializable content: {}", e)))?;
        let target_ids = serde_json::to_string(&record.target_ids)
            .map_err(|e| MultipubError::InvalidInput(format!("Unserializable target ids: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT OR IGNORE INTO content_items (id, body) VALUES (?, ?)
            "#,
        )
        .bind(&content.id)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        sqlx::query(
            r#"
            INSERT INTO publish_records (record_id, content_id, target_ids, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&record.record_id)
        .bind(&record.content_id)
        .bind(&target_ids)
        .bind(to_millis(record.created_at))
        .execute(&mut *tx)
        .await
        .map_err(DbError::SqlxError)?;

        tx.commit().await.map_err(DbError::SqlxError)?;
        Ok(())
    }

    async fn update_record_targets(&self, record_id: &str, target_ids: &[TargetId]) -> Result<()> {
        let encoded = serde_json::to_string(target_ids)
            .map_err(|e| MultipubError::InvalidInput(format!("Unserializable target ids: {}", e)))?;

        let result = sqlx::query(
            r#"
            UPDATE publish_records SET target_ids = ? WHERE record_id = ?
            "#,
        )
        .bind(&encoded)
        .bind(record_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(MultipubError::NotFound(format!("record {}", record_id)));
        }
        Ok(())
    }

    async fn get_record(&self, record_id: &str) -> Result<Option<PublishRecord>> {
        let row = sqlx::query(
            r#"
            SELECT record_id, content_id, target_ids, created_at
            FROM publish_records WHERE record_id = ?
            "#,
        )
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| -> Result<PublishRecord> {
            let encoded: String = r.get("target_ids");
            let target_ids = serde_json::from_str(&encoded)
                .map_err(|e| corrupt("publish_records", e.to_string()))?;
            Ok(PublishRecord {
                record_id: r.get("record_id"),
                content_id: r.get("content_id"),
                target_ids,
                created_at: from_millis("publish_records", r.get("created_at"))?,
            })
        })
        .transpose()
    }

    async fn get_content(&self, content_id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query(
            r#"
            SELECT body FROM content_items WHERE id = ?
            "#,
        )
        .bind(content_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| {
            let body: String = r.get("body");
            serde_json::from_str(&body).map_err(|e| corrupt("content_items", e.to_string()))
        })
        .transpose()
    }

    async fn insert_target(&self, target: &PublishTarget) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO publish_targets ({}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TARGET_COLUMNS
        ))
        .bind(&target.target_id)
        .bind(&target.record_id)
        .bind(&target.account_id)
        .bind(target.platform.as_str())
        .bind(&target.sub_category)
        .bind(target.scheduled_at.map(to_millis))
        .bind(target.state.as_str())
        .bind(&target.upload_session_id)
        .bind(&target.external_work_id)
        .bind(&target.work_url)
        .bind(target.error_kind.map(|k| k.as_str()))
        .bind(&target.error_message)
        .bind(i64::from(target.attempt_count))
        .bind(&target.retry_of)
        .bind(to_millis(target.created_at))
        .bind(to_millis(target.updated_at))
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn update_target(&self, target: &PublishTarget) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE publish_targets SET
                scheduled_at = ?, state = ?, upload_session_id = ?, external_work_id = ?,
                work_url = ?, error_kind = ?, error_message = ?, attempt_count = ?,
                updated_at = ?
            WHERE target_id = ?
            "#,
        )
        .bind(target.scheduled_at.map(to_millis))
        .bind(target.state.as_str())
        .bind(&target.upload_session_id)
        .bind(&target.external_work_id)
        .bind(&target.work_url)
        .bind(target.error_kind.map(|k| k.as_str()))
        .bind(&target.error_message)
        .bind(i64::from(target.attempt_count))
        .bind(to_millis(target.updated_at))
        .bind(&target.target_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        if result.rows_affected() == 0 {
            return Err(MultipubError::NotFound(format!(
                "target {}",
                target.target_id
            )));
        }
        Ok(())
    }

    async fn get_target(&self, target_id: &str) -> Result<Option<PublishTarget>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM publish_targets WHERE target_id = ?",
            TARGET_COLUMNS
        ))
        .bind(target_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.as_ref().map(target_from_row).transpose()
    }

    async fn list_record_targets(&self, record_id: &str) -> Result<Vec<PublishTarget>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM publish_targets WHERE record_id = ? \
             ORDER BY created_at ASC, target_id ASC",
            TARGET_COLUMNS
        ))
        .bind(record_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(target_from_row).collect()
    }

    async fn list_unfinished_targets(&self) -> Result<Vec<PublishTarget>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM publish_targets \
             WHERE state NOT IN ('released', 'failed') \
             ORDER BY created_at ASC",
            TARGET_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter().map(target_from_row).collect()
    }

    async fn save_session(&self, session: &UploadSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upload_sessions (
                session_id, target_id, phase, total_bytes, bytes_sent,
                chunk_index, chunk_size, session_token, poll_token
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                phase = excluded.phase,
                bytes_sent = excluded.bytes_sent,
                chunk_index = excluded.chunk_index,
                session_token = excluded.session_token,
                poll_token = excluded.poll_token
            "#,
        )
        .bind(&session.session_id)
        .bind(&session.target_id)
        .bind(session.phase.as_str())
        .bind(session.total_bytes as i64)
        .bind(session.bytes_sent as i64)
        .bind(i64::from(session.chunk_index))
        .bind(session.chunk_size as i64)
        .bind(&session.session_token)
        .bind(&session.poll_token)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<UploadSession>> {
        let row = sqlx::query(
            r#"
            SELECT session_id, target_id, phase, total_bytes, bytes_sent,
                   chunk_index, chunk_size, session_token, poll_token
            FROM upload_sessions WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        row.map(|r| -> Result<UploadSession> {
            let phase: String = r.get("phase");
            Ok(UploadSession {
                session_id: r.get("session_id"),
                target_id: r.get("target_id"),
                phase: UploadPhase::parse(&phase)
                    .ok_or_else(|| corrupt("upload_sessions", format!("unknown phase {}", phase)))?,
                total_bytes: r.get::<i64, _>("total_bytes") as u64,
                bytes_sent: r.get::<i64, _>("bytes_sent") as u64,
                chunk_index: r.get::<i64, _>("chunk_index") as u32,
                chunk_size: r.get::<i64, _>("chunk_size") as u64,
                session_token: r.get("session_token"),
                poll_token: r.get("poll_token"),
            })
        })
        .transpose()
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM upload_sessions WHERE session_id = ?
            "#,
        )
        .bind(session_id)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn append_attempt(&self, entry: &AttemptLogEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO attempt_log (target_id, attempt_number, outcome, timestamp, error_kind, message)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.target_id)
        .bind(i64::from(entry.attempt_number))
        .bind(entry.outcome.as_str())
        .bind(to_millis(entry.timestamp))
        .bind(entry.error_kind.map(|k| k.as_str()))
        .bind(&entry.message)
        .execute(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        Ok(())
    }

    async fn list_attempts(&self, target_id: &str) -> Result<Vec<AttemptLogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT target_id, attempt_number, outcome, timestamp, error_kind, message
            FROM attempt_log WHERE target_id = ?
            ORDER BY attempt_number ASC, id ASC
            "#,
        )
        .bind(target_id)
        .fetch_all(&self.pool)
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| -> Result<AttemptLogEntry> {
                let outcome: String = r.get("outcome");
                let error_kind: Option<String> = r.get("error_kind");
                Ok(AttemptLogEntry {
                    target_id: r.get("target_id"),
                    attempt_number: r.get::<i64, _>("attempt_number") as u32,
                    outcome: AttemptOutcome::parse(&outcome)
                        .ok_or_else(|| {
                            corrupt("attempt_log", format!("unknown outcome {}", outcome))
                        })?,
                    timestamp: from_millis("attempt_log", r.get("timestamp"))?,
                    error_kind: error_kind.as_deref().and_then(ErrorKind::parse),
                    message: r.get("message"),
                })
            })
            .collect()
    }
}
