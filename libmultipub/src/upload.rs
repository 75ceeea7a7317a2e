//! Chunked Init/Append/Finalize upload driver
//!
//! Chunks go out strictly in index order, one at a time. A failed chunk is retried
//! on its own while the error is retryable; anything else aborts the session.
//! Progress is persisted after every phase change and every chunk so an
//! interrupted session can resume from the next unsent chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::error::{Result, UploadError};
use crate::platforms::{ChunkUploader, MediaSource, PublishContext, PublishOutcome, UploadMeta};
use crate::service::events::{Event, EventBus};
use crate::store::PublishStore;
use crate::types::{MediaRef, UploadPhase, UploadSession};

/// How a chunked upload ended
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    Published {
        work_id: String,
        url: Option<String>,
    },
    /// Finalize handed back a poll token; the session stays persisted
    AwaitProcessing {
        poll_token: String,
        session: UploadSession,
    },
    Cancelled,
    Failed(UploadError),
}

pub struct ChunkedUpload<'a> {
    uploader: &'a dyn ChunkUploader,
    media_source: &'a dyn MediaSource,
    store: &'a dyn PublishStore,
    events: &'a EventBus,
    cancel: &'a AtomicBool,
    chunk_retry_limit: u32,
}

impl<'a> ChunkedUpload<'a> {
    pub fn new(
        uploader: &'a dyn ChunkUploader,
        media_source: &'a dyn MediaSource,
        store: &'a dyn PublishStore,
        events: &'a EventBus,
        cancel: &'a AtomicBool,
        chunk_retry_limit: u32,
    ) -> Self {
        Self {
            uploader,
            media_source,
            store,
            events,
            cancel,
            chunk_retry_limit,
        }
    }

    /// A fresh session for `media` sized by the uploader's chunk limit
    pub fn new_session(&self, target_id: &str, media: &MediaRef) -> UploadSession {
        UploadSession::new(
            target_id.to_string(),
            media.size_bytes,
            self.uploader.max_chunk_size(),
        )
    }

    /// Drive `session` to a terminal outcome
    ///
    /// A session already in `Appending` with a session token resumes at its
    /// `chunk_index`; any other session starts with `init`. `Err` is reserved for
    /// persistence failures.
    pub async fn run(
        &self,
        ctx: &PublishContext,
        media: &MediaRef,
        mut session: UploadSession,
    ) -> Result<UploadOutcome> {
        if session.chunk_size == 0 {
            return self
                .abort(
                    &mut session,
                    UploadError::Permanent("Uploader declared a zero chunk size".to_string()),
                )
                .await;
        }

        let resumable = session.phase == UploadPhase::Appending && session.session_token.is_some();
        let token = match (resumable, session.session_token.clone()) {
            (true, Some(token)) => {
                info!(
                    "Resuming upload for {} at chunk {}/{}",
                    ctx.target_id,
                    session.chunk_index,
                    session.total_chunks()
                );
                token
            }
            _ => {
                if self.cancel.load(Ordering::SeqCst) {
                    return self.cancelled(&mut session).await;
                }
                session.phase = UploadPhase::Init;
                session.chunk_index = 0;
                session.bytes_sent = 0;
                self.store.save_session(&session).await?;

                let meta = UploadMeta {
                    media: media.clone(),
                    total_bytes: session.total_bytes,
                    chunk_size: session.chunk_size,
                    total_chunks: session.total_chunks(),
                };
                match self.uploader.init(ctx, &meta).await {
                    Ok(token) => token,
                    Err(e) => return self.abort(&mut session, e).await,
                }
            }
        };

        session.session_token = Some(token.clone());
        session.phase = UploadPhase::Appending;
        self.store.save_session(&session).await?;

        let total_chunks = session.total_chunks();
        while session.chunk_index < total_chunks {
            if self.cancel.load(Ordering::SeqCst) {
                return self.cancelled(&mut session).await;
            }

            let offset = u64::from(session.chunk_index) * session.chunk_size;
            let len = session.chunk_size.min(session.total_bytes - offset);
            let bytes = match self.media_source.read_range(media, offset, len).await {
                Ok(bytes) if bytes.len() as u64 == len => bytes,
                Ok(bytes) => {
                    let error = UploadError::Permanent(format!(
                        "Media source returned {} bytes for a {} byte chunk",
                        bytes.len(),
                        len
                    ));
                    return self.abort(&mut session, error).await;
                }
                Err(e) => return self.abort(&mut session, e).await,
            };

            if let Err(e) = self.send_chunk(ctx, &token, session.chunk_index, &bytes).await {
                return self.abort(&mut session, e).await;
            }

            session.bytes_sent += len;
            session.chunk_index += 1;
            self.store.save_session(&session).await?;

            debug!(
                "Uploaded chunk {}/{} for {} ({} bytes)",
                session.chunk_index, total_chunks, ctx.target_id, session.bytes_sent
            );
            self.events.emit(Event::ChunkUploaded {
                target_id: ctx.target_id.clone(),
                chunk_index: session.chunk_index - 1,
                total_chunks,
                bytes_sent: session.bytes_sent,
            });
        }

        // A cancel during the last append must still stop short of finalize
        if self.cancel.load(Ordering::SeqCst) {
            return self.cancelled(&mut session).await;
        }

        session.phase = UploadPhase::Finalizing;
        self.store.save_session(&session).await?;

        match self.uploader.finalize(ctx, &token).await {
            Ok(PublishOutcome::Published { work_id, url }) => {
                session.phase = UploadPhase::Done;
                self.store.delete_session(&session.session_id).await?;
                Ok(UploadOutcome::Published { work_id, url })
            }
            Ok(PublishOutcome::AwaitProcessing { poll_token }) => {
                session.phase = UploadPhase::AwaitingProcessing;
                session.poll_token = Some(poll_token.clone());
                self.store.save_session(&session).await?;
                Ok(UploadOutcome::AwaitProcessing {
                    poll_token,
                    session,
                })
            }
            Err(e) => self.abort(&mut session, e).await,
        }
    }

    /// One chunk with its own retry budget
    async fn send_chunk(
        &self,
        ctx: &PublishContext,
        token: &str,
        chunk_index: u32,
        bytes: &[u8],
    ) -> std::result::Result<(), UploadError> {
        let mut retries = 0;
        loop {
            match self.uploader.append(ctx, token, chunk_index, bytes).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && retries < self.chunk_retry_limit => {
                    retries += 1;
                    warn!(
                        "Chunk {} for {} failed (retry {}/{}): {}",
                        chunk_index, ctx.target_id, retries, self.chunk_retry_limit, e
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn abort(
        &self,
        session: &mut UploadSession,
        error: UploadError,
    ) -> Result<UploadOutcome> {
        warn!(
            "Upload session {} for {} aborted: {}",
            session.session_id, session.target_id, error
        );
        session.phase = UploadPhase::Failed;
        self.store.delete_session(&session.session_id).await?;
        Ok(UploadOutcome::Failed(error))
    }

    async fn cancelled(&self, session: &mut UploadSession) -> Result<UploadOutcome> {
        info!(
            "Upload for {} cancelled after {} chunks",
            session.target_id, session.chunk_index
        );
        session.phase = UploadPhase::Failed;
        self.store.delete_session(&session.session_id).await?;
        Ok(UploadOutcome::Cancelled)
    }
}
