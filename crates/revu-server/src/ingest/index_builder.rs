//! Batched replacement of a session's file index
//!
//! The builder wipes the session's index when it starts, buffers records and
//! writes them in fixed-size batches. If a write fails the caller drops the
//! builder and calls [`abort_session`], which removes everything written so far
//! so the session never keeps a partial index.

use revu_common::FileRecord;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::store::{FileIndexStore, StoreError};

#[derive(Debug, Error)]
#[error("Failed to persist file index for session {session_id}: {source}")]
pub struct IndexPersistError {
    pub session_id: Uuid,
    #[source]
    pub source: StoreError,
}

pub struct IndexBuilder {
    store: Arc<dyn FileIndexStore>,
    session_id: Uuid,
    batch_size: usize,
    buffer: Vec<FileRecord>,
    written: u64,
}

impl IndexBuilder {
    /// Start a replacement by deleting the session's existing records.
    #[instrument(skip(store))]
    pub async fn begin(
        store: Arc<dyn FileIndexStore>,
        session_id: Uuid,
        batch_size: usize,
    ) -> Result<Self, IndexPersistError> {
        let removed = store
            .delete_all(session_id)
            .await
            .map_err(|source| IndexPersistError { session_id, source })?;
        debug!(removed, "Cleared previous file index");

        let batch_size = batch_size.max(1);
        Ok(Self {
            store,
            session_id,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            written: 0,
        })
    }

    /// Queue a record, writing a batch once the buffer is full.
    pub async fn push(&mut self, record: FileRecord) -> Result<(), IndexPersistError> {
        self.buffer.push(record);
        if self.buffer.len() >= self.batch_size {
            self.flush().await?;
        }
        Ok(())
    }

    /// Write any buffered records and return how many records were written in total.
    pub async fn finish(mut self) -> Result<u64, IndexPersistError> {
        self.flush().await?;
        info!(session_id = %self.session_id, records = self.written, "File index written");
        Ok(self.written)
    }

    async fn flush(&mut self) -> Result<(), IndexPersistError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        self.store
            .insert_batch(&self.buffer)
            .await
            .map_err(|source| IndexPersistError {
                session_id: self.session_id,
                source,
            })?;

        self.written += self.buffer.len() as u64;
        debug!(batch = self.buffer.len(), total = self.written, "Flushed index batch");
        self.buffer.clear();
        Ok(())
    }
}

/// Delete a session's whole index after a failed build.
pub async fn abort_session(
    store: &dyn FileIndexStore,
    session_id: Uuid,
) -> Result<(), IndexPersistError> {
    store
        .delete_all(session_id)
        .await
        .map(|_| ())
        .map_err(|source| IndexPersistError { session_id, source })
}
