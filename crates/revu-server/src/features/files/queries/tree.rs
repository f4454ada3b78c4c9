use crate::store::{FileIndexStore, StoreError};
use revu_common::FileRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileTreeQuery {
    pub session_id: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum FileTreeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Flat list of the session's index, sorted by path so clients can fold it into a tree
#[tracing::instrument(skip(index))]
pub async fn handle(
    index: &dyn FileIndexStore,
    query: FileTreeQuery,
) -> Result<Vec<FileRecord>, FileTreeError> {
    Ok(index.list(query.session_id).await?)
}
