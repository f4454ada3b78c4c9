use crate::storage::SessionStorage;
use crate::store::{FileIndexStore, StoreError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Largest file served inline (10 MiB)
pub const MAX_INLINE_FILE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentQuery {
    pub session_id: Uuid,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
    pub language: String,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum FileContentError {
    #[error("File path is required")]
    PathRequired,
    #[error("File not found or is a directory")]
    NotFound,
    #[error("File too large to view directly")]
    TooLarge,
    #[error("Could not read file content (binary or corrupted)")]
    Unreadable,
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl FileContentQuery {
    pub fn validate(&self) -> Result<&str, FileContentError> {
        match self.path.as_deref().map(str::trim) {
            Some(path) if !path.is_empty() => Ok(path),
            _ => Err(FileContentError::PathRequired),
        }
    }
}

#[tracing::instrument(skip(index, storage))]
pub async fn handle(
    index: &dyn FileIndexStore,
    storage: &SessionStorage,
    query: FileContentQuery,
) -> Result<FileContentResponse, FileContentError> {
    let path = query.validate()?;

    let record = index
        .get(query.session_id, path)
        .await?
        .filter(|r| !r.is_directory)
        .ok_or(FileContentError::NotFound)?;

    if record.size > MAX_INLINE_FILE_BYTES {
        return Err(FileContentError::TooLarge);
    }

    let location = storage
        .resolve_key(&record.storage_key)
        .ok_or(FileContentError::NotFound)?;

    let bytes = match tokio::fs::read(&location).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %record.path, "Indexed file missing on disk");
            return Err(FileContentError::NotFound);
        },
        Err(e) => return Err(e.into()),
    };
    let content = String::from_utf8(bytes).map_err(|_| FileContentError::Unreadable)?;

    Ok(FileContentResponse {
        path: record.path,
        content,
        language: record.language,
        size: record.size,
    })
}
