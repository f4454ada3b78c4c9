use crate::ingest::extractor::{self, ExtractionError};
use crate::ingest::{StartUploadError, UploadCoordinator, UploadJob};
use axum::body::Bytes;
use futures::{Stream, StreamExt};
use revu_common::checksum::StreamingChecksum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartUploadCommand {
    pub session_id: Uuid,
    pub upload_id: Uuid,
    pub archive_path: PathBuf,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartUploadResponse {
    pub upload_id: Uuid,
    pub message: String,
    pub checksum: String,
    pub size: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadArchiveError {
    #[error("No file uploaded")]
    FileRequired,
    #[error("Uploaded file is empty")]
    ContentRequired,
    #[error("Failed to read multipart data: {0}")]
    Multipart(String),
    #[error("Archive exceeds the maximum upload size of {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("Uploaded file is not a supported archive (zip, tar, tar.gz)")]
    NotAnArchive,
    #[error("Session {session_id} already has an upload in progress")]
    SessionBusy { session_id: Uuid },
    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<StartUploadError> for UploadArchiveError {
    fn from(err: StartUploadError) -> Self {
        match err {
            StartUploadError::SessionBusy { session_id } => Self::SessionBusy { session_id },
        }
    }
}

/// Bytes and digest of an archive written to the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArchive {
    pub checksum: String,
    pub size: u64,
}

/// Stream an uploaded archive to `path` without holding it in memory.
///
/// The partial file is removed when the upload fails or exceeds `max_bytes`.
#[tracing::instrument(skip(stream))]
pub async fn stage_archive<S, E>(
    stream: S,
    path: &Path,
    max_bytes: u64,
) -> Result<StagedArchive, UploadArchiveError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let result = write_stream(stream, path, max_bytes).await;
    if result.is_err() {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, "Failed to remove partial upload");
            }
        }
    }
    result
}

async fn write_stream<S, E>(
    stream: S,
    path: &Path,
    max_bytes: u64,
) -> Result<StagedArchive, UploadArchiveError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(path).await?;
    let mut checksum = StreamingChecksum::new();

    futures::pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| UploadArchiveError::Multipart(e.to_string()))?;
        checksum.update(&chunk);
        if checksum.size() > max_bytes {
            return Err(UploadArchiveError::TooLarge { limit: max_bytes });
        }
        file.write_all(&chunk).await?;
    }
    file.flush().await?;

    let (checksum, size) = checksum.finish();
    if size == 0 {
        return Err(UploadArchiveError::ContentRequired);
    }

    Ok(StagedArchive { checksum, size })
}

/// Check the staged file is an archive and hand it to the coordinator.
///
/// On rejection the staged file is removed; once accepted it belongs to the job.
#[tracing::instrument(skip(coordinator, command), fields(session_id = %command.session_id, upload_id = %command.upload_id))]
pub async fn handle(
    coordinator: Arc<UploadCoordinator>,
    command: StartUploadCommand,
) -> Result<StartUploadResponse, UploadArchiveError> {
    let result = accept(&coordinator, &command).await;
    if result.is_err() {
        if let Err(e) = coordinator.storage().remove(&command.archive_path).await {
            tracing::warn!(error = %e, "Failed to remove rejected upload");
        }
    }
    result
}

async fn accept(
    coordinator: &Arc<UploadCoordinator>,
    command: &StartUploadCommand,
) -> Result<StartUploadResponse, UploadArchiveError> {
    let archive_path = command.archive_path.clone();
    let detected = tokio::task::spawn_blocking(move || extractor::probe_archive(&archive_path))
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    match detected {
        Ok(format) => tracing::debug!(?format, "Archive format accepted"),
        Err(ExtractionError::Open { source, .. }) => return Err(source.into()),
        Err(_) => return Err(UploadArchiveError::NotAnArchive),
    }

    let job = UploadJob {
        job_id: command.upload_id,
        session_id: command.session_id,
        archive_path: command.archive_path.clone(),
    };
    // Detached: the job reports through the broadcaster, not this handle
    drop(coordinator.start(job)?);

    Ok(StartUploadResponse {
        upload_id: command.upload_id,
        message: "File accepted. Processing started.".to_string(),
        checksum: command.checksum.clone(),
        size: command.size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn chunks(parts: &[&'static [u8]]) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
        stream::iter(parts.iter().map(|p| Ok(Bytes::from_static(p))).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn test_stage_archive_writes_and_hashes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tmp/upload.archive");

        let staged = stage_archive(chunks(&[b"hello", b" world"]), &path, 1024)
            .await
            .unwrap();

        assert_eq!(staged.size, 11);
        assert_eq!(
            staged.checksum,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_stage_archive_enforces_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upload.archive");

        let err = stage_archive(chunks(&[b"12345", b"67890"]), &path, 8)
            .await
            .unwrap_err();

        assert!(matches!(err, UploadArchiveError::TooLarge { limit: 8 }));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_stage_archive_rejects_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("upload.archive");

        let err = stage_archive(chunks(&[]), &path, 8).await.unwrap_err();

        assert!(matches!(err, UploadArchiveError::ContentRequired));
        assert!(!path.exists());
    }
}
