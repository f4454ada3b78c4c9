//! Job-level types shared by the ingestion pipeline

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

use super::extractor::{ExtractionError, ExtractionLimits};
use super::index_builder::IndexPersistError;
use crate::config::UploadConfig;
use crate::store::StoreError;

/// One ingestion run
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// Routing key for progress events
    pub job_id: Uuid,
    pub session_id: Uuid,
    /// Archive owned by the job until it is consumed
    pub archive_path: PathBuf,
}

/// Upload job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Extracting,
    Indexing,
    Ready,
    Error,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Extracting => "extracting",
            JobStatus::Indexing => "indexing",
            JobStatus::Ready => "ready",
            JobStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Ready | JobStatus::Error)
    }

    /// Transitions only move forward; `error` is reachable from any live state.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match next {
            JobStatus::Queued => false,
            JobStatus::Extracting => *self == JobStatus::Queued,
            JobStatus::Indexing => *self == JobStatus::Extracting,
            JobStatus::Ready => *self == JobStatus::Indexing,
            JobStatus::Error => !self.is_terminal(),
        }
    }
}

/// Snapshot of the job currently holding a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ActiveJob {
    pub job_id: Uuid,
    pub status: JobStatus,
}

/// Pipeline settings derived from [`UploadConfig`]
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub limits: ExtractionLimits,
    pub progress_interval: u64,
    pub insert_batch_size: usize,
    pub cleanup_on_error: bool,
}

impl From<&UploadConfig> for IngestSettings {
    fn from(config: &UploadConfig) -> Self {
        Self {
            limits: ExtractionLimits {
                max_entries: config.max_entries,
                max_total_bytes: config.max_total_bytes,
            },
            progress_interval: config.progress_interval.max(1),
            insert_batch_size: config.insert_batch_size,
            cleanup_on_error: config.cleanup_on_error,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartUploadError {
    #[error("Session {session_id} already has an upload in progress")]
    SessionBusy { session_id: Uuid },
}

/// Anything that sends a job to `error`
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    IndexPersist(#[from] IndexPersistError),

    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Failed to update session status: {0}")]
    StatusStore(#[source] StoreError),

    #[error("Extraction task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl IngestError {
    /// Message sent to subscribers in the terminal `error` event
    pub fn user_message(&self) -> String {
        match self {
            IngestError::Extraction(ExtractionError::UnsupportedFormat) => {
                "Upload failed: the file is not a supported archive (zip, tar, tar.gz)".to_string()
            },
            IngestError::Extraction(ExtractionError::TooManyEntries { limit }) => {
                format!("Upload failed: archive has more than {} entries", limit)
            },
            IngestError::Extraction(ExtractionError::TooLarge { limit }) => {
                format!("Upload failed: archive expands to more than {} bytes", limit)
            },
            IngestError::Extraction(e) => format!("Upload failed: {}", e),
            IngestError::IndexPersist(_) => {
                "Upload failed: the file index could not be saved".to_string()
            },
            IngestError::Filesystem(_) => {
                "Upload failed: the extracted files could not be written".to_string()
            },
            IngestError::StatusStore(_) => {
                "Upload failed: the session status could not be updated".to_string()
            },
            IngestError::Task(_) => "Upload failed unexpectedly".to_string(),
        }
    }
}
