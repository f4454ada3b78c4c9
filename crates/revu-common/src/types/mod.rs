//! Common types used across Revu

use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

use crate::error::CommonError;

// ============================================================================
// File Index Types
// ============================================================================

/// One entry in a session's persisted file index.
///
/// `path` is archive-relative, `/`-separated, and never carries a leading or
/// trailing slash. Within one session `path` is unique.
///
/// # Examples
///
/// ```rust
/// use revu_common::types::FileRecord;
/// use uuid::Uuid;
///
/// let record = FileRecord::file(Uuid::new_v4(), "src/main.rs", 120, "s/src/main.rs");
/// assert_eq!(record.name, "main.rs");
/// assert_eq!(record.language, "rs");
/// assert!(!record.is_directory);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Session that owns this record
    pub session_id: Uuid,

    /// Archive-relative path, e.g. `src/components/Button.jsx`
    pub path: String,

    /// Last path segment, e.g. `Button.jsx`
    pub name: String,

    /// Whether this record describes a directory
    pub is_directory: bool,

    /// Uncompressed size in bytes (always 0 for directories)
    pub size: u64,

    /// Language tag derived from the file extension, empty if none
    pub language: String,

    /// Location under the data directory, `{session_id}/{path}`
    pub storage_key: String,
}

impl FileRecord {
    /// Build a record for a regular file
    pub fn file(
        session_id: Uuid,
        path: impl Into<String>,
        size: u64,
        storage_key: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            session_id,
            name: file_name(&path).to_string(),
            language: language_for(&path),
            path,
            is_directory: false,
            size,
            storage_key: storage_key.into(),
        }
    }

    /// Build a record for a directory
    pub fn directory(
        session_id: Uuid,
        path: impl Into<String>,
        storage_key: impl Into<String>,
    ) -> Self {
        let path = path.into();
        Self {
            session_id,
            name: file_name(&path).to_string(),
            language: String::new(),
            path,
            is_directory: true,
            size: 0,
            storage_key: storage_key.into(),
        }
    }
}

/// Last `/`-separated segment of an archive-relative path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Language tag from the extension of the last path segment.
///
/// Dotfiles such as `.gitignore` have no extension and yield an empty tag.
pub fn language_for(path: &str) -> String {
    Path::new(file_name(path))
        .extension()
        .map(|ext| ext.to_string_lossy().into_owned())
        .unwrap_or_default()
}

// ============================================================================
// Session Status
// ============================================================================

/// Status values the ingestion pipeline writes to the session store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Uploading,
    Ready,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Uploading => "uploading",
            SessionStatus::Ready => "ready",
            SessionStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = CommonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(SessionStatus::Uploading),
            "ready" => Ok(SessionStatus::Ready),
            "error" => Ok(SessionStatus::Error),
            other => Err(CommonError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Progress Events
// ============================================================================

/// Kind of a progress event; doubles as the SSE event name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressKind {
    Progress,
    Done,
    Error,
}

impl ProgressKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressKind::Progress => "progress",
            ProgressKind::Done => "done",
            ProgressKind::Error => "error",
        }
    }
}

/// Body of a progress event as sent to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<u8>,
}

/// Transient progress message for one ingestion job. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub kind: ProgressKind,
    pub payload: ProgressPayload,
}

impl ProgressEvent {
    pub fn progress(message: impl Into<String>, percent: u8) -> Self {
        Self {
            kind: ProgressKind::Progress,
            payload: ProgressPayload {
                message: message.into(),
                percent: Some(percent.min(100)),
            },
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Done,
            payload: ProgressPayload {
                message: message.into(),
                percent: Some(100),
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: ProgressKind::Error,
            payload: ProgressPayload {
                message: message.into(),
                percent: None,
            },
        }
    }

    /// `done` and `error` end a job's event stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, ProgressKind::Done | ProgressKind::Error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_derives_name_and_language() {
        let session = Uuid::new_v4();
        let record = FileRecord::file(session, "a/b/Button.jsx", 42, "/tmp/a/b/Button.jsx");
        assert_eq!(record.name, "Button.jsx");
        assert_eq!(record.language, "jsx");
        assert_eq!(record.size, 42);

        let dir = FileRecord::directory(session, "a/b", "/tmp/a/b");
        assert_eq!(dir.name, "b");
        assert!(dir.is_directory);
        assert_eq!(dir.size, 0);
        assert!(dir.language.is_empty());
    }

    #[test]
    fn test_language_edge_cases() {
        assert_eq!(language_for(".gitignore"), "");
        assert_eq!(language_for("Makefile"), "");
        assert_eq!(language_for("dist/app.tar.gz"), "gz");
        assert_eq!(language_for("top.level/README"), "");
    }

    #[test]
    fn test_session_status_round_trip_str() {
        for status in [SessionStatus::Uploading, SessionStatus::Ready, SessionStatus::Error] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("created".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_progress_event_payload_shape() {
        let event = ProgressEvent::progress("Processing a.txt", 150);
        assert_eq!(event.payload.percent, Some(100));
        assert!(!event.is_terminal());

        let json = serde_json::to_value(&ProgressEvent::error("boom").payload).unwrap();
        assert_eq!(json, serde_json::json!({ "message": "boom" }));

        assert!(ProgressEvent::done("ok").is_terminal());
    }
}
