//! Local filesystem storage for uploaded archives and extracted session trees
//!
//! Layout under the configured roots:
//!
//! ```text
//! <data_dir>/<session_id>/<archive-relative path>   extracted tree
//! <temp_dir>/<upload_id>.archive                    archive awaiting ingestion
//! ```
//!
//! Storage keys recorded in the file index are relative to `data_dir`, so the
//! index stays valid if the data directory is relocated.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::UploadConfig;

#[derive(Debug, Clone)]
pub struct SessionStorage {
    root: PathBuf,
    temp_dir: PathBuf,
}

impl SessionStorage {
    pub fn new(root: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_dir: temp_dir.into(),
        }
    }

    pub fn from_config(config: &UploadConfig) -> Self {
        Self::new(&config.data_dir, &config.temp_dir)
    }

    /// Create the data and temp roots if they do not exist yet
    pub async fn init(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        tokio::fs::create_dir_all(&self.temp_dir).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn session_dir(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string())
    }

    /// Where an uploaded archive is staged before the coordinator consumes it
    pub fn temp_archive_path(&self, upload_id: Uuid) -> PathBuf {
        self.temp_dir.join(format!("{}.archive", upload_id))
    }

    /// Storage key for an entry of a session tree
    pub fn storage_key(session_id: Uuid, relative_path: &str) -> String {
        format!("{}/{}", session_id, relative_path)
    }

    /// Resolve a storage key back to an absolute location under the data root.
    ///
    /// Returns `None` for keys that are absolute or contain `..`, which can only
    /// come from a tampered index row.
    pub fn resolve_key(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key);
        let clean = relative
            .components()
            .all(|c| matches!(c, std::path::Component::Normal(_)));
        if key.is_empty() || !clean {
            return None;
        }
        Some(self.root.join(relative))
    }

    #[instrument(skip(self))]
    pub async fn ensure_dir(&self, path: &Path) -> io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    /// Remove everything inside `path`, keeping the directory itself.
    #[instrument(skip(self))]
    pub async fn empty_dir(&self, path: &Path) -> io::Result<()> {
        let mut entries = match tokio::fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return tokio::fs::create_dir_all(path).await;
            },
            Err(e) => return Err(e),
        };

        let mut removed = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                tokio::fs::remove_dir_all(entry.path()).await?;
            } else {
                tokio::fs::remove_file(entry.path()).await?;
            }
            removed += 1;
        }

        debug!(removed, "Emptied directory");
        Ok(())
    }

    /// Remove a file or directory tree. Missing paths are not an error.
    #[instrument(skip(self))]
    pub async fn remove(&self, path: &Path) -> io::Result<()> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Nothing to remove");
                return Ok(());
            },
            Err(e) => return Err(e),
        };

        if metadata.is_dir() {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_file(path).await
        }
    }

    /// Open a file for writing, creating missing parent directories.
    ///
    /// Blocking; called from the extraction thread.
    pub fn create_file(&self, path: &Path) -> io::Result<std::fs::File> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::File::create(path)
    }

    pub fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(dir: &TempDir) -> SessionStorage {
        SessionStorage::new(dir.path().join("data"), dir.path().join("tmp"))
    }

    #[tokio::test]
    async fn test_empty_dir_keeps_directory() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let session = storage.session_dir(Uuid::new_v4());

        storage.ensure_dir(&session.join("nested/deeper")).await.unwrap();
        std::fs::write(session.join("top.txt"), b"x").unwrap();
        std::fs::write(session.join("nested/inner.txt"), b"y").unwrap();

        storage.empty_dir(&session).await.unwrap();

        assert!(session.is_dir());
        assert_eq!(std::fs::read_dir(&session).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_empty_dir_creates_missing() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let session = storage.session_dir(Uuid::new_v4());

        storage.empty_dir(&session).await.unwrap();
        assert!(session.is_dir());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let file = dir.path().join("archive.zip");
        std::fs::write(&file, b"PK").unwrap();

        storage.remove(&file).await.unwrap();
        assert!(!file.exists());
        storage.remove(&file).await.unwrap();
    }

    #[test]
    fn test_create_file_makes_parents() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let target = dir.path().join("data/a/b/c.txt");

        let mut file = storage.create_file(&target).unwrap();
        std::io::Write::write_all(&mut file, b"hello").unwrap();

        assert_eq!(std::fs::read_to_string(target).unwrap(), "hello");
    }

    #[test]
    fn test_resolve_key() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let id = Uuid::new_v4();
        let key = SessionStorage::storage_key(id, "src/main.rs");

        assert_eq!(
            storage.resolve_key(&key).unwrap(),
            storage.root().join(id.to_string()).join("src/main.rs")
        );
        assert!(storage.resolve_key("../etc/passwd").is_none());
        assert!(storage.resolve_key("/etc/passwd").is_none());
        assert!(storage.resolve_key("").is_none());
    }
}
