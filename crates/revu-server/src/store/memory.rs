//! In-memory stores backed by `DashMap`

use async_trait::async_trait;
use dashmap::DashMap;
use revu_common::{FileRecord, SessionStatus};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{FileIndexStore, SessionStatusStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStatusStore {
    statuses: DashMap<Uuid, SessionStatus>,
}

#[async_trait]
impl SessionStatusStore for MemoryStatusStore {
    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        self.statuses.insert(session_id, status);
        Ok(())
    }

    async fn get_status(&self, session_id: Uuid) -> Result<Option<SessionStatus>, StoreError> {
        Ok(self.statuses.get(&session_id).map(|s| *s))
    }
}

/// Records keyed by session, then by path. The `BTreeMap` keeps `list` sorted.
#[derive(Debug, Default)]
pub struct MemoryFileIndex {
    sessions: DashMap<Uuid, BTreeMap<String, FileRecord>>,
}

impl MemoryFileIndex {
    pub fn count(&self, session_id: Uuid) -> usize {
        self.sessions.get(&session_id).map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl FileIndexStore for MemoryFileIndex {
    async fn delete_all(&self, session_id: Uuid) -> Result<u64, StoreError> {
        Ok(self
            .sessions
            .remove(&session_id)
            .map(|(_, records)| records.len() as u64)
            .unwrap_or(0))
    }

    async fn insert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        // Validate the whole batch first so a conflict leaves nothing behind,
        // matching a single multi-row INSERT.
        let mut staged: BTreeMap<(Uuid, &str), &FileRecord> = BTreeMap::new();
        for record in records {
            let key = (record.session_id, record.path.as_str());
            let exists = self
                .sessions
                .get(&record.session_id)
                .is_some_and(|s| s.contains_key(&record.path));
            if exists || staged.insert(key, record).is_some() {
                return Err(StoreError::DuplicatePath {
                    session_id: record.session_id,
                    path: record.path.clone(),
                });
            }
        }

        for ((session_id, path), record) in staged {
            self.sessions
                .entry(session_id)
                .or_default()
                .insert(path.to_string(), record.clone());
        }
        Ok(())
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<FileRecord>, StoreError> {
        Ok(self
            .sessions
            .get(&session_id)
            .map(|s| s.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, session_id: Uuid, path: &str) -> Result<Option<FileRecord>, StoreError> {
        Ok(self
            .sessions
            .get(&session_id)
            .and_then(|s| s.get(path).cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(session_id: Uuid, path: &str) -> FileRecord {
        FileRecord::file(session_id, path, 1, format!("{}/{}", session_id, path))
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let store = MemoryStatusStore::default();
        let id = Uuid::new_v4();

        assert_eq!(store.get_status(id).await.unwrap(), None);
        store.set_status(id, SessionStatus::Uploading).await.unwrap();
        store.set_status(id, SessionStatus::Ready).await.unwrap();
        assert_eq!(store.get_status(id).await.unwrap(), Some(SessionStatus::Ready));
    }

    #[tokio::test]
    async fn test_list_is_sorted_and_scoped() {
        let index = MemoryFileIndex::default();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        index
            .insert_batch(&[file(a, "z.txt"), file(a, "a/b.txt"), file(b, "other.txt")])
            .await
            .unwrap();

        let paths: Vec<_> = index.list(a).await.unwrap().into_iter().map(|r| r.path).collect();
        assert_eq!(paths, vec!["a/b.txt", "z.txt"]);
        assert_eq!(index.count(b), 1);
    }

    #[tokio::test]
    async fn test_duplicate_batch_is_rejected_whole() {
        let index = MemoryFileIndex::default();
        let id = Uuid::new_v4();

        index.insert_batch(&[file(id, "a.txt")]).await.unwrap();
        let err = index
            .insert_batch(&[file(id, "b.txt"), file(id, "a.txt")])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::DuplicatePath { .. }));
        assert_eq!(index.count(id), 1);
        assert!(index.get(id, "b.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_all_returns_count() {
        let index = MemoryFileIndex::default();
        let id = Uuid::new_v4();

        index.insert_batch(&[file(id, "a"), file(id, "b")]).await.unwrap();
        assert_eq!(index.delete_all(id).await.unwrap(), 2);
        assert_eq!(index.delete_all(id).await.unwrap(), 0);
        assert!(index.list(id).await.unwrap().is_empty());
    }
}
