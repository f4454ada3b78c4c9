//! Persistence contracts consumed by the ingestion pipeline
//!
//! The coordinator only ever talks to these traits. Two implementations ship
//! with the server: [`memory`] (dashmap-backed, used by tests and database-less
//! runs) and [`postgres`] (sqlx).

use async_trait::async_trait;
use revu_common::{FileRecord, SessionStatus};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryFileIndex, MemoryStatusStore};
pub use postgres::{PgFileIndex, PgSessionStatusStore};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Duplicate path '{path}' in session {session_id}")]
    DuplicatePath { session_id: Uuid, path: String },

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Writes the upload status of a session
#[async_trait]
pub trait SessionStatusStore: Send + Sync {
    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), StoreError>;

    async fn get_status(&self, session_id: Uuid) -> Result<Option<SessionStatus>, StoreError>;
}

/// Flat per-session index of extracted files and directories
#[async_trait]
pub trait FileIndexStore: Send + Sync {
    /// Delete every record of a session, returning how many were removed
    async fn delete_all(&self, session_id: Uuid) -> Result<u64, StoreError>;

    /// Insert a batch of records. A batch is all-or-nothing.
    async fn insert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError>;

    /// All records of a session, sorted by path
    async fn list(&self, session_id: Uuid) -> Result<Vec<FileRecord>, StoreError>;

    async fn get(&self, session_id: Uuid, path: &str) -> Result<Option<FileRecord>, StoreError>;
}

/// The pair of stores the pipeline and the HTTP layer share
#[derive(Clone)]
pub struct Stores {
    pub status: Arc<dyn SessionStatusStore>,
    pub index: Arc<dyn FileIndexStore>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            status: Arc::new(MemoryStatusStore::default()),
            index: Arc::new(MemoryFileIndex::default()),
        }
    }

    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            status: Arc::new(PgSessionStatusStore::new(pool.clone())),
            index: Arc::new(PgFileIndex::new(pool)),
        }
    }
}
