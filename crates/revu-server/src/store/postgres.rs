//! PostgreSQL stores
//!
//! Uses runtime-checked queries so the crate builds without a live database.
//! Schema lives in `migrations/`.

use async_trait::async_trait;
use revu_common::{FileRecord, SessionStatus};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{FileIndexStore, SessionStatusStore, StoreError};

#[derive(Clone)]
pub struct PgSessionStatusStore {
    pool: PgPool,
}

impl PgSessionStatusStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStatusStore for PgSessionStatusStore {
    #[instrument(skip(self))]
    async fn set_status(&self, session_id: Uuid, status: SessionStatus) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO session_upload_status (session_id, status, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (session_id)
            DO UPDATE SET status = EXCLUDED.status, updated_at = NOW()
            "#,
        )
        .bind(session_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_status(&self, session_id: Uuid) -> Result<Option<SessionStatus>, StoreError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM session_upload_status WHERE session_id = $1")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some(s) => s
                .parse::<SessionStatus>()
                .map(Some)
                .map_err(|e| StoreError::InvalidData(e.to_string())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct FileEntryRow {
    session_id: Uuid,
    path: String,
    name: String,
    is_directory: bool,
    size: i64,
    language: String,
    storage_key: String,
}

impl From<FileEntryRow> for FileRecord {
    fn from(row: FileEntryRow) -> Self {
        FileRecord {
            session_id: row.session_id,
            path: row.path,
            name: row.name,
            is_directory: row.is_directory,
            size: u64::try_from(row.size).unwrap_or(0),
            language: row.language,
            storage_key: row.storage_key,
        }
    }
}

#[derive(Clone)]
pub struct PgFileIndex {
    pool: PgPool,
}

impl PgFileIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FileIndexStore for PgFileIndex {
    #[instrument(skip(self))]
    async fn delete_all(&self, session_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM file_entries WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, records), fields(count = records.len()))]
    async fn insert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO file_entries \
             (session_id, path, name, is_directory, size, language, storage_key) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.session_id)
                .push_bind(&record.path)
                .push_bind(&record.name)
                .push_bind(record.is_directory)
                .push_bind(i64::try_from(record.size).unwrap_or(i64::MAX))
                .push_bind(&record.language)
                .push_bind(&record.storage_key);
        });

        let result = builder.build().execute(&self.pool).await;
        match result {
            Ok(done) => {
                debug!(rows = done.rows_affected(), "Inserted file index batch");
                Ok(())
            },
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(StoreError::DuplicatePath {
                    session_id: records[0].session_id,
                    path: db.message().to_string(),
                })
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query_as::<_, FileEntryRow>(
            r#"
            SELECT session_id, path, name, is_directory, size, language, storage_key
            FROM file_entries
            WHERE session_id = $1
            ORDER BY path COLLATE "C"
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn get(&self, session_id: Uuid, path: &str) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query_as::<_, FileEntryRow>(
            r#"
            SELECT session_id, path, name, is_directory, size, language, storage_key
            FROM file_entries
            WHERE session_id = $1 AND path = $2
            "#,
        )
        .bind(session_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(FileRecord::from))
    }
}
