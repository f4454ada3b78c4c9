//! Shared fixtures for Revu server integration tests
//!
//! Everything runs against the in-memory stores and a temporary data
//! directory, so no external services are needed.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::Router;
use flate2::{write::GzEncoder, Compression};
use revu_common::{FileRecord, ProgressEvent};
use revu_server::{
    api::{self, AppState},
    config::CorsConfig,
    features::FeatureState,
    ingest::{ExtractionLimits, IngestSettings, ProgressBroadcaster, UploadCoordinator, UploadJob},
    storage::SessionStorage,
    store::{FileIndexStore, MemoryFileIndex, MemoryStatusStore, StoreError, Stores},
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use uuid::Uuid;
use zip::write::SimpleFileOptions;

pub const BOUNDARY: &str = "revu-test-boundary";

/// An archive member: a file with contents, or a directory when `None`
pub type Member<'a> = (&'a str, Option<&'a str>);

pub fn zip_bytes(members: &[Member<'_>]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in members {
        match data {
            Some(text) => {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(text.as_bytes()).unwrap();
            },
            None => zip.add_directory(*name, SimpleFileOptions::default()).unwrap(),
        }
    }
    zip.finish().unwrap().into_inner()
}

pub fn tar_gz_bytes(members: &[Member<'_>]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, data) in members {
        let mut header = tar::Header::new_gnu();
        match data {
            Some(text) => {
                header.set_entry_type(tar::EntryType::Regular);
                header.set_size(text.len() as u64);
                header.set_mode(0o644);
                header.set_cksum();
                builder.append_data(&mut header, name, text.as_bytes()).unwrap();
            },
            None => {
                header.set_entry_type(tar::EntryType::Directory);
                header.set_size(0);
                header.set_mode(0o755);
                header.set_cksum();
                builder.append_data(&mut header, name, std::io::empty()).unwrap();
            },
        }
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Zip whose first member name escapes the extraction root.
///
/// `ZipWriter` stores names verbatim, which is what a hostile archive does.
pub fn zip_with_traversal() -> Vec<u8> {
    zip_bytes(&[
        ("../../etc/passwd", Some("root:x:0:0")),
        ("safe/ok.txt", Some("fine")),
    ])
}

pub fn test_settings() -> IngestSettings {
    IngestSettings {
        limits: ExtractionLimits {
            max_entries: 1_000,
            max_total_bytes: 4 * 1024 * 1024,
        },
        progress_interval: 1,
        insert_batch_size: 3,
        cleanup_on_error: true,
    }
}

/// Coordinator plus the temporary directory backing its storage
pub struct TestPipeline {
    pub dir: TempDir,
    pub coordinator: Arc<UploadCoordinator>,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_stores(Stores::in_memory())
    }

    pub fn with_stores(stores: Stores) -> Self {
        let dir = TempDir::new().unwrap();
        let storage = SessionStorage::new(dir.path().join("data"), dir.path().join("tmp"));
        std::fs::create_dir_all(storage.temp_dir()).unwrap();
        let coordinator =
            UploadCoordinator::new(stores, storage, ProgressBroadcaster::new(64), test_settings());
        Self { dir, coordinator }
    }

    pub fn storage(&self) -> &SessionStorage {
        self.coordinator.storage()
    }

    /// Stage archive bytes where an upload would land and build the job for it
    pub fn stage(&self, session_id: Uuid, archive: &[u8]) -> UploadJob {
        let job_id = Uuid::new_v4();
        let archive_path = self.storage().temp_archive_path(job_id);
        std::fs::write(&archive_path, archive).unwrap();
        UploadJob {
            job_id,
            session_id,
            archive_path,
        }
    }

    pub fn session_path(&self, session_id: Uuid, relative: &str) -> PathBuf {
        self.storage().session_dir(session_id).join(relative)
    }

    pub async fn records(&self, session_id: Uuid) -> Vec<FileRecord> {
        self.coordinator.stores().index.list(session_id).await.unwrap()
    }

    pub async fn paths(&self, session_id: Uuid) -> Vec<String> {
        self.records(session_id).await.into_iter().map(|r| r.path).collect()
    }

    pub fn router(&self) -> Router {
        self.router_with_limit(4 * 1024 * 1024)
    }

    pub fn router_with_limit(&self, max_archive_bytes: u64) -> Router {
        let features = FeatureState {
            coordinator: self.coordinator.clone(),
            max_archive_bytes,
        };
        let cors = CorsConfig {
            allowed_origins: vec!["*".to_string()],
            allow_credentials: false,
        };
        api::create_router(AppState { db: None }, features, &cors)
    }
}

/// Drain a job's events until the terminal one
pub async fn collect_events(pipeline: &TestPipeline, job_id: Uuid) -> Vec<ProgressEvent> {
    let mut subscription = pipeline.coordinator.broadcaster().subscribe(job_id);
    let mut events = Vec::new();
    while let Some(event) = subscription.recv().await {
        events.push(event);
    }
    events
}

/// Multipart body with a single `file` field
pub fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn multipart_content_type() -> String {
    format!("multipart/form-data; boundary={BOUNDARY}")
}

/// File index whose inserts start failing after a number of successful batches
#[derive(Default)]
pub struct FailingFileIndex {
    pub inner: MemoryFileIndex,
    pub succeed_batches: usize,
    inserts: AtomicUsize,
}

impl FailingFileIndex {
    pub fn new(succeed_batches: usize) -> Self {
        Self {
            succeed_batches,
            ..Default::default()
        }
    }
}

#[async_trait]
impl FileIndexStore for FailingFileIndex {
    async fn delete_all(&self, session_id: Uuid) -> Result<u64, StoreError> {
        self.inner.delete_all(session_id).await
    }

    async fn insert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) >= self.succeed_batches {
            return Err(StoreError::Unavailable("connection reset".to_string()));
        }
        self.inner.insert_batch(records).await
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.list(session_id).await
    }

    async fn get(&self, session_id: Uuid, path: &str) -> Result<Option<FileRecord>, StoreError> {
        self.inner.get(session_id, path).await
    }
}

pub fn failing_stores(succeed_batches: usize) -> Stores {
    Stores {
        status: Arc::new(MemoryStatusStore::default()),
        index: Arc::new(FailingFileIndex::new(succeed_batches)),
    }
}

/// File index that holds every job at its first write until the gate opens
pub struct GatedFileIndex {
    pub inner: MemoryFileIndex,
    gate: Semaphore,
}

impl GatedFileIndex {
    pub fn new() -> Self {
        Self {
            inner: MemoryFileIndex::default(),
            gate: Semaphore::new(0),
        }
    }

    pub fn open(&self) {
        self.gate.add_permits(1024);
    }
}

#[async_trait]
impl FileIndexStore for GatedFileIndex {
    async fn delete_all(&self, session_id: Uuid) -> Result<u64, StoreError> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.inner.delete_all(session_id).await
    }

    async fn insert_batch(&self, records: &[FileRecord]) -> Result<(), StoreError> {
        self.inner.insert_batch(records).await
    }

    async fn list(&self, session_id: Uuid) -> Result<Vec<FileRecord>, StoreError> {
        self.inner.list(session_id).await
    }

    async fn get(&self, session_id: Uuid, path: &str) -> Result<Option<FileRecord>, StoreError> {
        self.inner.get(session_id, path).await
    }
}

/// Stores whose jobs stall until the returned index is opened
pub fn gated_stores() -> (Stores, Arc<GatedFileIndex>) {
    let index = Arc::new(GatedFileIndex::new());
    let stores = Stores {
        status: Arc::new(MemoryStatusStore::default()),
        index: index.clone(),
    };
    (stores, index)
}
