//! Upload job orchestration
//!
//! The coordinator owns one job per session at a time. It runs
//! extraction, directory reconciliation and index replacement on a background
//! task, is the only writer of session status, and reports progress through
//! the [`ProgressBroadcaster`].
//!
//! ```text
//! queued -> extracting -> indexing -> ready
//!    \__________\______________\_____> error
//! ```
//!
//! Every job reaches `ready` or `error`; failures never propagate to the caller
//! that started the job.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use revu_common::{FileRecord, ProgressEvent, SessionStatus};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::broadcaster::ProgressBroadcaster;
use super::extractor::{extract_archive, EntryKind, ExtractedEntry, ExtractionError};
use super::index_builder::{self, IndexBuilder, IndexPersistError};
use super::reconciler::DirectoryReconciler;
use super::types::{ActiveJob, IngestError, IngestSettings, JobStatus, StartUploadError, UploadJob};
use crate::storage::SessionStorage;
use crate::store::Stores;

/// Entries in flight between the extraction thread and the indexing task.
const ENTRY_CHANNEL_CAPACITY: usize = 256;

/// Progress percentage reserved for the final index flush.
const FINALIZING_PERCENT: u8 = 99;

pub struct UploadCoordinator {
    stores: Stores,
    storage: SessionStorage,
    broadcaster: Arc<ProgressBroadcaster>,
    settings: IngestSettings,
    active: DashMap<Uuid, ActiveJob>,
}

/// Per-run bookkeeping used to decide what to undo on failure
struct JobRun<'a> {
    job: &'a UploadJob,
    status: JobStatus,
    index_started: bool,
    tree_touched: bool,
}

impl UploadCoordinator {
    pub fn new(
        stores: Stores,
        storage: SessionStorage,
        broadcaster: Arc<ProgressBroadcaster>,
        mut settings: IngestSettings,
    ) -> Arc<Self> {
        settings.progress_interval = settings.progress_interval.max(1);
        Arc::new(Self {
            stores,
            storage,
            broadcaster,
            settings,
            active: DashMap::new(),
        })
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn storage(&self) -> &SessionStorage {
        &self.storage
    }

    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// The job currently running for a session, if any
    pub fn active_job(&self, session_id: Uuid) -> Option<ActiveJob> {
        self.active.get(&session_id).map(|job| *job)
    }

    /// Accept a job and run it in the background.
    ///
    /// The job's progress channel is open by the time this returns, so callers
    /// can hand the job id to subscribers straight away. The returned handle
    /// resolves to the terminal status; dropping it detaches the job.
    #[instrument(skip(self, job), fields(job_id = %job.job_id, session_id = %job.session_id))]
    pub fn start(self: &Arc<Self>, job: UploadJob) -> Result<JoinHandle<JobStatus>, StartUploadError> {
        match self.active.entry(job.session_id) {
            Entry::Occupied(existing) => {
                warn!(active_job = %existing.get().job_id, "Session already has an active upload");
                return Err(StartUploadError::SessionBusy {
                    session_id: job.session_id,
                });
            },
            Entry::Vacant(slot) => {
                slot.insert(ActiveJob {
                    job_id: job.job_id,
                    status: JobStatus::Queued,
                });
            },
        }

        self.broadcaster.open(job.job_id);
        info!(archive = %job.archive_path.display(), "Upload job queued");

        let coordinator = Arc::clone(self);
        Ok(tokio::spawn(async move {
            let _guard = ActiveGuard {
                coordinator: &coordinator,
                job: &job,
            };
            coordinator.run(&job).await
        }))
    }

    #[instrument(skip(self, job), fields(job_id = %job.job_id, session_id = %job.session_id))]
    async fn run(&self, job: &UploadJob) -> JobStatus {
        let mut run = JobRun {
            job,
            status: JobStatus::Queued,
            index_started: false,
            tree_touched: false,
        };

        match self.pipeline(&mut run).await {
            Ok(records) => {
                self.advance(&mut run, JobStatus::Ready);
                if let Err(e) = self.storage.remove(&job.archive_path).await {
                    warn!(error = %e, "Failed to remove processed archive");
                }
                info!(
                    records,
                    subscribers = self.broadcaster.subscriber_count(job.job_id),
                    "Upload job finished"
                );
                // Free the session before `done` so a client reacting to it can upload again
                self.release(job);
                self.broadcaster.emit(
                    job.job_id,
                    ProgressEvent::done(format!("Upload complete, {} entries indexed", records)),
                );
            },
            Err(err) => self.fail(&mut run, err).await,
        }

        run.status
    }

    async fn pipeline(&self, run: &mut JobRun<'_>) -> Result<u64, IngestError> {
        let job = run.job;

        self.advance(run, JobStatus::Extracting);
        self.stores
            .status
            .set_status(job.session_id, SessionStatus::Uploading)
            .await
            .map_err(IngestError::StatusStore)?;
        self.broadcaster
            .emit(job.job_id, ProgressEvent::progress("Extracting archive", 0));

        let dest = self.storage.session_dir(job.session_id);
        self.storage.ensure_dir(&dest).await?;
        run.tree_touched = true;
        self.storage.empty_dir(&dest).await?;

        run.index_started = true;
        let mut builder = IndexBuilder::begin(
            self.stores.index.clone(),
            job.session_id,
            self.settings.insert_batch_size,
        )
        .await?;

        let (tx, rx) = mpsc::channel::<ExtractedEntry>(ENTRY_CHANNEL_CAPACITY);
        let extraction = {
            let archive = job.archive_path.clone();
            let dest = dest.clone();
            let storage = self.storage.clone();
            let limits = self.settings.limits;
            tokio::task::spawn_blocking(move || {
                extract_archive(&archive, &dest, &storage, limits, |entry| {
                    tx.blocking_send(entry).map_err(|_| ExtractionError::Aborted)
                })
            })
        };

        // Dropping the receiver on failure makes the extractor stop at its next entry
        let consumed = self.consume(job, rx, &mut builder).await;
        let extracted = extraction.await?;
        consumed?;
        let summary = extracted?;

        self.advance(run, JobStatus::Indexing);
        self.broadcaster.emit(
            job.job_id,
            ProgressEvent::progress("Finalizing file index", FINALIZING_PERCENT),
        );
        let records = builder.finish().await?;
        info!(
            files = summary.files,
            skipped = summary.skipped,
            records,
            "File index replaced"
        );

        self.stores
            .status
            .set_status(job.session_id, SessionStatus::Ready)
            .await
            .map_err(IngestError::StatusStore)?;

        Ok(records)
    }

    /// Turn extracted entries into index records as they arrive
    async fn consume(
        &self,
        job: &UploadJob,
        mut rx: mpsc::Receiver<ExtractedEntry>,
        builder: &mut IndexBuilder,
    ) -> Result<(), IndexPersistError> {
        let mut reconciler = DirectoryReconciler::new();
        let mut processed = 0u64;
        let mut unreported = None;

        while let Some(entry) = rx.recv().await {
            for dir in reconciler.missing_ancestors(&entry.path) {
                builder.push(directory_record(job.session_id, &dir)).await?;
            }

            match entry.kind {
                EntryKind::Directory => {
                    if reconciler.register_directory(&entry.path) {
                        builder.push(directory_record(job.session_id, &entry.path)).await?;
                    }
                },
                EntryKind::File => {
                    let key = SessionStorage::storage_key(job.session_id, &entry.path);
                    builder
                        .push(FileRecord::file(job.session_id, &entry.path, entry.size, key))
                        .await?;
                },
            }

            processed += 1;
            if processed % self.settings.progress_interval == 0 {
                self.report_extracted(job, entry.position, entry.total);
                unreported = None;
            } else {
                unreported = Some((entry.position, entry.total));
            }
        }

        // The archive may end with skipped entries, so the last delivered one is reported here
        if let Some((position, total)) = unreported {
            self.report_extracted(job, position, total);
        }

        Ok(())
    }

    fn report_extracted(&self, job: &UploadJob, position: u64, total: u64) {
        self.broadcaster.emit(
            job.job_id,
            ProgressEvent::progress(
                format!("Extracted {} of {} entries", position, total),
                extraction_percent(position, total),
            ),
        );
    }

    async fn fail(&self, run: &mut JobRun<'_>, err: IngestError) {
        let job = run.job;
        error!(error = %err, stage = run.status.as_str(), "Upload job failed");

        if run.index_started {
            if let Err(e) = index_builder::abort_session(self.stores.index.as_ref(), job.session_id).await {
                error!(error = %e, "Failed to roll back file index");
            }
        }

        if run.tree_touched && self.settings.cleanup_on_error {
            let dest = self.storage.session_dir(job.session_id);
            if let Err(e) = self.storage.empty_dir(&dest).await {
                warn!(error = %e, "Failed to clean up session directory");
            }
        }

        if let Err(e) = self
            .stores
            .status
            .set_status(job.session_id, SessionStatus::Error)
            .await
        {
            error!(error = %e, "Failed to record error status");
        }

        self.advance(run, JobStatus::Error);
        self.release(job);
        self.broadcaster
            .emit(job.job_id, ProgressEvent::error(err.user_message()));
    }

    /// Give up the session slot if this job still holds it
    fn release(&self, job: &UploadJob) {
        self.active
            .remove_if(&job.session_id, |_, active| active.job_id == job.job_id);
    }

    fn advance(&self, run: &mut JobRun<'_>, next: JobStatus) {
        if !run.status.can_transition_to(next) {
            warn!(from = run.status.as_str(), to = next.as_str(), "Ignoring invalid job transition");
            return;
        }
        run.status = next;
        if let Some(mut active) = self.active.get_mut(&run.job.session_id) {
            if active.job_id == run.job.job_id {
                active.status = next;
            }
        }
    }
}

/// Releases the session slot when the job task ends, including by panic.
struct ActiveGuard<'a> {
    coordinator: &'a UploadCoordinator,
    job: &'a UploadJob,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let coordinator = self.coordinator;
        coordinator.release(self.job);

        // Only still open if the task died before emitting a terminal event
        if coordinator.broadcaster.is_open(self.job.job_id) {
            error!(job_id = %self.job.job_id, "Upload job ended without a terminal event");
            coordinator
                .broadcaster
                .emit(self.job.job_id, ProgressEvent::error("Upload failed unexpectedly"));
        }
    }
}

fn directory_record(session_id: Uuid, path: &str) -> FileRecord {
    FileRecord::directory(session_id, path, SessionStorage::storage_key(session_id, path))
}

/// Share of archive entries handled, kept below the finalizing step
fn extraction_percent(position: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let percent = position.saturating_mul(100) / total;
    percent.min(u64::from(FINALIZING_PERCENT - 1)) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::broadcaster::Subscription;
    use crate::ingest::extractor::ExtractionLimits;
    use revu_common::ProgressKind;
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, Option<&str>)]) {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
        for (name, data) in entries {
            match data {
                Some(bytes) => {
                    zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                    zip.write_all(bytes.as_bytes()).unwrap();
                },
                None => zip.add_directory(*name, SimpleFileOptions::default()).unwrap(),
            }
        }
        zip.finish().unwrap();
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            limits: ExtractionLimits {
                max_entries: 1000,
                max_total_bytes: 1024 * 1024,
            },
            progress_interval: 1,
            insert_batch_size: 2,
            cleanup_on_error: true,
        }
    }

    fn coordinator(dir: &TempDir) -> Arc<UploadCoordinator> {
        coordinator_with(dir, settings())
    }

    fn coordinator_with(dir: &TempDir, settings: IngestSettings) -> Arc<UploadCoordinator> {
        UploadCoordinator::new(
            Stores::in_memory(),
            SessionStorage::new(dir.path().join("data"), dir.path().join("tmp")),
            ProgressBroadcaster::new(64),
            settings,
        )
    }

    async fn drain(mut events: Subscription) -> Vec<ProgressEvent> {
        let mut collected = Vec::new();
        while let Some(event) = events.recv().await {
            collected.push(event);
        }
        collected
    }

    fn job(dir: &TempDir, session_id: Uuid, entries: &[(&str, Option<&str>)]) -> UploadJob {
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        let job_id = Uuid::new_v4();
        let archive_path = dir.path().join("tmp").join(format!("{job_id}.archive"));
        write_zip(&archive_path, entries);
        UploadJob {
            job_id,
            session_id,
            archive_path,
        }
    }

    #[test]
    fn test_extraction_percent() {
        assert_eq!(extraction_percent(0, 0), 0);
        assert_eq!(extraction_percent(1, 4), 25);
        assert_eq!(extraction_percent(4, 4), 98);
    }

    #[tokio::test]
    async fn test_job_reaches_ready_and_removes_archive() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let session = Uuid::new_v4();
        let job = job(&dir, session, &[("src/a/main.rs", Some("fn main() {}")), ("README", Some("hi"))]);
        let archive = job.archive_path.clone();
        let job_id = job.job_id;

        let handle = coordinator.start(job).unwrap();
        let mut events = coordinator.broadcaster().subscribe(job_id);
        let status = handle.await.unwrap();

        assert_eq!(status, JobStatus::Ready);
        assert!(!archive.exists());
        assert!(coordinator.active_job(session).is_none());
        assert_eq!(
            coordinator.stores().status.get_status(session).await.unwrap(),
            Some(SessionStatus::Ready)
        );

        let paths: Vec<_> = coordinator
            .stores()
            .index
            .list(session)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["README", "src", "src/a", "src/a/main.rs"]);

        let mut last = None;
        while let Some(event) = events.recv().await {
            last = Some(event);
        }
        assert_eq!(last.unwrap().kind, ProgressKind::Done);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected_while_active() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let session = Uuid::new_v4();
        let first = job(&dir, session, &[("a.txt", Some("a"))]);
        let second = job(&dir, session, &[("b.txt", Some("b"))]);

        let handle = coordinator.start(first).unwrap();
        let err = coordinator.start(second).unwrap_err();
        assert!(matches!(err, StartUploadError::SessionBusy { session_id } if session_id == session));

        assert_eq!(handle.await.unwrap(), JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_corrupt_archive_keeps_archive_and_reports_error() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let session = Uuid::new_v4();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        let archive_path = dir.path().join("tmp/broken.archive");
        std::fs::write(&archive_path, b"PK\x03\x04 this is not really a zip").unwrap();
        let job_id = Uuid::new_v4();
        let job = UploadJob {
            job_id,
            session_id: session,
            archive_path: archive_path.clone(),
        };

        let handle = coordinator.start(job).unwrap();
        let mut events = coordinator.broadcaster().subscribe(job_id);
        let status = handle.await.unwrap();

        assert_eq!(status, JobStatus::Error);
        assert!(archive_path.exists());
        assert_eq!(
            coordinator.stores().status.get_status(session).await.unwrap(),
            Some(SessionStatus::Error)
        );

        let mut kinds = Vec::new();
        while let Some(event) = events.recv().await {
            kinds.push(event.kind);
        }
        assert_eq!(kinds.last(), Some(&ProgressKind::Error));
        assert_eq!(kinds.iter().filter(|k| **k == ProgressKind::Error).count(), 1);
    }

    #[tokio::test]
    async fn test_session_accepts_new_upload_once_done_arrives() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let session = Uuid::new_v4();
        let first = job(&dir, session, &[("a.txt", Some("a"))]);
        let first_id = first.job_id;

        let handle = coordinator.start(first).unwrap();
        let mut events = coordinator.broadcaster().subscribe(first_id);
        let mut terminal = None;
        while let Some(event) = events.recv().await {
            if event.is_terminal() {
                terminal = Some(event.kind);
                break;
            }
        }
        assert_eq!(terminal, Some(ProgressKind::Done));

        // The first task may still be unwinding, the slot must already be free
        let second = job(&dir, session, &[("b.txt", Some("b"))]);
        let second_handle = coordinator.start(second).unwrap();

        assert_eq!(handle.await.unwrap(), JobStatus::Ready);
        assert_eq!(second_handle.await.unwrap(), JobStatus::Ready);
        assert!(coordinator.active_job(session).is_none());
    }

    #[tokio::test]
    async fn test_session_accepts_new_upload_once_error_arrives() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        let session = Uuid::new_v4();
        std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
        let archive_path = dir.path().join("tmp/broken.archive");
        std::fs::write(&archive_path, b"PK\x03\x04 truncated").unwrap();
        let broken = UploadJob {
            job_id: Uuid::new_v4(),
            session_id: session,
            archive_path,
        };
        let broken_id = broken.job_id;

        let handle = coordinator.start(broken).unwrap();
        let events = drain(coordinator.broadcaster().subscribe(broken_id)).await;
        assert_eq!(events.last().unwrap().kind, ProgressKind::Error);

        let retry = job(&dir, session, &[("a.txt", Some("a"))]);
        let retry_handle = coordinator.start(retry).unwrap();

        assert_eq!(handle.await.unwrap(), JobStatus::Error);
        assert_eq!(retry_handle.await.unwrap(), JobStatus::Ready);
    }

    #[tokio::test]
    async fn test_throttled_progress_reports_last_entry_before_skipped_tail() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(
            &dir,
            IngestSettings {
                progress_interval: 10,
                ..settings()
            },
        );
        let session = Uuid::new_v4();
        let job = job(
            &dir,
            session,
            &[("a.txt", Some("a")), ("b.txt", Some("b")), ("__MACOSX/._b.txt", Some("junk"))],
        );
        let job_id = job.job_id;

        let handle = coordinator.start(job).unwrap();
        let events = drain(coordinator.broadcaster().subscribe(job_id)).await;
        assert_eq!(handle.await.unwrap(), JobStatus::Ready);

        let extracted: Vec<_> = events
            .iter()
            .filter(|e| e.payload.message.starts_with("Extracted"))
            .map(|e| e.payload.message.as_str())
            .collect();
        assert_eq!(extracted, vec!["Extracted 2 of 3 entries"]);
        assert_eq!(events.last().unwrap().kind, ProgressKind::Done);
    }

    #[tokio::test]
    async fn test_throttled_progress_skips_intermediate_entries() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(
            &dir,
            IngestSettings {
                progress_interval: 2,
                ..settings()
            },
        );
        let session = Uuid::new_v4();
        let job = job(
            &dir,
            session,
            &[("a.txt", Some("a")), ("b.txt", Some("b")), ("c.txt", Some("c"))],
        );
        let job_id = job.job_id;

        let handle = coordinator.start(job).unwrap();
        let events = drain(coordinator.broadcaster().subscribe(job_id)).await;
        handle.await.unwrap();

        let extracted: Vec<_> = events
            .iter()
            .filter(|e| e.payload.message.starts_with("Extracted"))
            .map(|e| e.payload.message.as_str())
            .collect();
        assert_eq!(extracted, vec!["Extracted 2 of 3 entries", "Extracted 3 of 3 entries"]);
    }

    #[tokio::test]
    async fn test_zero_progress_interval_is_treated_as_one() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator_with(
            &dir,
            IngestSettings {
                progress_interval: 0,
                ..settings()
            },
        );
        let session = Uuid::new_v4();
        let job = job(&dir, session, &[("a.txt", Some("a")), ("b.txt", Some("b"))]);
        let job_id = job.job_id;

        let handle = coordinator.start(job).unwrap();
        let events = drain(coordinator.broadcaster().subscribe(job_id)).await;

        assert_eq!(handle.await.unwrap(), JobStatus::Ready);
        let extracted = events
            .iter()
            .filter(|e| e.payload.message.starts_with("Extracted"))
            .count();
        assert_eq!(extracted, 2);
    }
}
