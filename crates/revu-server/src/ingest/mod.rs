//! Archive ingestion pipeline
//!
//! # Architecture
//!
//! - **extractor**: safe extraction of zip / tar / tar.gz archives
//! - **reconciler**: synthesizes the parent directories archives leave implicit
//! - **index_builder**: batched replacement of a session's file index
//! - **broadcaster**: per-job progress fan-out to live subscribers
//! - **coordinator**: runs the job lifecycle and owns session status
//!
//! The HTTP layer only talks to [`UploadCoordinator`] and, for event streams,
//! to the [`ProgressBroadcaster`] it exposes.

pub mod broadcaster;
pub mod coordinator;
pub mod extractor;
pub mod index_builder;
pub mod reconciler;
pub mod types;

pub use broadcaster::{ProgressBroadcaster, Subscription};
pub use coordinator::UploadCoordinator;
pub use extractor::{ExtractionError, ExtractionLimits, PathTraversalRejected};
pub use index_builder::{IndexBuilder, IndexPersistError};
pub use reconciler::DirectoryReconciler;
pub use types::{ActiveJob, IngestError, IngestSettings, JobStatus, StartUploadError, UploadJob};
