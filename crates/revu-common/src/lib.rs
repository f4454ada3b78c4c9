//! Revu Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the Revu workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Common error type
//! - **Checksums**: Streaming SHA-256 for uploaded archives
//! - **Logging**: `tracing` subscriber initialisation driven by `LOG_*` variables
//! - **Types**: File index records, session statuses, and progress events
//!
//! # Example
//!
//! ```no_run
//! use revu_common::checksum::StreamingChecksum;
//!
//! fn fingerprint(chunks: &[&[u8]]) -> String {
//!     let mut checksum = StreamingChecksum::new();
//!     for chunk in chunks {
//!         checksum.update(chunk);
//!     }
//!     let (digest, size) = checksum.finish();
//!     tracing::info!(%digest, size, "archive fingerprint");
//!     digest
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::CommonError;
pub use types::{FileRecord, ProgressEvent, ProgressKind, SessionStatus};
