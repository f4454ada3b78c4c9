//! Feature modules implementing the Revu API
//!
//! Each feature is a vertical slice with its own commands, queries and routes.
//!
//! # Features
//!
//! - **uploads**: archive upload and live progress events
//! - **files**: the extracted file tree and file contents of a session
//!
//! # Architecture
//!
//! Each feature module follows the structure:
//! - `commands/` - Write operations
//! - `queries/` - Read operations
//! - `routes.rs` - HTTP route definitions

pub mod files;
pub mod uploads;

use crate::ingest::UploadCoordinator;
use axum::Router;
use std::sync::Arc;

/// Shared state for all feature routes
#[derive(Clone)]
pub struct FeatureState {
    /// Runs upload jobs and exposes the stores, storage and progress broadcaster
    pub coordinator: Arc<UploadCoordinator>,
    /// Largest archive accepted by the upload endpoint
    pub max_archive_bytes: u64,
}

/// Creates the main API router with all feature routes mounted
///
/// - `POST /sessions/:session_id/uploads` - Upload an archive
/// - `GET /sessions/:session_id/uploads/:upload_id/events` - Progress events (SSE)
/// - `GET /sessions/:session_id/tree` - Flat file index
/// - `GET /sessions/:session_id/file?path=` - File contents
pub fn router(state: FeatureState) -> Router<()> {
    Router::new()
        .merge(uploads::uploads_routes(state.max_archive_bytes))
        .merge(files::files_routes())
        .with_state(state)
}
