//! Revu Server Library
//!
//! HTTP server that turns uploaded source archives into a browsable file index
//! for code review sessions.
//!
//! # Overview
//!
//! - **Uploads**: a multipart archive upload is staged to disk and handed to a
//!   background job; the request returns as soon as the job is accepted.
//! - **Ingestion**: the job extracts the archive into the session's directory,
//!   reconciles the directory tree and replaces the session's file index.
//! - **Progress**: every job publishes progress, done and error events that
//!   clients follow over Server-Sent Events.
//! - **Files**: the session's index and file contents are served read-only.
//!
//! # Architecture
//!
//! Features are vertical slices under [`features`], each with its own
//! `commands/`, `queries/` and `routes.rs`. The ingestion pipeline in
//! [`ingest`] owns the long-running work, [`store`] abstracts the file index
//! and session status (PostgreSQL or in-memory), and [`storage`] owns the
//! on-disk layout.
//!
//! # Example
//!
//! ```no_run
//! use revu_server::{api, config::Config, features::FeatureState};
//! use revu_server::ingest::{IngestSettings, ProgressBroadcaster, UploadCoordinator};
//! use revu_server::{storage::SessionStorage, store::Stores};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let storage = SessionStorage::from_config(&config.upload);
//!     storage.init().await?;
//!
//!     let coordinator = UploadCoordinator::new(
//!         Stores::in_memory(),
//!         storage,
//!         ProgressBroadcaster::new(config.upload.subscriber_buffer),
//!         IngestSettings::from(&config.upload),
//!     );
//!     let features = FeatureState {
//!         coordinator,
//!         max_archive_bytes: config.upload.max_archive_bytes,
//!     };
//!     let app = api::create_router(api::AppState { db: None }, features, &config.cors);
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod features;
pub mod ingest;
pub mod middleware;
pub mod storage;
pub mod store;
