//! Archive uploads and their progress events

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{StartUploadCommand, StartUploadResponse, UploadArchiveError};
pub use queries::StreamEventsQuery;
pub use routes::uploads_routes;
