pub mod start_upload;

pub use start_upload::{StagedArchive, StartUploadCommand, StartUploadResponse, UploadArchiveError};
