//! Read access to a session's extracted files

pub mod queries;
pub mod routes;

pub use queries::{FileContentError, FileContentQuery, FileContentResponse, FileTreeError, FileTreeQuery};

pub use routes::files_routes;
