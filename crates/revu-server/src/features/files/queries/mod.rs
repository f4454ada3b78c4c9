pub mod content;
pub mod tree;

pub use content::{FileContentError, FileContentQuery, FileContentResponse};
pub use tree::{FileTreeError, FileTreeQuery};
