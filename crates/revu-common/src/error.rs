//! Error types shared across Revu crates

use thiserror::Error;

/// Main error type for shared utilities
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Invalid session status: {0}")]
    InvalidStatus(String),
}
