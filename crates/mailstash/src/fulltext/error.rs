//! Full-text index error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while building or querying the full-text index.
#[derive(Error, Debug)]
pub enum IndexError {
    /// Index engine error.
    #[error("Index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// The index directory could not be opened.
    #[error("Failed to open index directory: {0}")]
    OpenDirectory(#[from] tantivy::directory::error::OpenDirectoryError),

    /// IO error on the index directory.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for full-text operations.
pub type Result<T> = std::result::Result<T, IndexError>;
