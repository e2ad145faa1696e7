use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MailstashError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Email error: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("Cloud attachment error: {0}")]
    Cloud(#[from] crate::cloud::CloudError),

    #[error("Full-text index error: {0}")]
    Index(#[from] crate::fulltext::IndexError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to remove '{path}': {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid absolute path '{0}': expected 'Drive:/path/to/file'")]
    InvalidAbsolutePath(String),

    #[error("No account segment in path '{0}'")]
    NoAccountInPath(String),

    #[error("Staging scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("File already exists: {0}")]
    FileExists(PathBuf),
}

pub type Result<T> = std::result::Result<T, MailstashError>;
