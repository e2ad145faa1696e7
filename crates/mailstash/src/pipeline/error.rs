use thiserror::Error;

/// Task-level pipeline failures. Per-item failures (one undecodable
/// message, one dead cloud link, one unextractable file) are caught and
/// logged at the item boundary and never surface here.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Storage error: {0}")]
    Storage(#[from] crate::error::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Mail transport error: {0}")]
    Email(#[from] crate::email::EmailError),

    #[error("Cloud attachment error: {0}")]
    Cloud(#[from] crate::cloud::CloudError),

    #[error("Full-text index error: {0}")]
    Index(#[from] crate::fulltext::IndexError),

    #[error("No volume with {required_bytes} bytes free")]
    NoVolume { required_bytes: u64 },

    #[error("Volume '{volume}' ran out of space writing '{filename}'")]
    OutOfSpace { volume: String, filename: String },
}
