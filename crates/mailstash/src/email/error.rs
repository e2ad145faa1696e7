//! Email transport error types.

use thiserror::Error;

/// Errors that can occur while talking to the IMAP server.
#[derive(Error, Debug)]
pub enum EmailError {
    /// Failed to connect to the IMAP server.
    #[error("IMAP connection failed: {0}")]
    ConnectionFailed(String),

    /// TLS/SSL error during connection.
    #[error("TLS error: {0}")]
    TlsError(String),

    /// Authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// IMAP protocol error.
    #[error("IMAP protocol error: {0}")]
    ProtocolError(String),

    /// Folder not found.
    #[error("IMAP folder '{0}' not found")]
    FolderNotFound(String),

    /// No credentials configured for the account a task names.
    #[error("No account configured for '{0}'")]
    UnknownAccount(String),

    /// Failed to stage a fetched message.
    #[error("Failed to stage message: {0}")]
    Staging(#[from] crate::error::StorageError),

    /// IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<async_native_tls::Error> for EmailError {
    fn from(err: async_native_tls::Error) -> Self {
        EmailError::TlsError(err.to_string())
    }
}

/// Result type for email transport operations.
pub type Result<T> = std::result::Result<T, EmailError>;
