//! Cloud-attachment resolution error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while resolving or downloading a cloud attachment.
#[derive(Error, Debug)]
pub enum CloudError {
    /// No registered provider matches the outside link.
    #[error("No provider matches link '{0}'")]
    UnsupportedProvider(String),

    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Redirect chain exceeded the hop limit.
    #[error("Redirect chain exceeded {limit} hops")]
    TooManyRedirects { limit: usize },

    /// A 3xx response carried no usable Location header.
    #[error("Redirect response missing Location header")]
    MissingLocation,

    /// The outside link is structurally unusable for its provider.
    #[error("Malformed cloud link: {0}")]
    MalformedLink(String),

    /// The provider's download endpoint did not yield a direct URL.
    #[error("Could not extract download URL: {0}")]
    ResolveFailed(String),

    /// This provider's links cannot be resolved non-interactively.
    #[error("Download resolution is not supported for {0}")]
    ResolutionUnsupported(&'static str),

    /// The server returned an empty body for the download.
    #[error("Downloaded file is empty")]
    EmptyDownload,

    /// IO error while writing the downloaded file.
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for cloud-attachment operations.
pub type Result<T> = std::result::Result<T, CloudError>;
