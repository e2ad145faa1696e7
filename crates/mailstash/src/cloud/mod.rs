//! Cloud-attachment support: provider registry, descriptor scraping,
//! download-URL resolution, and deduplicating downloads.

pub mod download;
pub mod error;
pub mod providers;
pub mod resolver;

pub use download::download_large_file;
pub use error::CloudError;
pub use providers::{CloudFile, Provider, ProviderRegistry};
pub use resolver::{CloudResolver, ResolvedDownload};
