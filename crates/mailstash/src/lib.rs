pub mod cloud;
pub mod db;
pub mod email;
pub mod error;
pub mod fulltext;
pub mod logging;
pub mod pipeline;
pub mod storage;
pub mod task;

pub use cloud::{CloudFile, Provider, ProviderRegistry};
pub use db::Database;
pub use email::{ImapClient, MessageParser, ParsedMessage};
pub use error::{MailstashError, Result, StorageError};
pub use fulltext::{DocumentKind, FullTextIndex};
pub use pipeline::{
    ImapSource, MessageSource, NoopProgress, Pipeline, ProgressEvent, ProgressReporter, RunResult,
};
pub use storage::{CapacityPlanner, ContentWriter, RawMessageStore, Volume, VolumeProvider};
pub use task::{AccountConfig, BackupTask, ContentKind};
