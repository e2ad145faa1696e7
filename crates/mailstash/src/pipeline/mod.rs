//! Orchestrated backup runs: classification, capacity planning, the
//! three-phase migration, and run-history recording.

pub mod classify;
pub mod error;
pub mod fetch;
pub mod progress;
pub mod runner;

pub use classify::{classify, AttachmentItem, ClassifiedBatches, CloudItem, MessageMeta, RawItem};
pub use error::PipelineError;
pub use fetch::{ImapSource, MessageSource};
pub use progress::{CollectingProgress, NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::Pipeline;

pub use crate::db::history_repo::RunResult;
