//! Classification: staged raw messages into typed migration batches.
//!
//! One pass over the staging area parses every `.eml`, applies the
//! task's date range and keyword filters, and sorts the survivors into
//! three finite batches (raw messages, direct attachments, cloud
//! descriptors) that the runner consumes phase by phase. Batches are
//! plain values; nothing here touches the target volume.

use std::path::PathBuf;

use log::{debug, warn};

use super::error::PipelineError;
use crate::cloud::{CloudFile, ProviderRegistry};
use crate::db::records::NewEmail;
use crate::email::{AttachmentData, MessageParser};
use crate::storage::paths::extract_mailbox;
use crate::storage::RawMessageStore;
use crate::task::{BackupTask, ContentKind};

/// Email metadata shared by every item classified out of one message.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    /// Provider message UID, recovered from the staged filename stem.
    pub uid: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub cc: String,
    pub bcc: String,
    /// RFC 3339 `Date` header value.
    pub received_date: Option<String>,
    /// Mailbox folder path, nesting flattened to `/` separators.
    pub mailbox: String,
    pub body_text: String,
}

impl MessageMeta {
    pub(crate) fn to_new_email(&self, task: &BackupTask, raw_path: Option<String>) -> NewEmail {
        NewEmail {
            account: task.account.clone(),
            uid: self.uid.clone(),
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            recipients: self.recipients.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            received_date: self.received_date.clone(),
            task_name: task.name.clone(),
            mailbox: self.mailbox.clone(),
            body_text: self.body_text.clone(),
            raw_path,
        }
    }
}

/// One raw message to migrate under `RFC2822/`.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub meta: MessageMeta,
    /// Staged source file.
    pub source: PathBuf,
    /// Target storage filename, `{subject}_{date}_{from}.eml`.
    pub eml_filename: String,
    pub size: u64,
    /// Inline attachments of the message; indexed for content during
    /// the raw phase even though their bytes are not stored separately.
    pub inline: Vec<AttachmentData>,
}

/// One direct attachment to migrate under `Attachments/`.
#[derive(Debug, Clone)]
pub struct AttachmentItem {
    pub meta: MessageMeta,
    pub filename: String,
    pub data: Vec<u8>,
}

/// One cloud-attachment descriptor to resolve under `CloudAttach/`.
#[derive(Debug, Clone)]
pub struct CloudItem {
    pub meta: MessageMeta,
    pub file: CloudFile,
}

/// The three migration batches of one task, in phase order.
#[derive(Debug, Clone, Default)]
pub struct ClassifiedBatches {
    pub raw: Vec<RawItem>,
    pub attachments: Vec<AttachmentItem>,
    pub cloud: Vec<CloudItem>,
}

impl ClassifiedBatches {
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty() && self.attachments.is_empty() && self.cloud.is_empty()
    }

    /// Projected payload bytes across all three batches. Cloud sizes
    /// come from the provider's declared size, not the wire transfer.
    pub fn payload_bytes(&self) -> u64 {
        let raw: u64 = self.raw.iter().map(|i| i.size).sum();
        let direct: u64 = self.attachments.iter().map(|i| i.data.len() as u64).sum();
        let cloud: u64 = self.cloud.iter().map(|i| i.file.size_bytes()).sum();
        raw + direct + cloud
    }

    /// Attachments that will grow the full-text index.
    pub fn attachment_count(&self) -> u64 {
        (self.attachments.len() + self.cloud.len()) as u64
    }
}

/// Walks the task's staged messages and builds its migration batches.
///
/// Per-message failures (unreadable file, missing date, mailbox not
/// derivable) skip that message and never fail classification.
pub fn classify(
    staging: &RawMessageStore,
    task: &BackupTask,
    registry: &ProviderRegistry,
) -> Result<ClassifiedBatches, PipelineError> {
    let parser = MessageParser::new();
    let mut batches = ClassifiedBatches::default();

    for source in staging.staged_messages(&task.account)? {
        let raw = match std::fs::read(&source) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Skipping unreadable staged file '{}': {}", source.display(), e);
                continue;
            }
        };
        let parsed = parser.parse(&raw);

        let Some(date) = parsed.received_date() else {
            debug!("Skipping '{}': no parseable date", source.display());
            continue;
        };
        if date < task.date_start || date > task.date_end {
            continue;
        }
        if !parsed.matches_sender(task.sender_filter.as_deref())
            || !parsed.matches_subject(task.subject_filter.as_deref())
        {
            continue;
        }

        let mailbox = match extract_mailbox(&source.to_string_lossy()) {
            Ok(mailbox) => mailbox,
            Err(e) => {
                warn!("Skipping '{}': {}", source.display(), e);
                continue;
            }
        };
        let uid = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        let meta = MessageMeta {
            uid,
            subject: parsed.subject.clone(),
            sender: parsed.sender.clone(),
            recipients: parsed.recipients.clone(),
            cc: parsed.cc.clone(),
            bcc: parsed.bcc.clone(),
            received_date: parsed.date.clone(),
            mailbox,
            body_text: parsed.body_text(),
        };

        if task.wants(ContentKind::RawMessage) {
            batches.raw.push(RawItem {
                meta: meta.clone(),
                source: source.clone(),
                eml_filename: parsed.eml_filename(),
                size: raw.len() as u64,
                inline: parsed.attachments.clone(),
            });
        }

        if task.wants(ContentKind::Attachment) {
            for attachment in parsed.attachments_matching(task.filename_filter.as_deref()) {
                batches.attachments.push(AttachmentItem {
                    meta: meta.clone(),
                    filename: attachment.filename.clone(),
                    data: attachment.data.clone(),
                });
            }
        }

        if task.wants(ContentKind::CloudAttachment) {
            for file in registry.parse_cloud_links(&parsed.selected_body()) {
                let wanted = task
                    .filename_filter
                    .as_deref()
                    .map_or(true, |k| file.filename.contains(k));
                if wanted {
                    batches.cloud.push(CloudItem {
                        meta: meta.clone(),
                        file,
                    });
                }
            }
        }
    }

    debug!(
        "Classified task '{}': {} raw, {} attachments, {} cloud",
        task.name,
        batches.raw.len(),
        batches.attachments.len(),
        batches.cloud.len()
    );
    Ok(batches)
}
