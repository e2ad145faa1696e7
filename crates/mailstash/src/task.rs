//! Backup task model.
//!
//! A `BackupTask` describes one subset of one account to back up: which
//! folders, which date range, which content categories, and optional
//! keyword filters. Tasks are immutable once a run starts; run history
//! stores a JSON snapshot of the task as executed.

use chrono::NaiveDate;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Content categories a task may back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentKind {
    RawMessage,
    Attachment,
    CloudAttachment,
}

/// IMAP account connection settings. Credentials never enter task
/// snapshots; only the address is referenced from `BackupTask`.
#[derive(Debug, Clone)]
pub struct AccountConfig {
    pub email_address: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub password: SecretString,
}

impl AccountConfig {
    pub fn new(
        email_address: impl Into<String>,
        imap_host: impl Into<String>,
        imap_port: u16,
        password: SecretString,
    ) -> Self {
        Self {
            email_address: email_address.into(),
            imap_host: imap_host.into(),
            imap_port,
            password,
        }
    }
}

/// One user-defined backup specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: i64,
    /// Unique display name; also the top-level storage folder for the
    /// task's content on the target volume.
    pub name: String,
    /// Account email address this task backs up.
    pub account: String,
    /// Ordered mailbox folder paths to fetch, e.g. `["INBOX", "Sent"]`.
    pub folders: Vec<String>,
    /// Inclusive date range.
    pub date_start: NaiveDate,
    pub date_end: NaiveDate,
    /// Which content categories to migrate.
    pub content_kinds: Vec<ContentKind>,
    /// Case-sensitive substring filters; `None` matches everything.
    pub sender_filter: Option<String>,
    pub subject_filter: Option<String>,
    pub filename_filter: Option<String>,
}

impl BackupTask {
    pub fn wants(&self, kind: ContentKind) -> bool {
        self.content_kinds.contains(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> BackupTask {
        BackupTask {
            id: 1,
            name: "Quarterly".to_string(),
            account: "user@example.com".to_string(),
            folders: vec!["INBOX".to_string()],
            date_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            content_kinds: vec![ContentKind::RawMessage, ContentKind::Attachment],
            sender_filter: None,
            subject_filter: Some("report".to_string()),
            filename_filter: None,
        }
    }

    #[test]
    fn test_wants_content_kind() {
        let t = task();
        assert!(t.wants(ContentKind::RawMessage));
        assert!(t.wants(ContentKind::Attachment));
        assert!(!t.wants(ContentKind::CloudAttachment));
    }

    #[test]
    fn test_task_snapshot_round_trip() {
        let t = task();
        let json = serde_json::to_string(&t).unwrap();
        let back: BackupTask = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, t.name);
        assert_eq!(back.folders, t.folders);
        assert_eq!(back.date_start, t.date_start);
        assert_eq!(back.content_kinds, t.content_kinds);
    }
}
