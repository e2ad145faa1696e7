//! Mail-transport seam for the task runner.
//!
//! A run begins by pulling the task's messages off the server into the
//! staging store; everything downstream works from staged blobs. The
//! trait keeps runs testable without a live IMAP server, the shipped
//! implementation drives [`ImapClient`].

use std::collections::HashMap;

use async_trait::async_trait;
use log::info;

use crate::email::{EmailError, ImapClient};
use crate::storage::RawMessageStore;
use crate::task::{AccountConfig, BackupTask};

/// Supplies the raw messages a task will migrate.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Stages every message matching `task` under its account in
    /// `staging`. Returns the number of staged messages.
    async fn fetch_into(
        &self,
        task: &BackupTask,
        staging: &RawMessageStore,
    ) -> Result<u32, EmailError>;
}

/// IMAP-backed source holding the credentials of every known account.
pub struct ImapSource {
    accounts: HashMap<String, AccountConfig>,
}

impl ImapSource {
    pub fn new(accounts: impl IntoIterator<Item = AccountConfig>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.email_address.clone(), account))
                .collect(),
        }
    }
}

#[async_trait]
impl MessageSource for ImapSource {
    async fn fetch_into(
        &self,
        task: &BackupTask,
        staging: &RawMessageStore,
    ) -> Result<u32, EmailError> {
        let account = self
            .accounts
            .get(&task.account)
            .ok_or_else(|| EmailError::UnknownAccount(task.account.clone()))?;

        let mut client = ImapClient::new(account.clone());
        client.connect().await?;
        let mut staged = 0;
        for folder in &task.folders {
            staged += client.fetch_matching(folder, task, staging).await?;
        }
        client.disconnect().await?;

        info!("Fetched {} messages for task '{}'", staged, task.name);
        Ok(staged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::ContentKind;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_unknown_account_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let staging = RawMessageStore::new(tmp.path());
        let source = ImapSource::new(vec![]);

        let task = BackupTask {
            id: 1,
            name: "T1".to_string(),
            account: "nobody@example.com".to_string(),
            folders: vec!["INBOX".to_string()],
            date_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            date_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            content_kinds: vec![ContentKind::RawMessage],
            sender_filter: None,
            subject_filter: None,
            filename_filter: None,
        };

        let err = source.fetch_into(&task, &staging).await.unwrap_err();
        assert!(matches!(err, EmailError::UnknownAccount(_)));
        assert!(err.to_string().contains("nobody@example.com"));
    }
}
