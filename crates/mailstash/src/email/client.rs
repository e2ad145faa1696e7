//! IMAP client: the mail-transport collaborator that fills the raw
//! message staging store.

use async_imap::Session;
use async_native_tls::TlsConnector;
use chrono::{Days, NaiveDate};
use futures_util::StreamExt;
use log::{debug, info, warn};
use secrecy::ExposeSecret;

use crate::storage::RawMessageStore;
use crate::task::{AccountConfig, BackupTask};

use super::error::{EmailError, Result};
use super::utf7::decode_modified_utf7;

/// Type alias for the underlying async stream (async-std compatible TcpStream).
type AsyncTcpStream = async_io::Async<std::net::TcpStream>;

/// Type alias for the TLS stream used by the IMAP session.
type TlsStream = async_native_tls::TlsStream<AsyncTcpStream>;

/// Builds an IMAP SEARCH criteria string for a task's date range and
/// keyword filters. `BEFORE` is exclusive, so the inclusive end date is
/// advanced by one day. No bounds at all collapses to `ALL`.
pub fn build_search_criteria(
    date_start: Option<NaiveDate>,
    date_end: Option<NaiveDate>,
    sender_filter: Option<&str>,
    subject_filter: Option<&str>,
) -> String {
    let mut criteria = Vec::new();

    if let Some(start) = date_start {
        criteria.push(format!("SINCE {}", start.format("%d-%b-%Y")));
    }
    if let Some(end) = date_end {
        let exclusive = end.checked_add_days(Days::new(1)).unwrap_or(end);
        criteria.push(format!("BEFORE {}", exclusive.format("%d-%b-%Y")));
    }
    if let Some(sender) = sender_filter {
        criteria.push(format!("FROM \"{}\"", sender));
    }
    if let Some(subject) = subject_filter {
        criteria.push(format!("SUBJECT \"{}\"", subject));
    }

    if criteria.is_empty() {
        "ALL".to_string()
    } else {
        criteria.join(" ")
    }
}

/// IMAP client bound to one account.
pub struct ImapClient {
    session: Option<Session<TlsStream>>,
    account: AccountConfig,
}

impl ImapClient {
    pub fn new(account: AccountConfig) -> Self {
        Self {
            session: None,
            account,
        }
    }

    /// Connects to the IMAP server over TLS and logs in.
    pub async fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            debug!("Already connected to IMAP server");
            return Ok(());
        }

        let addr = format!("{}:{}", self.account.imap_host, self.account.imap_port);
        info!("Connecting to IMAP server at {}", addr);

        let std_stream = std::net::TcpStream::connect(&addr)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;
        std_stream
            .set_nonblocking(true)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;
        let tcp_stream = async_io::Async::new(std_stream)
            .map_err(|e| EmailError::ConnectionFailed(e.to_string()))?;

        let tls = TlsConnector::new();
        let tls_stream = tls
            .connect(&self.account.imap_host, tcp_stream)
            .await
            .map_err(|e| EmailError::TlsError(e.to_string()))?;

        let client = async_imap::Client::new(tls_stream);
        let session = client
            .login(
                &self.account.email_address,
                self.account.password.expose_secret(),
            )
            .await
            .map_err(|(e, _)| EmailError::AuthenticationFailed(e.to_string()))?;

        info!("Authenticated as {}", self.account.email_address);
        self.session = Some(session);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn session(&mut self) -> Result<&mut Session<TlsStream>> {
        self.session
            .as_mut()
            .ok_or_else(|| EmailError::ConnectionFailed("Not connected".to_string()))
    }

    /// Lists all folders, decoding modified UTF-7 names to Unicode.
    pub async fn list_folders(&mut self) -> Result<Vec<String>> {
        let session = self.session()?;

        let mut names = Vec::new();
        {
            let mut stream = session
                .list(None, Some("*"))
                .await
                .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
            while let Some(item) = stream.next().await {
                let name = item.map_err(|e| EmailError::ProtocolError(e.to_string()))?;
                names.push(decode_modified_utf7(name.name()));
            }
        }

        debug!("Server reports {} folders", names.len());
        Ok(names)
    }

    /// Fetches every message in `folder` matching the task's date range
    /// and keyword filters, staging each raw blob as `<uid>.eml` under
    /// the task's account. Returns the number of staged messages.
    ///
    /// Uses EXAMINE (read-only) and BODY.PEEK[] so the mailbox is never
    /// modified and messages are not marked as read.
    pub async fn fetch_matching(
        &mut self,
        folder: &str,
        task: &BackupTask,
        store: &RawMessageStore,
    ) -> Result<u32> {
        let account = self.account.email_address.clone();
        let session = self.session()?;

        session.examine(folder).await.map_err(|e| {
            let text = e.to_string();
            if text.contains("NO") || text.contains("doesn't exist") {
                EmailError::FolderNotFound(folder.to_string())
            } else {
                EmailError::ProtocolError(text)
            }
        })?;

        let criteria = build_search_criteria(
            Some(task.date_start),
            Some(task.date_end),
            task.sender_filter.as_deref(),
            task.subject_filter.as_deref(),
        );
        debug!("Searching '{}' with criteria: {}", folder, criteria);

        let uids = session
            .uid_search(&criteria)
            .await
            .map_err(|e| EmailError::ProtocolError(e.to_string()))?;

        let mut staged = 0u32;
        for uid in uids {
            let raw = {
                let mut messages = session
                    .uid_fetch(uid.to_string(), "BODY.PEEK[]")
                    .await
                    .map_err(|e| EmailError::ProtocolError(e.to_string()))?;
                let message = match messages.next().await {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("Fetch of UID {} failed: {}", uid, e);
                        continue;
                    }
                    None => {
                        warn!("Server returned nothing for UID {}", uid);
                        continue;
                    }
                };
                match message.body() {
                    Some(body) => body.to_vec(),
                    None => {
                        warn!("UID {} has no body", uid);
                        continue;
                    }
                }
            };

            store.store_raw(&account, folder, &format!("{uid}.eml"), &raw)?;
            staged += 1;
        }

        info!("Staged {} messages from '{}'", staged, folder);
        Ok(staged)
    }

    /// Logs out and drops the session.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.logout().await {
                warn!("IMAP logout failed: {}", e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_criteria_dates() {
        let criteria = build_search_criteria(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            NaiveDate::from_ymd_opt(2024, 3, 31),
            None,
            None,
        );
        // End bound is exclusive, hence the next day.
        assert_eq!(criteria, "SINCE 01-Jan-2024 BEFORE 01-Apr-2024");
    }

    #[test]
    fn test_build_search_criteria_with_filters() {
        let criteria = build_search_criteria(
            NaiveDate::from_ymd_opt(2024, 1, 1),
            None,
            Some("boss@example.com"),
            Some("report"),
        );
        assert_eq!(
            criteria,
            "SINCE 01-Jan-2024 FROM \"boss@example.com\" SUBJECT \"report\""
        );
    }

    #[test]
    fn test_build_search_criteria_empty_is_all() {
        assert_eq!(build_search_criteria(None, None, None, None), "ALL");
    }
}
