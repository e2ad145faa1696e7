//! Row types for the per-volume relational index.

/// Attachment category stored in the `kind` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachmentKind {
    /// A file embedded in the message MIME structure.
    Attach,
    /// A large file referenced by an outside link in the HTML body.
    CloudAttach,
}

impl AttachmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentKind::Attach => "Attach",
            AttachmentKind::CloudAttach => "CloudAttach",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Attach" => Some(AttachmentKind::Attach),
            "CloudAttach" => Some(AttachmentKind::CloudAttach),
            _ => None,
        }
    }
}

/// A stored email row.
#[derive(Debug, Clone)]
pub struct EmailRecord {
    pub id: i64,
    pub account: String,
    /// Provider message UID within its mailbox.
    pub uid: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub cc: String,
    pub bcc: String,
    pub received_date: Option<String>,
    pub task_name: String,
    pub mailbox: String,
    pub body_text: String,
    /// Volume-relative path of the stored raw message; `None` until the
    /// RawMessage category is migrated for this email.
    pub raw_path: Option<String>,
}

/// Candidate email for upsert (no id yet).
#[derive(Debug, Clone)]
pub struct NewEmail {
    pub account: String,
    pub uid: String,
    pub subject: String,
    pub sender: String,
    pub recipients: String,
    pub cc: String,
    pub bcc: String,
    pub received_date: Option<String>,
    pub task_name: String,
    pub mailbox: String,
    pub body_text: String,
    pub raw_path: Option<String>,
}

/// A stored attachment row. `storage_path == None` maps to the `'None'`
/// sentinel in the database: content not yet materialized.
#[derive(Debug, Clone)]
pub struct AttachmentRecord {
    pub id: i64,
    pub email_id: i64,
    pub filename: String,
    pub kind: AttachmentKind,
    pub storage_path: Option<String>,
}

/// Candidate attachment for upsert.
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub email_id: i64,
    pub filename: String,
    pub kind: AttachmentKind,
    pub storage_path: Option<String>,
}

/// Sentinel stored in `attachments.storage_path` for "not materialized".
pub const PATH_UNSET: &str = "None";

pub(crate) fn path_to_db(path: &Option<String>) -> String {
    path.clone().unwrap_or_else(|| PATH_UNSET.to_string())
}

pub(crate) fn path_from_db(value: String) -> Option<String> {
    if value == PATH_UNSET || value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [AttachmentKind::Attach, AttachmentKind::CloudAttach] {
            assert_eq!(AttachmentKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(AttachmentKind::from_str("Other"), None);
    }

    #[test]
    fn test_path_sentinel_mapping() {
        assert_eq!(path_to_db(&None), "None");
        assert_eq!(path_from_db("None".to_string()), None);
        assert_eq!(path_from_db(String::new()), None);
        assert_eq!(
            path_from_db("MailStash/a.pdf".to_string()),
            Some("MailStash/a.pdf".to_string())
        );
    }
}
