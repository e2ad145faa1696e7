//! Backup statistics: per-account email/attachment/cloud counts.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStats {
    pub account: String,
    pub email_count: i64,
    pub attachment_count: i64,
    pub cloud_count: i64,
}

fn map_row(row: &Row) -> rusqlite::Result<AccountStats> {
    Ok(AccountStats {
        account: row.get(0)?,
        email_count: row.get(1)?,
        attachment_count: row.get(2)?,
        cloud_count: row.get(3)?,
    })
}

const GROUPED: &str = "SELECT e.account,
        COUNT(DISTINCT e.id),
        COALESCE(SUM(CASE WHEN a.kind = 'Attach' THEN 1 ELSE 0 END), 0),
        COALESCE(SUM(CASE WHEN a.kind = 'CloudAttach' THEN 1 ELSE 0 END), 0)
    FROM emails e
    LEFT JOIN attachments a ON a.email_id = e.id";

/// Per-account counts for one task.
pub fn for_task(db: &Database, task_name: &str) -> Result<Vec<AccountStats>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{GROUPED} WHERE e.task_name = ?1 GROUP BY e.account ORDER BY e.account"
        ))?;
        let rows = stmt.query_map(params![task_name], map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}

/// Per-account counts across every task on the volume.
pub fn all(db: &Database) -> Result<Vec<AccountStats>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare(&format!("{GROUPED} GROUP BY e.account ORDER BY e.account"))?;
        let rows = stmt.query_map([], map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::records::{AttachmentKind, NewAttachment, NewEmail};
    use crate::db::{attachment_repo, email_repo};

    fn seed(db: &Database, account: &str, uid: &str, task: &str, attach: u32, cloud: u32) {
        let email = email_repo::upsert(
            db,
            &NewEmail {
                account: account.to_string(),
                uid: uid.to_string(),
                subject: String::new(),
                sender: String::new(),
                recipients: String::new(),
                cc: String::new(),
                bcc: String::new(),
                received_date: None,
                task_name: task.to_string(),
                mailbox: "INBOX".to_string(),
                body_text: String::new(),
                raw_path: None,
            },
        )
        .unwrap();

        for i in 0..attach {
            attachment_repo::upsert(
                db,
                &NewAttachment {
                    email_id: email.id,
                    filename: format!("a{i}.pdf"),
                    kind: AttachmentKind::Attach,
                    storage_path: None,
                },
            )
            .unwrap();
        }
        for i in 0..cloud {
            attachment_repo::upsert(
                db,
                &NewAttachment {
                    email_id: email.id,
                    filename: format!("c{i}.zip"),
                    kind: AttachmentKind::CloudAttach,
                    storage_path: None,
                },
            )
            .unwrap();
        }
    }

    #[test]
    fn test_stats_for_task() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "a@x.com", "1", "T1", 2, 1);
        seed(&db, "a@x.com", "2", "T1", 0, 0);
        seed(&db, "b@x.com", "3", "T1", 1, 0);
        seed(&db, "a@x.com", "4", "T2", 5, 5);

        let stats = for_task(&db, "T1").unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(
            stats[0],
            AccountStats {
                account: "a@x.com".to_string(),
                email_count: 2,
                attachment_count: 2,
                cloud_count: 1,
            }
        );
        assert_eq!(stats[1].account, "b@x.com");
        assert_eq!(stats[1].email_count, 1);
    }

    #[test]
    fn test_stats_all_spans_tasks() {
        let db = Database::open_in_memory().unwrap();
        seed(&db, "a@x.com", "1", "T1", 1, 0);
        seed(&db, "a@x.com", "1", "T2", 1, 1);

        let stats = all(&db).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].email_count, 2);
        assert_eq!(stats[0].attachment_count, 2);
        assert_eq!(stats[0].cloud_count, 1);
    }
}
