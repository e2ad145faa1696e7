//! Email repository — upsert and search over the `emails` table.
//!
//! The upsert enforces the dedup identity `(uid, task_name, mailbox)`:
//! a second extraction of the same logical message reuses the existing
//! row, backfilling `raw_path` only if it was previously unset.

use rusqlite::{params, params_from_iter, Connection, Row};

use super::records::{EmailRecord, NewEmail};
use super::{Database, DatabaseError};

fn map_row(row: &Row) -> rusqlite::Result<EmailRecord> {
    Ok(EmailRecord {
        id: row.get(0)?,
        account: row.get(1)?,
        uid: row.get(2)?,
        subject: row.get(3)?,
        sender: row.get(4)?,
        recipients: row.get(5)?,
        cc: row.get(6)?,
        bcc: row.get(7)?,
        received_date: row.get(8)?,
        task_name: row.get(9)?,
        mailbox: row.get(10)?,
        body_text: row.get(11)?,
        raw_path: row.get(12)?,
    })
}

const COLUMNS: &str = "id, account, uid, subject, sender, recipients, cc, bcc, \
                       received_date, task_name, mailbox, body_text, raw_path";

/// Looks up an email by its dedup identity.
pub fn find_by_identity(
    db: &Database,
    uid: &str,
    task_name: &str,
    mailbox: &str,
) -> Result<Option<EmailRecord>, DatabaseError> {
    db.with_conn(|conn| find_by_identity_on(conn, uid, task_name, mailbox))
}

fn find_by_identity_on(
    conn: &Connection,
    uid: &str,
    task_name: &str,
    mailbox: &str,
) -> Result<Option<EmailRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM emails WHERE uid = ?1 AND task_name = ?2 AND mailbox = ?3"
    ))?;
    let mut rows = stmt.query_map(params![uid, task_name, mailbox], map_row)?;
    match rows.next() {
        Some(Ok(record)) => Ok(Some(record)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Idempotent insert-or-reuse. Re-running the same extraction never
/// creates a second row; an existing row is updated only to backfill a
/// previously unset `raw_path`.
pub fn upsert(db: &Database, candidate: &NewEmail) -> Result<EmailRecord, DatabaseError> {
    db.with_conn(|conn| {
        if let Some(mut existing) =
            find_by_identity_on(conn, &candidate.uid, &candidate.task_name, &candidate.mailbox)?
        {
            let unset = existing
                .raw_path
                .as_deref()
                .map(str::is_empty)
                .unwrap_or(true);
            if unset && candidate.raw_path.is_some() {
                conn.execute(
                    "UPDATE emails SET raw_path = ?1 WHERE id = ?2",
                    params![candidate.raw_path, existing.id],
                )?;
                existing.raw_path = candidate.raw_path.clone();
                log::debug!("Backfilled raw_path for email id={}", existing.id);
            }
            return Ok(existing);
        }

        conn.execute(
            "INSERT INTO emails (account, uid, subject, sender, recipients, cc, bcc, \
             received_date, task_name, mailbox, body_text, raw_path)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                candidate.account,
                candidate.uid,
                candidate.subject,
                candidate.sender,
                candidate.recipients,
                candidate.cc,
                candidate.bcc,
                candidate.received_date,
                candidate.task_name,
                candidate.mailbox,
                candidate.body_text,
                candidate.raw_path,
            ],
        )?;
        let id = conn.last_insert_rowid();
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM emails WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], map_row)?)
    })
}

/// Structured search criteria. Substring fields use `LIKE` containment;
/// the rest are exact or range matches. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct SearchCriteria {
    pub account: Option<String>,
    pub task_name: Option<String>,
    pub mailbox: Option<String>,
    pub subject_contains: Option<String>,
    pub sender_contains: Option<String>,
    pub recipients_contains: Option<String>,
    pub cc_contains: Option<String>,
    pub bcc_contains: Option<String>,
    pub body_contains: Option<String>,
    /// Inclusive ISO date bounds on `received_date`.
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

impl SearchCriteria {
    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut args = Vec::new();

        let mut exact = |column: &str, value: &Option<String>| {
            if let Some(v) = value {
                args.push(v.clone());
                clauses.push(format!("{} = ?{}", column, args.len()));
            }
        };
        exact("account", &self.account);
        exact("task_name", &self.task_name);
        exact("mailbox", &self.mailbox);

        let mut like = |column: &str, value: &Option<String>| {
            if let Some(v) = value {
                args.push(format!("%{}%", v));
                clauses.push(format!("{} LIKE ?{}", column, args.len()));
            }
        };
        like("subject", &self.subject_contains);
        like("sender", &self.sender_contains);
        like("recipients", &self.recipients_contains);
        like("cc", &self.cc_contains);
        like("bcc", &self.bcc_contains);
        like("body_text", &self.body_contains);

        if let Some(from) = &self.date_from {
            args.push(from.clone());
            clauses.push(format!("received_date >= ?{}", args.len()));
        }
        if let Some(to) = &self.date_to {
            args.push(to.clone());
            clauses.push(format!("received_date <= ?{}", args.len()));
        }

        if clauses.is_empty() {
            (String::new(), args)
        } else {
            (format!(" WHERE {}", clauses.join(" AND ")), args)
        }
    }
}

/// All emails matching the criteria, ordered by id.
pub fn search(db: &Database, criteria: &SearchCriteria) -> Result<Vec<EmailRecord>, DatabaseError> {
    let (clause, args) = criteria.where_clause();
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM emails{clause} ORDER BY id"
        ))?;
        let rows = stmt.query_map(params_from_iter(args.iter()), map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}

/// Paged variant: returns `(rows, total_count, page_count)` for a
/// 1-based `page`.
pub fn search_paged(
    db: &Database,
    criteria: &SearchCriteria,
    page: u64,
    page_size: u64,
) -> Result<(Vec<EmailRecord>, u64, u64), DatabaseError> {
    let page_size = page_size.max(1);
    let page = page.max(1);
    let (clause, args) = criteria.where_clause();

    db.with_conn(|conn| {
        let total: u64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM emails{clause}"),
            params_from_iter(args.iter()),
            |r| r.get(0),
        )?;
        let page_count = total.div_ceil(page_size);

        let offset = (page - 1) * page_size;
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM emails{clause} ORDER BY id LIMIT {page_size} OFFSET {offset}"
        ))?;
        let rows = stmt
            .query_map(params_from_iter(args.iter()), map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((rows, total, page_count))
    })
}
