//! Attachment repository — upsert and lookups over the `attachments`
//! table. Same backfill-only upsert shape as the email repository, with
//! the `'None'` path sentinel standing in for "not materialized".

use rusqlite::{params, Connection, Row};

use super::records::{path_from_db, path_to_db, AttachmentKind, AttachmentRecord, NewAttachment};
use super::{Database, DatabaseError};

fn map_row(row: &Row) -> rusqlite::Result<AttachmentRecord> {
    let kind: String = row.get(3)?;
    Ok(AttachmentRecord {
        id: row.get(0)?,
        email_id: row.get(1)?,
        filename: row.get(2)?,
        kind: AttachmentKind::from_str(&kind).unwrap_or(AttachmentKind::Attach),
        storage_path: path_from_db(row.get(4)?),
    })
}

const COLUMNS: &str = "id, email_id, filename, kind, storage_path";

fn find_by_identity_on(
    conn: &Connection,
    email_id: i64,
    filename: &str,
    kind: AttachmentKind,
) -> Result<Option<AttachmentRecord>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {COLUMNS} FROM attachments WHERE email_id = ?1 AND filename = ?2 AND kind = ?3"
    ))?;
    let mut rows = stmt.query_map(params![email_id, filename, kind.as_str()], map_row)?;
    match rows.next() {
        Some(Ok(record)) => Ok(Some(record)),
        Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
        None => Ok(None),
    }
}

/// Idempotent insert-or-reuse keyed on `(email_id, filename, kind)`.
/// An existing row whose path is the unset sentinel is backfilled when
/// the candidate carries a real path; otherwise the row is untouched.
pub fn upsert(db: &Database, candidate: &NewAttachment) -> Result<AttachmentRecord, DatabaseError> {
    db.with_conn(|conn| {
        if let Some(mut existing) =
            find_by_identity_on(conn, candidate.email_id, &candidate.filename, candidate.kind)?
        {
            if existing.storage_path.is_none() && candidate.storage_path.is_some() {
                conn.execute(
                    "UPDATE attachments SET storage_path = ?1 WHERE id = ?2",
                    params![path_to_db(&candidate.storage_path), existing.id],
                )?;
                existing.storage_path = candidate.storage_path.clone();
                log::debug!("Backfilled storage_path for attachment id={}", existing.id);
            }
            return Ok(existing);
        }

        conn.execute(
            "INSERT INTO attachments (email_id, filename, kind, storage_path)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                candidate.email_id,
                candidate.filename,
                candidate.kind.as_str(),
                path_to_db(&candidate.storage_path),
            ],
        )?;
        let id = conn.last_insert_rowid();
        let mut stmt =
            conn.prepare(&format!("SELECT {COLUMNS} FROM attachments WHERE id = ?1"))?;
        Ok(stmt.query_row(params![id], map_row)?)
    })
}

/// All attachments of one email.
pub fn for_email(db: &Database, email_id: i64) -> Result<Vec<AttachmentRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM attachments WHERE email_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![email_id], map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}

/// Materialized storage paths for a set of emails; used to scope
/// full-text queries to a relational result set.
pub fn paths_for_emails(db: &Database, email_ids: &[i64]) -> Result<Vec<String>, DatabaseError> {
    if email_ids.is_empty() {
        return Ok(Vec::new());
    }
    db.with_conn(|conn| {
        let placeholders = (1..=email_ids.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut stmt = conn.prepare(&format!(
            "SELECT storage_path FROM attachments
             WHERE email_id IN ({placeholders}) AND storage_path != 'None'"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(email_ids.iter()), |r| {
            r.get::<_, String>(0)
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}
