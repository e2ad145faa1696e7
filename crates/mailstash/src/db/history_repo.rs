//! Run history: one append-only row per executed task run, holding a
//! versioned JSON snapshot of the task as it ran, the outcome, and the
//! target volume. Read back for audit views only; pipeline correctness
//! never depends on it.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::task::BackupTask;

/// Bump when the snapshot layout changes.
pub const HISTORY_SCHEMA_VERSION: i64 = 1;

/// Outcome of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunResult {
    Success,
    Failed(String),
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunResult::Success => write!(f, "Success"),
            RunResult::Failed(reason) => write!(f, "Failed: {reason}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunHistoryEntry {
    pub id: i64,
    pub run_id: String,
    pub version: i64,
    pub task_name: String,
    pub task_json: String,
    pub result: String,
    pub volume: String,
    pub created_at: String,
}

impl RunHistoryEntry {
    /// Deserializes the task as it was when the run executed.
    pub fn task_snapshot(&self) -> Result<BackupTask, DatabaseError> {
        Ok(serde_json::from_str(&self.task_json)?)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<RunHistoryEntry> {
    Ok(RunHistoryEntry {
        id: row.get(0)?,
        run_id: row.get(1)?,
        version: row.get(2)?,
        task_name: row.get(3)?,
        task_json: row.get(4)?,
        result: row.get(5)?,
        volume: row.get(6)?,
        created_at: row.get(7)?,
    })
}

const COLUMNS: &str = "id, run_id, version, task_name, task_json, result, volume, created_at";

/// Appends one run record.
pub fn append(
    db: &Database,
    run_id: &str,
    task: &BackupTask,
    result: &RunResult,
    volume: &str,
) -> Result<i64, DatabaseError> {
    let task_json = serde_json::to_string(task)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO run_history (run_id, version, task_name, task_json, result, volume)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                HISTORY_SCHEMA_VERSION,
                task.name,
                task_json,
                result.to_string(),
                volume,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// All run records, oldest first.
pub fn list(db: &Database) -> Result<Vec<RunHistoryEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM run_history ORDER BY id"))?;
        let rows = stmt.query_map([], map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}

/// Run records for one task name, oldest first.
pub fn list_for_task(db: &Database, task_name: &str) -> Result<Vec<RunHistoryEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM run_history WHERE task_name = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![task_name], map_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(DatabaseError::Sqlite)
    })
}
