//! Step status repository — one row per (job, step).

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw step status row.
#[derive(Debug, Clone)]
pub struct StepRow {
    pub job_id: String,
    pub step: String,
    pub status: String,
    pub error: Option<String>,
    pub updated_at: String,
}

impl StepRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            job_id: row.get("job_id")?,
            step: row.get("step")?,
            status: row.get("status")?,
            error: row.get("error")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Reads the status string for one (job, step); `None` if no record yet.
pub fn get(db: &Database, job_id: &str, step: &str) -> Result<Option<StepRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM step_status WHERE job_id = ?1 AND step = ?2",
                params![job_id, step],
                StepRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Writes the status for one (job, step), creating the record on first
/// touch. Each call is one durably-committed statement.
pub fn upsert(
    db: &Database,
    job_id: &str,
    step: &str,
    status: &str,
    error: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO step_status (job_id, step, status, error, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id, step) DO UPDATE SET
               status = excluded.status,
               error = excluded.error,
               updated_at = excluded.updated_at",
            params![job_id, step, status, error, now],
        )?;
        Ok(())
    })
}

/// All step records for a job, in insertion order. For inspection tooling.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<StepRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT * FROM step_status WHERE job_id = ?1 ORDER BY rowid")?;
        let rows: Vec<StepRow> = stmt
            .query_map(params![job_id], StepRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
