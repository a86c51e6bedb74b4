//! Job repository — CRUD and claiming for the `jobs` table.

use std::path::PathBuf;

use rusqlite::{params, OptionalExtension, Row};

use crate::queue::job::ClaimedJob;

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub location: String,
    pub settings_group: Option<i64>,
    pub status: String,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            location: row.get("location")?,
            settings_group: row.get("settings_group")?,
            status: row.get("status")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
        })
    }
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, location, settings_group, status, error,
             created_at, updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                job.id,
                job.location,
                job.settings_group,
                job.status,
                job.error,
                job.created_at,
                job.updated_at,
                job.completed_at,
            ],
        )?;
        Ok(())
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE id = ?1",
                params![id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Counts jobs with the given status.
pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

/// Claims the oldest pending job in a single UPDATE, moving it to
/// `processing`. The write is atomic at the SQLite level, so two pollers
/// on the same database never claim the same job.
pub fn claim_next(db: &Database, now: &str) -> Result<Option<ClaimedJob>, DatabaseError> {
    db.with_conn(|conn| {
        let claimed = conn
            .query_row(
                "UPDATE jobs SET status = 'processing', updated_at = ?1
                 WHERE id = (SELECT id FROM jobs WHERE status = 'pending'
                             ORDER BY created_at, id LIMIT 1)
                 RETURNING id, location, settings_group",
                params![now],
                |row| {
                    Ok(ClaimedJob {
                        id: row.get(0)?,
                        location: PathBuf::from(row.get::<_, String>(1)?),
                        settings_group: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(claimed)
    })
}

/// Records the final status of a processed job.
pub fn finish(
    db: &Database,
    id: &str,
    status: &str,
    error: Option<&str>,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE jobs SET status = ?2, error = ?3, updated_at = ?4, completed_at = ?4
             WHERE id = ?1",
            params![id, status, error, now],
        )?;
        Ok(())
    })
}
