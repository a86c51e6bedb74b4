//! Processing record repository.
//!
//! One record per (job, software version), linked through the
//! `job_processing` association. A record is created on a job's first run
//! by a given version and updated — never replaced — on subsequent runs.

use rusqlite::{params, OptionalExtension, Row};
use serde_json::Value;

use super::{Database, DatabaseError};

#[derive(Debug, Clone)]
pub struct ProcessingRow {
    pub id: i64,
    pub software_version: String,
    pub started_at: String,
    pub updated_at: String,
    pub georef_error_m: Option<f64>,
    pub metrics: Value,
}

impl ProcessingRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let metrics_json: String = row.get("metrics")?;
        Ok(Self {
            id: row.get("id")?,
            software_version: row.get("software_version")?,
            started_at: row.get("started_at")?,
            updated_at: row.get("updated_at")?,
            georef_error_m: row.get("georef_error_m")?,
            metrics: serde_json::from_str(&metrics_json).unwrap_or(Value::Null),
        })
    }
}

/// Returns the processing record id for (job, software version), creating
/// the record and its job association on first use.
pub fn ensure(
    db: &Database,
    job_id: &str,
    software_version: &str,
    now: &str,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT p.id FROM processing_records p
                 JOIN job_processing jp ON jp.processing_id = p.id
                 WHERE jp.job_id = ?1 AND p.software_version = ?2",
                params![job_id, software_version],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        conn.execute(
            "INSERT INTO processing_records (software_version, started_at, updated_at)
             VALUES (?1, ?2, ?2)",
            params![software_version, now],
        )?;
        let id = conn.last_insert_rowid();
        conn.execute(
            "INSERT INTO job_processing (job_id, processing_id) VALUES (?1, ?2)",
            params![job_id, id],
        )?;
        Ok(id)
    })
}

/// Merges one metric into the record's metrics object.
pub fn record_metric(
    db: &Database,
    processing_id: i64,
    key: &str,
    value: Value,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let metrics_json: String = conn.query_row(
            "SELECT metrics FROM processing_records WHERE id = ?1",
            params![processing_id],
            |r| r.get(0),
        )?;
        let mut metrics: Value =
            serde_json::from_str(&metrics_json).unwrap_or_else(|_| Value::Object(Default::default()));
        if !metrics.is_object() {
            metrics = Value::Object(Default::default());
        }
        metrics
            .as_object_mut()
            .expect("metrics is an object")
            .insert(key.to_string(), value);

        conn.execute(
            "UPDATE processing_records SET metrics = ?2, updated_at = ?3 WHERE id = ?1",
            params![
                processing_id,
                serde_json::to_string(&metrics).expect("metrics serialize"),
                now
            ],
        )?;
        Ok(())
    })
}

/// Updates the running georeferencing error estimate.
pub fn set_georef_error(
    db: &Database,
    processing_id: i64,
    error_m: f64,
    now: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE processing_records SET georef_error_m = ?2, updated_at = ?3 WHERE id = ?1",
            params![processing_id, error_m, now],
        )?;
        Ok(())
    })
}

/// Loads one processing record.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<ProcessingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM processing_records WHERE id = ?1",
                params![id],
                ProcessingRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// All processing records that touched a job, oldest first.
pub fn list_for_job(db: &Database, job_id: &str) -> Result<Vec<ProcessingRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT p.* FROM processing_records p
             JOIN job_processing jp ON jp.processing_id = p.id
             WHERE jp.job_id = ?1 ORDER BY p.id",
        )?;
        let rows: Vec<ProcessingRow> = stmt
            .query_map(params![job_id], ProcessingRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
