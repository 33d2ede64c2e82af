//! Operation duration repository. Last write wins on the natural key,
//! so replaying events or running a backfill converges to the same row.

use rusqlite::{params, OptionalExtension};

use super::{now_rfc3339, Database, DatabaseError};

/// A measured (or unmeasurable: `duration_seconds` NULL) operation
/// duration for one (job, version, operation).
#[derive(Debug, Clone, PartialEq)]
pub struct DurationRecord {
    pub job_id: String,
    pub version_tag: String,
    pub operation_id: String,
    pub duration_seconds: Option<f64>,
    pub started_at: Option<String>,
    pub completed_at: String,
}

/// Upserts a duration row. An unmeasurable duration is stored as NULL,
/// never coerced to zero, so averages over this table stay honest.
pub fn upsert(db: &Database, record: &DurationRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_operation_durations
               (job_id, version_tag, operation_id, duration_seconds, started_at, completed_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(job_id, version_tag, operation_id) DO UPDATE SET
               duration_seconds = excluded.duration_seconds,
               started_at = excluded.started_at,
               completed_at = excluded.completed_at,
               updated_at = excluded.updated_at",
            params![
                record.job_id,
                record.version_tag,
                record.operation_id,
                record.duration_seconds,
                record.started_at,
                record.completed_at,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    })
}

/// Reads one duration row, if present.
pub fn get(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    operation_id: &str,
) -> Result<Option<DurationRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT job_id, version_tag, operation_id, duration_seconds, started_at, completed_at
                 FROM job_operation_durations
                 WHERE job_id = ?1 AND version_tag = ?2 AND operation_id = ?3",
                params![job_id, version_tag, operation_id],
                |r| {
                    Ok(DurationRecord {
                        job_id: r.get(0)?,
                        version_tag: r.get(1)?,
                        operation_id: r.get(2)?,
                        duration_seconds: r.get(3)?,
                        started_at: r.get(4)?,
                        completed_at: r.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    })
}
