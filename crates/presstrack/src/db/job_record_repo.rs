//! Job record repository.
//!
//! The `jobs` table is owned by order intake; reconciliation only
//! annotates existing rows. The `operations` column is a JSON object of
//! boolean progress flags keyed by operation code, read-modified-written
//! under the connection lock.

use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value};

use super::{now_rfc3339, Database, DatabaseError};
use crate::status::JobStatus;

/// A job row as order intake creates it. Progress flags and the derived
/// status start empty.
pub fn create_job(db: &Database, job_id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = now_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO jobs (job_id, status, created_at, updated_at)
             VALUES (?1, 'pending', ?2, ?2)",
            params![job_id, now],
        )?;
        Ok(())
    })
}

/// Sets one boolean progress flag inside the job's `operations` JSON.
/// Setting a flag to true also promotes a 'pending' job to 'started'.
/// Returns `false` when the job row does not exist, which is logged and
/// considered handled.
pub fn set_operation_flag(
    db: &Database,
    job_id: &str,
    flag: &str,
    value: bool,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let existing: Option<(Option<String>, Option<String>)> = conn
            .query_row(
                "SELECT operations, status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;

        let Some((operations, status)) = existing else {
            log::warn!("No jobs row for job_id={} - skipping flag update", job_id);
            return Ok(false);
        };

        let mut flags: Map<String, Value> = operations
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default();
        flags.insert(flag.to_string(), Value::Bool(value));
        let serialized = serde_json::to_string(&Value::Object(flags))?;

        let status = if value && status.as_deref() == Some("pending") {
            Some("started".to_string())
        } else {
            status
        };

        conn.execute(
            "UPDATE jobs SET operations = ?2, status = ?3, updated_at = ?4 WHERE job_id = ?1",
            params![job_id, serialized, status, now_rfc3339()],
        )?;
        Ok(true)
    })
}

/// Stores the derived aggregate status. Returns `false` when the job
/// row does not exist.
pub fn set_current_status(
    db: &Database,
    job_id: &str,
    status: JobStatus,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let updated = conn.execute(
            "UPDATE jobs SET current_status = ?2, updated_at = ?3 WHERE job_id = ?1",
            params![job_id, status.as_str(), now_rfc3339()],
        )?;
        if updated == 0 {
            log::warn!("No jobs row for job_id={} - skipping status update", job_id);
        }
        Ok(updated > 0)
    })
}

/// Progress flags currently set on a job, or `None` if the job row
/// does not exist.
pub fn operation_flags(
    db: &Database,
    job_id: &str,
) -> Result<Option<Map<String, Value>>, DatabaseError> {
    db.with_conn(|conn| {
        let operations: Option<Option<String>> = conn
            .query_row(
                "SELECT operations FROM jobs WHERE job_id = ?1",
                params![job_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(operations.map(|raw| {
            raw.as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default()
        }))
    })
}

/// Lifecycle status and derived status of a job, for inspection.
pub fn job_statuses(
    db: &Database,
    job_id: &str,
) -> Result<Option<(Option<String>, Option<String>)>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT status, current_status FROM jobs WHERE job_id = ?1",
                params![job_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        Ok(row)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_flag_on_missing_job_is_noop() {
        let db = test_db();
        assert!(!set_operation_flag(&db, "4604_5889", "print", true).unwrap());
        assert!(operation_flags(&db, "4604_5889").unwrap().is_none());
    }

    #[test]
    fn test_set_flag_promotes_pending_to_started() {
        let db = test_db();
        create_job(&db, "4604_5889").unwrap();

        assert!(set_operation_flag(&db, "4604_5889", "print", true).unwrap());
        let flags = operation_flags(&db, "4604_5889").unwrap().unwrap();
        assert_eq!(flags.get("print"), Some(&Value::Bool(true)));

        let (status, _) = job_statuses(&db, "4604_5889").unwrap().unwrap();
        assert_eq!(status.as_deref(), Some("started"));
    }

    #[test]
    fn test_false_flag_does_not_promote() {
        let db = test_db();
        create_job(&db, "4604_5889").unwrap();

        set_operation_flag(&db, "4604_5889", "print", false).unwrap();
        let (status, _) = job_statuses(&db, "4604_5889").unwrap().unwrap();
        assert_eq!(status.as_deref(), Some("pending"));
    }

    #[test]
    fn test_flags_accumulate() {
        let db = test_db();
        create_job(&db, "4604_5889").unwrap();

        set_operation_flag(&db, "4604_5889", "print", true).unwrap();
        set_operation_flag(&db, "4604_5889", "coat", true).unwrap();

        let flags = operation_flags(&db, "4604_5889").unwrap().unwrap();
        assert_eq!(flags.get("print"), Some(&Value::Bool(true)));
        assert_eq!(flags.get("coat"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_set_current_status() {
        let db = test_db();
        create_job(&db, "4604_5889").unwrap();

        assert!(set_current_status(&db, "4604_5889", JobStatus::Printed).unwrap());
        let (_, current) = job_statuses(&db, "4604_5889").unwrap().unwrap();
        assert_eq!(current.as_deref(), Some("printed"));

        assert!(!set_current_status(&db, "missing", JobStatus::Printed).unwrap());
    }
}
