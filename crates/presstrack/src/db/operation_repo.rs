//! Job and imposition operation repositories.
//!
//! Completion writes are idempotent: they UPDATE the pre-created
//! planned row matched by its natural key, so replaying an event
//! overwrites rather than duplicates.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Terminal state applied to an operation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    Completed,
    Aborted,
}

impl CompletionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletionStatus::Completed => "completed",
            CompletionStatus::Aborted => "aborted",
        }
    }
}

/// Which upstream source completed an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletedBy {
    Scanner,
    PrintOs,
}

impl CompletedBy {
    pub fn as_str(self) -> &'static str {
        match self {
            CompletedBy::Scanner => "scanner",
            CompletedBy::PrintOs => "print_os",
        }
    }
}

/// Parameters for marking an operation row completed or aborted.
/// `source_id` and `completed_by` trace back to exactly one upstream
/// event for audit and re-derivation.
#[derive(Debug, Clone)]
pub struct Completion<'a> {
    pub operation_id: &'a str,
    pub status: CompletionStatus,
    pub completed_by: CompletedBy,
    pub source_id: i64,
    pub completed_at: &'a str,
}

/// Pre-creates a planned job operation row. This is the planner
/// collaborator's write; the reconciliation core only updates rows.
pub fn plan_job_operation(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    operation_id: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO job_operations (job_id, version_tag, operation_id, status)
             VALUES (?1, ?2, ?3, 'planned')",
            params![job_id, version_tag, operation_id],
        )?;
        Ok(())
    })
}

/// Pre-creates a planned imposition operation row.
pub fn plan_imposition_operation(
    db: &Database,
    imposition_id: &str,
    operation_id: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO imposition_operations (imposition_id, operation_id, status)
             VALUES (?1, ?2, 'planned')",
            params![imposition_id, operation_id],
        )?;
        Ok(())
    })
}

/// Marks a job operation row completed or aborted. Returns `false`
/// when no planned row matched — the operation was never planned for
/// this job, which is logged and considered handled.
pub fn complete_job_operation(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    completion: &Completion<'_>,
) -> Result<bool, DatabaseError> {
    let with_status = db.capabilities().job_operation_status;
    db.with_conn(|conn| {
        let updated = if with_status {
            conn.execute(
                "UPDATE job_operations
                 SET completed_at = ?4, completed_by = ?5, source_id = ?6, status = ?7
                 WHERE job_id = ?1 AND version_tag = ?2 AND operation_id = ?3",
                params![
                    job_id,
                    version_tag,
                    completion.operation_id,
                    completion.completed_at,
                    completion.completed_by.as_str(),
                    completion.source_id,
                    completion.status.as_str(),
                ],
            )?
        } else {
            conn.execute(
                "UPDATE job_operations
                 SET completed_at = ?4, completed_by = ?5, source_id = ?6
                 WHERE job_id = ?1 AND version_tag = ?2 AND operation_id = ?3",
                params![
                    job_id,
                    version_tag,
                    completion.operation_id,
                    completion.completed_at,
                    completion.completed_by.as_str(),
                    completion.source_id,
                ],
            )?
        };

        if updated == 0 {
            log::warn!(
                "No job_operations row for job_id={} version_tag={} operation_id={} - skipping update",
                job_id,
                version_tag,
                completion.operation_id
            );
        }
        Ok(updated > 0)
    })
}

/// Marks an imposition operation row completed or aborted. Returns
/// `false` when no planned row matched.
pub fn complete_imposition_operation(
    db: &Database,
    imposition_id: &str,
    completion: &Completion<'_>,
) -> Result<bool, DatabaseError> {
    let with_status = db.capabilities().imposition_operation_status;
    db.with_conn(|conn| {
        let updated = if with_status {
            conn.execute(
                "UPDATE imposition_operations
                 SET completed_at = ?3, completed_by = ?4, source_id = ?5, status = ?6
                 WHERE imposition_id = ?1 AND operation_id = ?2",
                params![
                    imposition_id,
                    completion.operation_id,
                    completion.completed_at,
                    completion.completed_by.as_str(),
                    completion.source_id,
                    completion.status.as_str(),
                ],
            )?
        } else {
            conn.execute(
                "UPDATE imposition_operations
                 SET completed_at = ?3, completed_by = ?4, source_id = ?5
                 WHERE imposition_id = ?1 AND operation_id = ?2",
                params![
                    imposition_id,
                    completion.operation_id,
                    completion.completed_at,
                    completion.completed_by.as_str(),
                    completion.source_id,
                ],
            )?
        };

        if updated == 0 {
            log::warn!(
                "No imposition_operations row for imposition_id={} operation_id={} - skipping update",
                imposition_id,
                completion.operation_id
            );
        }
        Ok(updated > 0)
    })
}

/// Distinct version tags currently known for a job.
pub fn version_tags_for_job(db: &Database, job_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT version_tag FROM job_operations
             WHERE job_id = ?1 ORDER BY version_tag",
        )?;
        let tags = stmt
            .query_map(params![job_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tags)
    })
}

/// Operation ids completed for a (job, version).
pub fn completed_operation_ids(
    db: &Database,
    job_id: &str,
    version_tag: &str,
) -> Result<Vec<String>, DatabaseError> {
    let with_status = db.capabilities().job_operation_status;
    db.with_conn(|conn| {
        let sql = if with_status {
            "SELECT operation_id FROM job_operations
             WHERE job_id = ?1 AND version_tag = ?2 AND status = 'completed'"
        } else {
            "SELECT operation_id FROM job_operations
             WHERE job_id = ?1 AND version_tag = ?2 AND completed_at IS NOT NULL"
        };
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map(params![job_id, version_tag], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// Completion timestamp of one completed operation row, if any.
pub fn completed_at(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    operation_id: &str,
) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        let ts: Option<Option<String>> = conn
            .query_row(
                "SELECT completed_at FROM job_operations
                 WHERE job_id = ?1 AND version_tag = ?2 AND operation_id = ?3",
                params![job_id, version_tag, operation_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(ts.flatten())
    })
}

/// Print completion counts across a set of impositions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImpositionPrintStats {
    pub total: i64,
    pub completed: i64,
    pub aborted: i64,
}

/// Counts how many of the given impositions have the print operation
/// completed or aborted.
pub fn imposition_print_stats(
    db: &Database,
    imposition_ids: &[String],
    print_operation_id: &str,
) -> Result<ImpositionPrintStats, DatabaseError> {
    if imposition_ids.is_empty() {
        return Ok(ImpositionPrintStats::default());
    }

    let with_status = db.capabilities().imposition_operation_status;
    db.with_conn(|conn| {
        let placeholders: Vec<String> = (0..imposition_ids.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let counts = if with_status {
            "COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
             COALESCE(SUM(CASE WHEN status = 'aborted' THEN 1 ELSE 0 END), 0)"
        } else {
            "COALESCE(SUM(CASE WHEN completed_at IS NOT NULL THEN 1 ELSE 0 END), 0), 0"
        };
        let sql = format!(
            "SELECT COUNT(*), {} FROM imposition_operations
             WHERE operation_id = ?1 AND imposition_id IN ({})",
            counts,
            placeholders.join(", ")
        );

        let mut param_values: Vec<&dyn rusqlite::types::ToSql> = vec![&print_operation_id];
        for id in imposition_ids {
            param_values.push(id);
        }

        let stats = conn.query_row(&sql, param_values.as_slice(), |row| {
            Ok(ImpositionPrintStats {
                total: row.get(0)?,
                completed: row.get(1)?,
                aborted: row.get(2)?,
            })
        })?;
        Ok(stats)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn completion<'a>(status: CompletionStatus) -> Completion<'a> {
        Completion {
            operation_id: "op001",
            status,
            completed_by: CompletedBy::Scanner,
            source_id: 7,
            completed_at: "2026-01-01T10:00:00Z",
        }
    }

    #[test]
    fn test_complete_planned_job_operation() {
        let db = test_db();
        plan_job_operation(&db, "4604_5889", "1", "op001").unwrap();

        let matched =
            complete_job_operation(&db, "4604_5889", "1", &completion(CompletionStatus::Completed))
                .unwrap();
        assert!(matched);

        let ids = completed_operation_ids(&db, "4604_5889", "1").unwrap();
        assert_eq!(ids, vec!["op001".to_string()]);
        assert_eq!(
            completed_at(&db, "4604_5889", "1", "op001").unwrap().as_deref(),
            Some("2026-01-01T10:00:00Z")
        );
    }

    #[test]
    fn test_complete_unplanned_is_noop() {
        let db = test_db();
        let matched =
            complete_job_operation(&db, "9999_1", "1", &completion(CompletionStatus::Completed))
                .unwrap();
        assert!(!matched);
        assert!(completed_operation_ids(&db, "9999_1", "1").unwrap().is_empty());
    }

    #[test]
    fn test_replay_overwrites_not_duplicates() {
        let db = test_db();
        plan_job_operation(&db, "4604_5889", "1", "op001").unwrap();

        complete_job_operation(&db, "4604_5889", "1", &completion(CompletionStatus::Completed))
            .unwrap();
        complete_job_operation(&db, "4604_5889", "1", &completion(CompletionStatus::Completed))
            .unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM job_operations WHERE job_id = '4604_5889'",
                [],
                |r| r.get(0),
            )?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_aborted_excluded_from_completed() {
        let db = test_db();
        plan_job_operation(&db, "4604_5889", "1", "op001").unwrap();
        complete_job_operation(&db, "4604_5889", "1", &completion(CompletionStatus::Aborted))
            .unwrap();
        assert!(completed_operation_ids(&db, "4604_5889", "1").unwrap().is_empty());
    }

    #[test]
    fn test_version_tags_for_job() {
        let db = test_db();
        plan_job_operation(&db, "4670_5988", "1", "op001").unwrap();
        plan_job_operation(&db, "4670_5988", "2", "op001").unwrap();
        plan_job_operation(&db, "4670_5988", "2", "op002").unwrap();
        plan_job_operation(&db, "other_1", "9", "op001").unwrap();

        let tags = version_tags_for_job(&db, "4670_5988").unwrap();
        assert_eq!(tags, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_imposition_print_stats() {
        let db = test_db();
        let imps = vec!["imp_a".to_string(), "imp_b".to_string(), "imp_c".to_string()];
        for imp in &imps {
            plan_imposition_operation(&db, imp, "op001").unwrap();
        }

        complete_imposition_operation(&db, "imp_a", &completion(CompletionStatus::Completed))
            .unwrap();
        complete_imposition_operation(&db, "imp_b", &completion(CompletionStatus::Aborted))
            .unwrap();

        let stats = imposition_print_stats(&db, &imps, "op001").unwrap();
        assert_eq!(
            stats,
            ImpositionPrintStats {
                total: 3,
                completed: 1,
                aborted: 1,
            }
        );
    }

    #[test]
    fn test_imposition_print_stats_empty_input() {
        let db = test_db();
        let stats = imposition_print_stats(&db, &[], "op001").unwrap();
        assert_eq!(stats, ImpositionPrintStats::default());
    }
}
