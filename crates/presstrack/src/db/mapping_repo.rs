//! Imposition and runlist mapping repositories.
//!
//! These tables are written by the production planner collaborator and
//! read by the reconciliation passes to fan identifiers out: a runlist
//! to its impositions, an imposition to its member files, a (job,
//! version) to every imposition carrying one of its files.

use rusqlite::params;

use super::{Database, DatabaseError};
use crate::resolver;

/// Records that a file is a member of an imposition. Idempotent on the
/// (imposition, file) pair.
pub fn record_file_mapping(
    db: &Database,
    imposition_id: &str,
    file_id: &str,
    sequence_order: i64,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO imposition_file_mapping (imposition_id, file_id, sequence_order)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(imposition_id, file_id) DO UPDATE SET
               sequence_order = excluded.sequence_order",
            params![imposition_id, file_id, sequence_order],
        )?;
        Ok(())
    })
}

/// Records that a runlist produced an imposition. Idempotent.
pub fn record_runlist_path(
    db: &Database,
    runlist_id: &str,
    imposition_id: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO production_planner_paths (runlist_id, imposition_id)
             VALUES (?1, ?2)",
            params![runlist_id, imposition_id],
        )?;
        Ok(())
    })
}

/// File ids belonging to an imposition, in sequence order.
pub fn files_for_imposition(
    db: &Database,
    imposition_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT file_id FROM imposition_file_mapping
             WHERE imposition_id = ?1 ORDER BY sequence_order, file_id",
        )?;
        let files = stmt
            .query_map(params![imposition_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(files)
    })
}

/// Impositions produced by a runlist.
pub fn impositions_for_runlist(
    db: &Database,
    runlist_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT imposition_id FROM production_planner_paths
             WHERE runlist_id = ?1 ORDER BY imposition_id",
        )?;
        let imps = stmt
            .query_map(params![runlist_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(imps)
    })
}

/// Whether a runlist id exists exactly as given.
pub fn runlist_exists(db: &Database, runlist_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM production_planner_paths WHERE runlist_id = ?1",
            params![runlist_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Known runlist ids containing the given text, for partial-match scan
/// classification. The caller decides what one, several or zero
/// candidates mean.
pub fn runlists_matching(db: &Database, partial: &str) -> Result<Vec<String>, DatabaseError> {
    let pattern = format!("%{}%", partial);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT runlist_id FROM production_planner_paths
             WHERE runlist_id LIKE ?1 ORDER BY runlist_id",
        )?;
        let ids = stmt
            .query_map(params![pattern], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// Every file id printed anywhere in a runlist, through its impositions.
pub fn files_for_runlist(db: &Database, runlist_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT m.file_id
             FROM production_planner_paths p
             JOIN imposition_file_mapping m ON m.imposition_id = p.imposition_id
             WHERE p.runlist_id = ?1
             ORDER BY m.sequence_order, m.file_id",
        )?;
        let files = stmt
            .query_map(params![runlist_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(files)
    })
}

/// Every imposition carrying a file of the given (job, version),
/// matched through the file naming convention.
pub fn impositions_for_job_version(
    db: &Database,
    job_id: &str,
    version_tag: &str,
) -> Result<Vec<String>, DatabaseError> {
    let pattern = resolver::file_pattern(job_id, version_tag);
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT DISTINCT imposition_id FROM imposition_file_mapping
             WHERE file_id LIKE ?1 ORDER BY imposition_id",
        )?;
        let imps = stmt
            .query_map(params![pattern], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(imps)
    })
}
