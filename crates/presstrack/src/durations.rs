//! Operation duration aggregation.
//!
//! A duration row measures the gap between an operation's completion
//! and its predecessor's in the fixed pipeline. Missing or unparseable
//! timestamps yield a NULL duration, never zero.

use chrono::{DateTime, Utc};

use crate::catalog::OperationCode;
use crate::db::duration_repo::{self, DurationRecord};
use crate::db::marker_repo::{self, MarkerSource};
use crate::db::{operation_repo, Database, DatabaseError};
use crate::reconcile::{EngineError, PassReport, Reconciler};

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Seconds between two RFC 3339 timestamps. Unparseable input or a
/// negative gap (clock skew between sources) yields `None`.
pub fn elapsed_seconds(start: &str, end: &str) -> Option<f64> {
    let start = parse_rfc3339(start)?;
    let end = parse_rfc3339(end)?;
    let seconds = (end - start).num_milliseconds() as f64 / 1000.0;
    (seconds >= 0.0).then_some(seconds)
}

/// Records the duration of a scanner-completed operation as the gap
/// since the predecessor operation's completion. No predecessor (print)
/// or no predecessor timestamp records a NULL duration.
pub fn record_scan_duration(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    code: OperationCode,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    let started_at = match code.predecessor() {
        Some(prev) => operation_repo::completed_at(db, job_id, version_tag, prev.operation_id())?,
        None => None,
    };
    let duration_seconds = started_at
        .as_deref()
        .and_then(|start| elapsed_seconds(start, completed_at));

    duration_repo::upsert(
        db,
        &DurationRecord {
            job_id: job_id.to_string(),
            version_tag: version_tag.to_string(),
            operation_id: code.operation_id().to_string(),
            duration_seconds,
            started_at,
            completed_at: completed_at.to_string(),
        },
    )
}

/// Records the print operation's duration from the machine event's own
/// elapsed-time field. Print has no predecessor, so this is the only
/// duration source for it; absent elapsed time records NULL.
pub fn record_print_duration(
    db: &Database,
    job_id: &str,
    version_tag: &str,
    elapsed: Option<f64>,
    completed_at: &str,
) -> Result<(), DatabaseError> {
    let started_at = elapsed.and_then(|secs| {
        parse_rfc3339(completed_at).map(|end| {
            (end - chrono::Duration::milliseconds((secs * 1000.0) as i64))
                .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
        })
    });

    duration_repo::upsert(
        db,
        &DurationRecord {
            job_id: job_id.to_string(),
            version_tag: version_tag.to_string(),
            operation_id: OperationCode::Print.operation_id().to_string(),
            duration_seconds: elapsed,
            started_at,
            completed_at: completed_at.to_string(),
        },
    )
}

/// Resets both source cursors to 0 and replays both passes, rebuilding
/// every duration row from the retained event logs. Safe because all
/// writes along the way are idempotent upserts.
pub fn backfill_all(reconciler: &Reconciler) -> Result<(PassReport, PassReport), EngineError> {
    let db = reconciler.database();
    marker_repo::reset(db, MarkerSource::PrintOs).map_err(EngineError::MarkerWrite)?;
    marker_repo::reset(db, MarkerSource::ScannedCodes).map_err(EngineError::MarkerWrite)?;

    log::info!("Duration backfill: markers reset, replaying both sources");
    let machine = reconciler.process_machine_events()?;
    let scans = reconciler.process_scan_events()?;
    Ok((machine, scans))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::operation_repo::{CompletedBy, Completion, CompletionStatus};

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn complete(db: &Database, op: OperationCode, at: &str) {
        operation_repo::plan_job_operation(db, "4604_5889", "1", op.operation_id()).unwrap();
        operation_repo::complete_job_operation(
            db,
            "4604_5889",
            "1",
            &Completion {
                operation_id: op.operation_id(),
                status: CompletionStatus::Completed,
                completed_by: CompletedBy::Scanner,
                source_id: 1,
                completed_at: at,
            },
        )
        .unwrap();
    }

    #[test]
    fn test_elapsed_seconds() {
        assert_eq!(
            elapsed_seconds("2026-01-01T10:00:00Z", "2026-01-01T10:30:00Z"),
            Some(1800.0)
        );
        // Negative gaps and junk are unmeasurable.
        assert_eq!(elapsed_seconds("2026-01-01T10:30:00Z", "2026-01-01T10:00:00Z"), None);
        assert_eq!(elapsed_seconds("junk", "2026-01-01T10:00:00Z"), None);
    }

    #[test]
    fn test_scan_duration_from_predecessor() {
        let db = test_db();
        complete(&db, OperationCode::Print, "2026-01-01T10:00:00Z");

        record_scan_duration(&db, "4604_5889", "1", OperationCode::Coat, "2026-01-01T10:30:00Z")
            .unwrap();

        let row = duration_repo::get(&db, "4604_5889", "1", "op002")
            .unwrap()
            .unwrap();
        assert_eq!(row.duration_seconds, Some(1800.0));
        assert_eq!(row.started_at.as_deref(), Some("2026-01-01T10:00:00Z"));
    }

    #[test]
    fn test_missing_predecessor_yields_null() {
        let db = test_db();
        // Coat completed but print never was.
        record_scan_duration(&db, "4604_5889", "1", OperationCode::Coat, "2026-01-01T10:30:00Z")
            .unwrap();

        let row = duration_repo::get(&db, "4604_5889", "1", "op002")
            .unwrap()
            .unwrap();
        assert_eq!(row.duration_seconds, None);
        assert_eq!(row.started_at, None);
    }

    #[test]
    fn test_print_duration_from_machine_elapsed() {
        let db = test_db();
        record_print_duration(&db, "4604_5889", "1", Some(120.0), "2026-01-01T10:02:00Z").unwrap();

        let row = duration_repo::get(&db, "4604_5889", "1", "op001")
            .unwrap()
            .unwrap();
        assert_eq!(row.duration_seconds, Some(120.0));
        assert_eq!(row.started_at.as_deref(), Some("2026-01-01T10:00:00Z"));
    }

    #[test]
    fn test_print_duration_without_elapsed_is_null() {
        let db = test_db();
        record_print_duration(&db, "4604_5889", "1", None, "2026-01-01T10:02:00Z").unwrap();

        let row = duration_repo::get(&db, "4604_5889", "1", "op001")
            .unwrap()
            .unwrap();
        assert_eq!(row.duration_seconds, None);
        assert_eq!(row.started_at, None);
    }
}
