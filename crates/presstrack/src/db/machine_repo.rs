//! Print OS machine-event log repository (append-only input table).

use rusqlite::params;

use super::{Database, DatabaseError};

/// A stored machine event. `name` carries the opaque identifier the
/// machine was given (imposition id, runlist path or manual-prepress
/// name); `marker` is the strictly increasing per-event sequence
/// number the cursor tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineEventRow {
    pub id: i64,
    pub name: String,
    pub status: String,
    pub marker: i64,
    pub job_complete_time: Option<String>,
    pub copies: Option<i64>,
    pub elapsed_seconds: Option<f64>,
}

/// Appends a machine event as delivered by the Print OS feed.
pub fn insert_event(db: &Database, event: &MachineEventRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO print_os_events (id, name, status, marker, job_complete_time, copies, elapsed_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id,
                event.name,
                event.status,
                event.marker,
                event.job_complete_time,
                event.copies,
                event.elapsed_seconds,
            ],
        )?;
        Ok(())
    })
}

/// Events with a marker strictly above the cursor, in marker order.
pub fn fetch_since(
    db: &Database,
    last_processed_marker: i64,
) -> Result<Vec<MachineEventRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id, name, status, marker, job_complete_time, copies, elapsed_seconds
             FROM print_os_events
             WHERE marker > ?1
             ORDER BY marker",
        )?;
        let rows = stmt
            .query_map(params![last_processed_marker], |r| {
                Ok(MachineEventRow {
                    id: r.get(0)?,
                    name: r.get(1)?,
                    status: r.get(2)?,
                    marker: r.get(3)?,
                    job_complete_time: r.get(4)?,
                    copies: r.get(5)?,
                    elapsed_seconds: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    fn event(id: i64, name: &str, status: &str, marker: i64) -> MachineEventRow {
        MachineEventRow {
            id,
            name: name.to_string(),
            status: status.to_string(),
            marker,
            job_complete_time: Some("2026-01-01T10:00:00Z".to_string()),
            copies: Some(500),
            elapsed_seconds: Some(120.5),
        }
    }

    #[test]
    fn test_fetch_since_orders_by_marker() {
        let db = test_db();
        insert_event(&db, &event(11, "imp_a", "completed", 5)).unwrap();
        insert_event(&db, &event(12, "imp_b", "completed", 3)).unwrap();
        insert_event(&db, &event(13, "imp_c", "aborted", 9)).unwrap();

        let rows = fetch_since(&db, 0).unwrap();
        let markers: Vec<i64> = rows.iter().map(|r| r.marker).collect();
        assert_eq!(markers, vec![3, 5, 9]);

        let rows = fetch_since(&db, 5).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "imp_c");
    }
}
