//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order. Safe to re-run on every open.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_operations_catalog",
        sql: include_str!("sql/001_create_operations.sql"),
    },
    Migration {
        version: 2,
        description: "create_jobs_table",
        sql: include_str!("sql/002_create_jobs.sql"),
    },
    Migration {
        version: 3,
        description: "create_job_operations_table",
        sql: include_str!("sql/003_create_job_operations.sql"),
    },
    Migration {
        version: 4,
        description: "create_imposition_operations_table",
        sql: include_str!("sql/004_create_imposition_operations.sql"),
    },
    Migration {
        version: 5,
        description: "create_scanned_codes_table",
        sql: include_str!("sql/005_create_scanned_codes.sql"),
    },
    Migration {
        version: 6,
        description: "create_print_os_events_table",
        sql: include_str!("sql/006_create_print_os_events.sql"),
    },
    Migration {
        version: 7,
        description: "create_processing_markers_table",
        sql: include_str!("sql/007_create_processing_markers.sql"),
    },
    Migration {
        version: 8,
        description: "create_imposition_mapping_tables",
        sql: include_str!("sql/008_create_imposition_mapping.sql"),
    },
    Migration {
        version: 9,
        description: "create_job_operation_durations_table",
        sql: include_str!("sql/009_create_job_operation_durations.sql"),
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    // Create the migrations tracking table.
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_operation_catalog_is_seeded() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM operations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 5);

        let print_name: String = conn
            .query_row(
                "SELECT operation_name FROM operations WHERE operation_id = 'op001'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(print_name, "Print");
    }

    #[test]
    fn test_processing_markers_seeded_at_zero() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let scan_marker: i64 = conn
            .query_row(
                "SELECT last_processed_id FROM processing_markers WHERE marker_type = 'scanned_codes'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        let print_marker: i64 = conn
            .query_row(
                "SELECT last_processed_id FROM processing_markers WHERE marker_type = 'print_os'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(scan_marker, 0);
        assert_eq!(print_marker, 0);
    }

    #[test]
    fn test_scanned_codes_autoincrements() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO scanned_codes (code_text, scanned_at) VALUES ('4604_5889_1', '2026-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO scanned_codes (code_text, scanned_at) VALUES ('RL100', '2026-01-01T00:01:00Z')",
            [],
        )
        .unwrap();

        let max_id: i64 = conn
            .query_row("SELECT MAX(scan_id) FROM scanned_codes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(max_id, 2);
    }
}
