//! Database module for persistent storage.
//!
//! Uses rusqlite (SQLite) with a thread-safe `Database` handle.
//! All access is serialized through a `Mutex<Connection>`. Every repo
//! call is a point operation: no transaction spans a reconciliation
//! pass, so a crash mid-pass leaves individually consistent rows that
//! the marker cursor makes safely resumable.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use rusqlite::Connection;

pub mod catalog_repo;
pub mod duration_repo;
pub mod error;
pub mod job_record_repo;
pub mod machine_repo;
pub mod mapping_repo;
pub mod marker_repo;
pub mod migrations;
pub mod operation_repo;
pub mod scan_repo;

pub use error::DatabaseError;

/// Optional schema features, probed once when the database is opened.
///
/// Deployments that attach a legacy operations table may lack the
/// `status` column. The repos consult these flags to decide which
/// UPDATE shape to issue instead of inspecting error text per call.
#[derive(Debug, Clone, Copy)]
pub struct SchemaCapabilities {
    pub job_operation_status: bool,
    pub imposition_operation_status: bool,
}

/// Thread-safe database handle wrapping a single rusqlite connection.
///
/// Cloning is cheap (inner `Arc`). All access is serialized through
/// a `Mutex`, which is fine for SQLite (which serializes writes anyway).
/// WAL mode is enabled for concurrent read performance.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    caps: SchemaCapabilities,
}

impl Database {
    /// Opens (or creates) the database at the given path, runs all
    /// pending migrations and probes schema capabilities.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;

        let db = Self::finish(conn)?;
        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Opens an in-memory database for testing. Runs all migrations.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Self::finish(conn)
    }

    fn finish(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;

        let caps = SchemaCapabilities {
            job_operation_status: column_exists(&conn, "job_operations", "status")?,
            imposition_operation_status: column_exists(
                &conn,
                "imposition_operations",
                "status",
            )?,
        };

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            caps,
        })
    }

    /// Schema capabilities decided at open time.
    pub fn capabilities(&self) -> SchemaCapabilities {
        self.caps
    }

    /// Provides locked access to the underlying connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Returns the canonical database path: `~/.presstrack/data/presstrack.db`.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".presstrack").join("data").join("presstrack.db"))
}

/// Current UTC time as an RFC 3339 string, the storage format for all
/// timestamp columns.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Checks whether a column exists on a table using `PRAGMA table_info`.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    // Validate identifier — only alphanumeric and underscores allowed.
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(DatabaseError::Migration {
            version: 0,
            reason: format!("Invalid table name: {}", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let exists = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .any(|r| r.map(|name| name == column).unwrap_or(false));
    Ok(exists)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_open_file_db() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::open(&path).unwrap();
        db.with_conn(|conn| {
            let count: u32 =
                conn.query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))?;
            assert!(count > 0);
            Ok(())
        })
        .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_capabilities_probed_on_open() {
        let db = Database::open_in_memory().unwrap();
        let caps = db.capabilities();
        assert!(caps.job_operation_status);
        assert!(caps.imposition_operation_status);
    }

    #[test]
    fn test_default_database_path() {
        let path = default_database_path();
        assert!(path.is_some());
        let path = path.unwrap();
        assert!(path.ends_with("presstrack.db"));
        assert!(path.to_string_lossy().contains(".presstrack"));
    }

    #[test]
    fn test_column_exists_check() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            assert!(column_exists(conn, "job_operations", "status")?);
            assert!(!column_exists(conn, "job_operations", "missing")?);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_database_is_clone() {
        let db = Database::open_in_memory().unwrap();
        let db2 = db.clone();
        // Both should access the same underlying connection.
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, operations, created_at, updated_at)
                 VALUES ('4604_5889', '{}', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        db2.with_conn(|conn| {
            let count: u32 = conn.query_row("SELECT COUNT(*) FROM jobs", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }
}
