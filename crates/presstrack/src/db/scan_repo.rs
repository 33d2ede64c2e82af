//! Scanned-code event log repository (append-only input table).

use rusqlite::params;

use super::{now_rfc3339, Database, DatabaseError};

/// A stored barcode scan. `operations` is the scanner's declared
/// operation reference; `metadata` is a JSON blob for provenance such
/// as runlist derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRow {
    pub scan_id: i64,
    pub code_text: String,
    pub scanned_at: String,
    pub machine_id: Option<String>,
    pub user_id: Option<String>,
    pub operations: Option<String>,
    pub metadata: Option<String>,
}

/// Fields of a scan being appended; the row id and timestamp are
/// assigned on insert.
#[derive(Debug, Clone, Default)]
pub struct NewScan<'a> {
    pub code_text: &'a str,
    pub machine_id: Option<&'a str>,
    pub user_id: Option<&'a str>,
    pub operations: Option<&'a str>,
    pub metadata: Option<serde_json::Value>,
}

/// Appends a scan and returns its assigned id.
pub fn insert_scan(db: &Database, scan: &NewScan<'_>) -> Result<i64, DatabaseError> {
    let metadata = scan
        .metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO scanned_codes (code_text, scanned_at, machine_id, user_id, operations, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                scan.code_text,
                now_rfc3339(),
                scan.machine_id,
                scan.user_id,
                scan.operations,
                metadata,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Scans with an id strictly above the cursor, in id order.
pub fn fetch_since(db: &Database, last_processed_id: i64) -> Result<Vec<ScanRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT scan_id, code_text, scanned_at, machine_id, user_id, operations, metadata
             FROM scanned_codes
             WHERE scan_id > ?1
             ORDER BY scan_id",
        )?;
        let rows = stmt
            .query_map(params![last_processed_id], |r| {
                Ok(ScanRow {
                    scan_id: r.get(0)?,
                    code_text: r.get(1)?,
                    scanned_at: r.get(2)?,
                    machine_id: r.get(3)?,
                    user_id: r.get(4)?,
                    operations: r.get(5)?,
                    metadata: r.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
