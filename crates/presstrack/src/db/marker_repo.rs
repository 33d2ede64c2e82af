//! Processing-marker repository — per-source watermark of the highest
//! fully processed event identifier.

use rusqlite::{params, OptionalExtension};

use super::{now_rfc3339, Database, DatabaseError};

/// The two independent event sources, each with its own cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerSource {
    ScannedCodes,
    PrintOs,
}

impl MarkerSource {
    pub fn as_str(self) -> &'static str {
        match self {
            MarkerSource::ScannedCodes => "scanned_codes",
            MarkerSource::PrintOs => "print_os",
        }
    }
}

impl std::fmt::Display for MarkerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reads the cursor for a source. A missing row means "from the
/// beginning" (0).
pub fn last_processed_id(db: &Database, source: MarkerSource) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let id: Option<i64> = conn
            .query_row(
                "SELECT last_processed_id FROM processing_markers WHERE marker_type = ?1",
                params![source.as_str()],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.unwrap_or(0))
    })
}

/// Advances the cursor. Monotonic: a value below the stored one is
/// never written, so concurrent or replayed passes cannot move the
/// watermark backwards.
pub fn advance(db: &Database, source: MarkerSource, marker_id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO processing_markers (marker_type, last_processed_id, last_processed_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(marker_type) DO UPDATE SET
               last_processed_id = MAX(last_processed_id, excluded.last_processed_id),
               last_processed_at = excluded.last_processed_at,
               updated_at = excluded.updated_at",
            params![source.as_str(), marker_id, now],
        )?;
        Ok(())
    })
}

/// Resets the cursor to 0. The explicit recovery path for replaying a
/// source from the beginning (e.g. duration backfill); `advance` alone
/// can never move the watermark down.
pub fn reset(db: &Database, source: MarkerSource) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let now = now_rfc3339();
        conn.execute(
            "INSERT INTO processing_markers (marker_type, last_processed_id, last_processed_at, updated_at)
             VALUES (?1, 0, ?2, ?2)
             ON CONFLICT(marker_type) DO UPDATE SET
               last_processed_id = 0,
               last_processed_at = excluded.last_processed_at,
               updated_at = excluded.updated_at",
            params![source.as_str(), now],
        )?;
        Ok(())
    })
}
