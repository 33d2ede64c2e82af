//! Operation catalog lookups against the seeded `operations` table.

use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};
use crate::catalog::OperationCode;

/// Resolves a declared operation reference (catalog id or name, any
/// case) to a catalog operation id. Unknown references yield `None`.
pub fn resolve_operation(db: &Database, input: &str) -> Result<Option<String>, DatabaseError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    // Fast path: the fixed catalog enum covers ids and common spellings.
    if let Some(code) = OperationCode::resolve(trimmed) {
        return Ok(Some(code.operation_id().to_string()));
    }

    // Fall back to the catalog table for any other legacy spelling.
    let pattern = format!("%{}%", trimmed.to_lowercase());
    db.with_conn(|conn| {
        let id: Option<String> = conn
            .query_row(
                "SELECT operation_id FROM operations
                 WHERE LOWER(operation_name) LIKE ?1
                 ORDER BY operation_id LIMIT 1",
                params![pattern],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.map(|i| i.to_lowercase()))
    })
}

/// Looks up the print operation id from the catalog, falling back to
/// the conventional `op001` if the catalog row is missing.
pub fn print_operation_id(db: &Database) -> Result<String, DatabaseError> {
    db.with_conn(|conn| {
        let id: Option<String> = conn
            .query_row(
                "SELECT operation_id FROM operations
                 WHERE LOWER(operation_name) LIKE '%print%' LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id
            .map(|i| i.to_lowercase())
            .unwrap_or_else(|| OperationCode::Print.operation_id().to_string()))
    })
}
