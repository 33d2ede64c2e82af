//! Crate-level error type rolling up the per-concern errors.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::ingest::ScanError;
use crate::reconcile::EngineError;

/// Top-level error for presstrack operations.
#[derive(Debug, Error)]
pub enum PresstrackError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Reconciliation error: {0}")]
    Engine(#[from] EngineError),

    #[error("No home directory available to place the database")]
    NoHomeDirectory,
}

pub type Result<T> = std::result::Result<T, PresstrackError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_rolls_up() {
        let err = PresstrackError::from(DatabaseError::LockPoisoned);
        assert!(matches!(err, PresstrackError::Database(_)));
        assert_eq!(err.to_string(), "Database error: Database lock poisoned");
    }

    #[test]
    fn test_no_home_directory_display() {
        assert_eq!(
            PresstrackError::NoHomeDirectory.to_string(),
            "No home directory available to place the database"
        );
    }
}
