//! Incremental reconciliation of the two event sources into per-job
//! operation state.

pub mod engine;
pub mod scheduler;

pub use engine::{PassReport, Reconciler};
pub use scheduler::{SweepScheduler, DEFAULT_SWEEP_INTERVAL};

use thiserror::Error;

use crate::db::DatabaseError;

/// Pass-aborting failures. Only the cursor and the initial batch fetch
/// can abort a pass; everything per-event is advisory and lands in the
/// pass report instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to read processing marker: {0}")]
    MarkerRead(#[source] DatabaseError),

    #[error("Failed to advance processing marker: {0}")]
    MarkerWrite(#[source] DatabaseError),

    #[error("Failed to fetch event batch: {0}")]
    BatchFetch(#[source] DatabaseError),

    #[error("Failed to resolve the print operation: {0}")]
    Catalog(#[source] DatabaseError),
}
