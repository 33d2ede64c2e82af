//! presstrack — print-production job tracking.
//!
//! Reconciles two independent event feeds (barcode scans and the
//! external Print OS machine feed) into per-operation completion state
//! and an aggregate status for every job version, with marker-based
//! cursors and idempotent upserts so replays and duplicates converge.

pub mod catalog;
pub mod db;
pub mod durations;
pub mod error;
pub mod ingest;
pub mod reconcile;
pub mod resolver;
pub mod status;

pub use error::{PresstrackError, Result};
