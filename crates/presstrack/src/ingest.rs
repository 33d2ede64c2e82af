//! Scan intake: classification of scanned text and recording of scan
//! events, including the fan-out of a runlist barcode into synthetic
//! per-file scans.

use serde_json::json;
use thiserror::Error;

use crate::db::scan_repo::{self, NewScan};
use crate::db::{mapping_repo, Database, DatabaseError};
use crate::resolver;

/// Metadata key marking a synthetic scan expanded from a runlist scan.
/// The reconciliation pass treats such a scan as its originating
/// runlist regardless of what its code text would classify as.
pub const DERIVED_FROM_RUNLIST_KEY: &str = "derived_from_runlist";

/// What a piece of scanned text resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanClassification {
    /// Exactly one known runlist (exact or unique partial match).
    Runlist(String),
    /// Several runlists match the partial text; the caller must reject
    /// and ask for a fuller id, never guess.
    Ambiguous { candidates: Vec<String> },
    /// Direct job/version code (last segment is the version).
    JobVersion { job_id: String, version_tag: String },
    /// Neither a runlist nor a job/version shape.
    Unresolved,
}

/// Operator-visible rejection of a scan submission.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Multiple runlists match '{input}': {}. Please scan the full id.", .candidates.join(", "))]
    AmbiguousRunlist {
        input: String,
        candidates: Vec<String>,
    },

    #[error("No runlist or job found for '{0}'")]
    NoMatch(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Classifies scanned text: exact runlist match first, then partial
/// runlist match (unique wins, several is ambiguous), then the
/// job/version split. Requires at least 3 `_` segments for the split.
pub fn classify_scan(db: &Database, text: &str) -> Result<ScanClassification, DatabaseError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(ScanClassification::Unresolved);
    }

    if mapping_repo::runlist_exists(db, text)? {
        return Ok(ScanClassification::Runlist(text.to_string()));
    }

    let candidates = mapping_repo::runlists_matching(db, text)?;
    match candidates.len() {
        1 => {
            let runlist_id = candidates.into_iter().next().unwrap_or_default();
            Ok(ScanClassification::Runlist(runlist_id))
        }
        0 => match resolver::split_job_version(text) {
            Some((job_id, version_tag)) => Ok(ScanClassification::JobVersion {
                job_id,
                version_tag,
            }),
            None => Ok(ScanClassification::Unresolved),
        },
        _ => Ok(ScanClassification::Ambiguous { candidates }),
    }
}

/// Result of an accepted scan submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanSubmission {
    /// One scan recorded for a direct job/version code.
    Job {
        job_id: String,
        version_tag: String,
        scan_id: i64,
    },
    /// A runlist scan, expanded into one synthetic scan per file.
    Runlist {
        runlist_id: String,
        scan_ids: Vec<i64>,
    },
}

/// Appends a single scan event.
pub fn record_scan(db: &Database, scan: &NewScan<'_>) -> Result<i64, DatabaseError> {
    scan_repo::insert_scan(db, scan)
}

/// Expands a runlist scan into one synthetic scan per file in the
/// runlist, each tagged with the originating runlist id. A failure on
/// one file is logged and the rest are still recorded; a partial
/// expansion is preferable to losing the whole runlist scan.
pub fn record_runlist_scans(
    db: &Database,
    runlist_id: &str,
    template: &NewScan<'_>,
) -> Result<Vec<i64>, DatabaseError> {
    let files = mapping_repo::files_for_runlist(db, runlist_id)?;
    let mut scan_ids = Vec::with_capacity(files.len());
    for file_id in &files {
        let scan = NewScan {
            code_text: file_id,
            machine_id: template.machine_id,
            user_id: template.user_id,
            operations: template.operations,
            metadata: Some(json!({ DERIVED_FROM_RUNLIST_KEY: runlist_id })),
        };
        match scan_repo::insert_scan(db, &scan) {
            Ok(scan_id) => scan_ids.push(scan_id),
            Err(e) => {
                log::error!(
                    "Failed to record derived scan for file {} of runlist {}: {}",
                    file_id,
                    runlist_id,
                    e
                );
            }
        }
    }
    log::info!(
        "Runlist {} scan expanded into {} of {} file scans",
        runlist_id,
        scan_ids.len(),
        files.len()
    );
    Ok(scan_ids)
}

/// Full submission path used by the intake surface: classify, reject
/// ambiguous or unresolvable text, record the event(s).
pub fn submit_scan(db: &Database, scan: &NewScan<'_>) -> Result<ScanSubmission, ScanError> {
    match classify_scan(db, scan.code_text)? {
        ScanClassification::Runlist(runlist_id) => {
            let scan_ids = record_runlist_scans(db, &runlist_id, scan)?;
            Ok(ScanSubmission::Runlist {
                runlist_id,
                scan_ids,
            })
        }
        ScanClassification::JobVersion {
            job_id,
            version_tag,
        } => {
            let scan_id = record_scan(db, scan)?;
            Ok(ScanSubmission::Job {
                job_id,
                version_tag,
                scan_id,
            })
        }
        ScanClassification::Ambiguous { candidates } => Err(ScanError::AmbiguousRunlist {
            input: scan.code_text.to_string(),
            candidates,
        }),
        ScanClassification::Unresolved => Err(ScanError::NoMatch(scan.code_text.to_string())),
    }
}

/// What scanned text resolves to, for operator lookup without recording
/// anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanLookup {
    Runlist {
        runlist_id: String,
        file_ids: Vec<String>,
    },
    Job {
        job_id: String,
        version_tag: String,
    },
}

/// Resolves scanned text for display. Ambiguous and unresolvable text
/// surface as the same typed rejections as submission.
pub fn lookup_scan(db: &Database, text: &str) -> Result<ScanLookup, ScanError> {
    match classify_scan(db, text)? {
        ScanClassification::Runlist(runlist_id) => {
            let file_ids = mapping_repo::files_for_runlist(db, &runlist_id)?;
            Ok(ScanLookup::Runlist {
                runlist_id,
                file_ids,
            })
        }
        ScanClassification::JobVersion {
            job_id,
            version_tag,
        } => Ok(ScanLookup::Job {
            job_id,
            version_tag,
        }),
        ScanClassification::Ambiguous { candidates } => Err(ScanError::AmbiguousRunlist {
            input: text.to_string(),
            candidates,
        }),
        ScanClassification::Unresolved => Err(ScanError::NoMatch(text.to_string())),
    }
}

/// Reads the originating runlist id out of a scan's metadata, if the
/// scan was synthetically derived from a runlist scan.
pub fn derived_runlist(metadata: Option<&str>) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(metadata?).ok()?;
    value
        .get(DERIVED_FROM_RUNLIST_KEY)?
        .as_str()
        .map(str::to_string)
}
