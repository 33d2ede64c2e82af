//! The reconciliation passes.
//!
//! One pass per source: read the cursor, fetch everything above it,
//! apply each event idempotently, advance the cursor to the highest
//! identifier seen. Per-event failures are recorded in the pass report
//! and never abort the batch; the cursor advances past them, keeping
//! the passes live against poisoned input (the sources are append-only
//! and replayable by marker reset).

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use super::EngineError;
use crate::catalog::OperationCode;
use crate::db::machine_repo::{self, MachineEventRow};
use crate::db::marker_repo::{self, MarkerSource};
use crate::db::operation_repo::{self, CompletedBy, Completion, CompletionStatus};
use crate::db::scan_repo::{self, ScanRow};
use crate::db::{
    catalog_repo, job_record_repo, mapping_repo, now_rfc3339, Database, DatabaseError,
};
use crate::durations;
use crate::ingest::{self, ScanClassification};
use crate::resolver;
use crate::status::{self, CompletedOperations};

/// Outcome of one reconciliation pass, surfaced to the scheduler and
/// the manual trigger. Errors here are advisory, not pass failures.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub processed: usize,
    pub jobs_updated: usize,
    pub last_marker: i64,
    pub errors: Vec<String>,
    pub skipped: bool,
}

/// Drives both reconciliation passes over one database.
///
/// Each source has a single-flight guard: the periodic sweep and the
/// ingestion trigger both call the same pass, and a pass that finds
/// its guard held reports itself skipped instead of running twice.
pub struct Reconciler {
    db: Database,
    machine_pass: Mutex<()>,
    scan_pass: Mutex<()>,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            machine_pass: Mutex::new(()),
            scan_pass: Mutex::new(()),
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Processes machine events above the `print_os` cursor.
    pub fn process_machine_events(&self) -> Result<PassReport, EngineError> {
        let Ok(_guard) = self.machine_pass.try_lock() else {
            log::debug!("Machine-event pass already running, skipping");
            return Ok(PassReport {
                skipped: true,
                ..Default::default()
            });
        };
        let _span = tracing::info_span!("reconcile.machine_events").entered();

        let cursor = marker_repo::last_processed_id(&self.db, MarkerSource::PrintOs)
            .map_err(EngineError::MarkerRead)?;
        let batch =
            machine_repo::fetch_since(&self.db, cursor).map_err(EngineError::BatchFetch)?;

        let mut report = PassReport {
            last_marker: cursor,
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        // The cursor advances to the highest marker in the raw batch,
        // including events that dedup drops or that fail to resolve.
        let highest = batch.iter().map(|e| e.marker).max().unwrap_or(cursor);
        let print_op = catalog_repo::print_operation_id(&self.db).map_err(EngineError::Catalog)?;

        for event in dedupe_latest_by_name(batch) {
            if let Err(e) = self.apply_machine_event(&event, &print_op, &mut report) {
                report
                    .errors
                    .push(format!("machine event {} ({}): {}", event.id, event.name, e));
            }
        }

        marker_repo::advance(&self.db, MarkerSource::PrintOs, highest)
            .map_err(EngineError::MarkerWrite)?;
        report.last_marker = highest;
        log::info!(
            "Machine-event pass: {} events, {} job versions updated, marker {} ({} errors)",
            report.processed,
            report.jobs_updated,
            report.last_marker,
            report.errors.len()
        );
        Ok(report)
    }

    /// Processes scans above the `scanned_codes` cursor.
    pub fn process_scan_events(&self) -> Result<PassReport, EngineError> {
        let Ok(_guard) = self.scan_pass.try_lock() else {
            log::debug!("Scan-event pass already running, skipping");
            return Ok(PassReport {
                skipped: true,
                ..Default::default()
            });
        };
        let _span = tracing::info_span!("reconcile.scan_events").entered();

        let cursor = marker_repo::last_processed_id(&self.db, MarkerSource::ScannedCodes)
            .map_err(EngineError::MarkerRead)?;
        let batch = scan_repo::fetch_since(&self.db, cursor).map_err(EngineError::BatchFetch)?;

        let mut report = PassReport {
            last_marker: cursor,
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        let highest = batch.iter().map(|s| s.scan_id).max().unwrap_or(cursor);
        for scan in &batch {
            if let Err(e) = self.apply_scan(scan, &mut report) {
                report
                    .errors
                    .push(format!("scan {} ('{}'): {}", scan.scan_id, scan.code_text, e));
            }
        }

        marker_repo::advance(&self.db, MarkerSource::ScannedCodes, highest)
            .map_err(EngineError::MarkerWrite)?;
        report.last_marker = highest;
        log::info!(
            "Scan-event pass: {} scans, {} job versions updated, marker {} ({} errors)",
            report.processed,
            report.jobs_updated,
            report.last_marker,
            report.errors.len()
        );
        Ok(report)
    }

    fn apply_machine_event(
        &self,
        event: &MachineEventRow,
        print_op: &str,
        report: &mut PassReport,
    ) -> Result<(), DatabaseError> {
        let aborted = event.status.eq_ignore_ascii_case("aborted");
        let status = if aborted {
            CompletionStatus::Aborted
        } else {
            CompletionStatus::Completed
        };
        let completed_at = event
            .job_complete_time
            .clone()
            .unwrap_or_else(now_rfc3339);
        let completion = Completion {
            operation_id: print_op,
            status,
            completed_by: CompletedBy::PrintOs,
            source_id: event.id,
            completed_at: &completed_at,
        };

        if let Some(manual) = resolver::parse_manual_prepress(&event.name) {
            // A manual prepress job has no per-version imposition
            // breakdown: the single event covers every known version.
            let versions = operation_repo::version_tags_for_job(&self.db, &manual.job_id)?;
            if versions.is_empty() {
                log::warn!(
                    "Manual prepress event {} names job {} with no known versions",
                    event.id,
                    manual.job_id
                );
                return Ok(());
            }
            for version_tag in &versions {
                operation_repo::complete_job_operation(
                    &self.db,
                    &manual.job_id,
                    version_tag,
                    &completion,
                )?;
                if !aborted {
                    durations::record_print_duration(
                        &self.db,
                        &manual.job_id,
                        version_tag,
                        event.elapsed_seconds,
                        &completed_at,
                    )?;
                }
                // The print flag follows the imposition tally, same as
                // the imposition branch: a manual event alone does not
                // certify a partially printed run.
                self.check_print_completion(&manual.job_id, version_tag, print_op)?;
                self.recompute_status(&manual.job_id, version_tag)?;
                report.jobs_updated += 1;
            }
            report.processed += 1;
            return Ok(());
        }

        // Otherwise the name is an imposition id.
        let files = mapping_repo::files_for_imposition(&self.db, &event.name)?;
        let jobs = resolver::collect_job_versions(files.iter().map(String::as_str));
        if jobs.is_empty() {
            // Skipped, cursor still moves past it. Only names carrying
            // the brand marker are worth an advisory: they looked like
            // they should have resolved.
            if event.name.to_lowercase().contains("labex") {
                log::warn!(
                    "Machine event {} names '{}' but none of its {} files resolve",
                    event.id,
                    event.name,
                    files.len()
                );
                report.errors.push(format!(
                    "machine event {}: imposition '{}' not recognised",
                    event.id, event.name
                ));
            }
            return Ok(());
        }

        operation_repo::complete_imposition_operation(&self.db, &event.name, &completion)?;
        for (job_id, versions) in &jobs {
            for version_tag in versions {
                operation_repo::complete_job_operation(&self.db, job_id, version_tag, &completion)?;
                if !aborted {
                    durations::record_print_duration(
                        &self.db,
                        job_id,
                        version_tag,
                        event.elapsed_seconds,
                        &completed_at,
                    )?;
                }
                self.check_print_completion(job_id, version_tag, print_op)?;
                self.recompute_status(job_id, version_tag)?;
                report.jobs_updated += 1;
            }
        }
        report.processed += 1;
        Ok(())
    }

    fn apply_scan(&self, scan: &ScanRow, report: &mut PassReport) -> Result<(), DatabaseError> {
        // Resolve the declared operation references; unknown ones are
        // advisory errors and a scan with none left is skipped.
        let mut codes: Vec<OperationCode> = Vec::new();
        for reference in declared_operations(scan.operations.as_deref()) {
            match catalog_repo::resolve_operation(&self.db, &reference)? {
                Some(op_id) => {
                    if let Some(code) = OperationCode::from_operation_id(&op_id) {
                        if !codes.contains(&code) {
                            codes.push(code);
                        }
                    }
                }
                None => report.errors.push(format!(
                    "scan {}: unknown operation reference '{}'",
                    scan.scan_id, reference
                )),
            }
        }
        if codes.is_empty() {
            return Ok(());
        }

        // A scan synthesized from a runlist scan is that runlist, no
        // matter what its code text would classify as on its own.
        let classification = match ingest::derived_runlist(scan.metadata.as_deref()) {
            Some(runlist_id) => ScanClassification::Runlist(runlist_id),
            None => ingest::classify_scan(&self.db, &scan.code_text)?,
        };

        let (tuples, impositions) = match &classification {
            ScanClassification::Runlist(runlist_id) => {
                let files = mapping_repo::files_for_runlist(&self.db, runlist_id)?;
                let tuples = resolver::collect_job_versions(files.iter().map(String::as_str));
                // A runlist-level physical scan certifies the whole
                // print run, so every imposition in it is updated.
                let imps = mapping_repo::impositions_for_runlist(&self.db, runlist_id)?;
                (tuples, imps)
            }
            ScanClassification::JobVersion {
                job_id,
                version_tag,
            } => {
                let mut tuples = std::collections::BTreeMap::new();
                tuples
                    .entry(job_id.clone())
                    .or_insert_with(std::collections::BTreeSet::new)
                    .insert(version_tag.clone());
                // A job/version scan with no imposition mapping is
                // still valid and recorded against the job alone.
                let imps =
                    mapping_repo::impositions_for_job_version(&self.db, job_id, version_tag)?;
                (tuples, imps)
            }
            ScanClassification::Ambiguous { candidates } => {
                report.errors.push(format!(
                    "scan {}: '{}' matches multiple runlists: {}",
                    scan.scan_id,
                    scan.code_text,
                    candidates.join(", ")
                ));
                return Ok(());
            }
            ScanClassification::Unresolved => {
                report.errors.push(format!(
                    "scan {}: no runlist or job found for '{}'",
                    scan.scan_id, scan.code_text
                ));
                return Ok(());
            }
        };

        if tuples.is_empty() {
            report.errors.push(format!(
                "scan {}: no jobs found for '{}'",
                scan.scan_id, scan.code_text
            ));
            return Ok(());
        }

        for code in &codes {
            let completion = Completion {
                operation_id: code.operation_id(),
                status: CompletionStatus::Completed,
                completed_by: CompletedBy::Scanner,
                source_id: scan.scan_id,
                completed_at: &scan.scanned_at,
            };

            for (job_id, versions) in &tuples {
                for version_tag in versions {
                    operation_repo::complete_job_operation(
                        &self.db,
                        job_id,
                        version_tag,
                        &completion,
                    )?;
                    job_record_repo::set_operation_flag(&self.db, job_id, code.code(), true)?;
                    durations::record_scan_duration(
                        &self.db,
                        job_id,
                        version_tag,
                        *code,
                        &scan.scanned_at,
                    )?;
                    if *code == OperationCode::Print {
                        self.check_print_completion(job_id, version_tag, code.operation_id())?;
                    }
                    self.recompute_status(job_id, version_tag)?;
                }
            }
            for imposition in &impositions {
                operation_repo::complete_imposition_operation(&self.db, imposition, &completion)?;
            }
        }

        report.jobs_updated += tuples.values().map(|v| v.len()).sum::<usize>();
        report.processed += 1;
        Ok(())
    }

    /// Propagates imposition-level print state up to the job record:
    /// all impositions completed means the job finished printing, all
    /// aborted means it did not, anything in between is in progress.
    fn check_print_completion(
        &self,
        job_id: &str,
        version_tag: &str,
        print_op: &str,
    ) -> Result<(), DatabaseError> {
        let impositions =
            mapping_repo::impositions_for_job_version(&self.db, job_id, version_tag)?;
        if impositions.is_empty() {
            return Ok(());
        }

        let stats = operation_repo::imposition_print_stats(&self.db, &impositions, print_op)?;
        if stats.completed == stats.total {
            job_record_repo::set_operation_flag(
                &self.db,
                job_id,
                OperationCode::Print.code(),
                true,
            )?;
        } else if stats.aborted == stats.total {
            log::warn!(
                "All {} impositions for job {} v{} aborted printing",
                stats.total,
                job_id,
                version_tag
            );
            job_record_repo::set_operation_flag(
                &self.db,
                job_id,
                OperationCode::Print.code(),
                false,
            )?;
        } else {
            log::debug!(
                "Print in progress for job {} v{}: {}/{} impositions completed",
                job_id,
                version_tag,
                stats.completed,
                stats.total
            );
        }
        Ok(())
    }

    /// Rederives the aggregate status from the full completed set.
    /// Always recomputed, never patched, so the stored status cannot
    /// drift from the per-operation rows.
    fn recompute_status(&self, job_id: &str, version_tag: &str) -> Result<(), DatabaseError> {
        let ids = operation_repo::completed_operation_ids(&self.db, job_id, version_tag)?;
        let completed = CompletedOperations::from_operation_ids(ids.iter().map(String::as_str));
        let derived = status::derive_status(&completed);
        job_record_repo::set_current_status(&self.db, job_id, derived)?;
        Ok(())
    }
}

/// Keeps only the highest-marker event per `name` and returns the
/// survivors in ascending marker order. The external feed may emit
/// several records for the same target before its final state; without
/// this, a stale PRINTED could land after an ABORTED with a lower
/// marker in the same batch.
fn dedupe_latest_by_name(batch: Vec<MachineEventRow>) -> Vec<MachineEventRow> {
    let mut latest: HashMap<String, MachineEventRow> = HashMap::new();
    for event in batch {
        match latest.get(&event.name) {
            Some(existing) if existing.marker >= event.marker => {}
            _ => {
                latest.insert(event.name.clone(), event);
            }
        }
    }
    let mut events: Vec<MachineEventRow> = latest.into_values().collect();
    events.sort_by_key(|e| e.marker);
    events
}

/// Parses a scan's declared operations column: a JSON array of
/// references, or a bare single reference for legacy rows.
fn declared_operations(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if let Ok(refs) = serde_json::from_str::<Vec<String>>(raw) {
        return refs;
    }
    vec![raw.to_string()]
}
