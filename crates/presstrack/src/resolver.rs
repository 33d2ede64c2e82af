//! Identifier resolution — pure parsing of scanned codes, file identifiers
//! and external-system names into structured job identity. No I/O.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

/// Brand marker used as an allow-list: only identifiers tagged for this
/// customer are resolvable. Matched case-insensitively.
const BRAND_MARKER: &str = "labex";

/// Job identity parsed out of a file identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileIdentity {
    pub job_id: String,
    pub version_tag: String,
}

/// Job identity parsed out of a manual-prepress name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualPrepress {
    pub job_id: String,
}

fn file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^FILE_(\d+)_Labex_(.+)$").expect("valid regex"))
}

fn manual_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Job id is two-or-more underscore-joined numeric groups; arbitrary
    // descriptive text may follow. A hash-style imposition id like
    // "Labex_4aa0cb5cd7_..." does not match.
    RE.get_or_init(|| Regex::new(r"^Labex_(\d+(?:_\d+)+)(?:_|$)").expect("valid regex"))
}

/// Parses a file identifier of the form `FILE_<version>_Labex_<rest>`.
///
/// The job id is the maximal prefix of purely numeric `_`-segments in
/// `<rest>` (at least 2, e.g. "4677_5995"); the first non-numeric segment
/// terminates it. With fewer than 2 numeric segments the fallback is all
/// segments except the last. Identifiers without the brand marker return
/// `None`.
pub fn parse_file_identifier(file_id: &str) -> Option<FileIdentity> {
    if !file_id.to_lowercase().contains(BRAND_MARKER) {
        return None;
    }

    let caps = file_re().captures(file_id)?;
    let version_tag = caps[1].to_string();
    let rest = caps.get(2)?.as_str();

    let parts: Vec<&str> = rest.split('_').collect();
    let job_id = if parts.len() >= 2 {
        let numeric: Vec<&str> = parts
            .iter()
            .take_while(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
            .copied()
            .collect();
        if numeric.len() >= 2 {
            numeric.join("_")
        } else {
            parts[..parts.len() - 1].join("_")
        }
    } else {
        // A single segment after the brand marker is accepted verbatim.
        // The naming convention implies at least two, but legacy data
        // contains such ids; do not reject them here.
        rest.to_string()
    };

    Some(FileIdentity {
        job_id,
        version_tag,
    })
}

/// Parses a manual-prepress name of the form `Labex_<job_id>[_suffix...]`,
/// used when the external system references a job directly rather than
/// through an imposition.
pub fn parse_manual_prepress(name: &str) -> Option<ManualPrepress> {
    let caps = manual_re().captures(name)?;
    Some(ManualPrepress {
        job_id: caps[1].to_string(),
    })
}

/// Splits scan text into `(job_id, version_tag)`: last `_`-segment is the
/// version, the rest is the job id. Requires at least 3 segments.
pub fn split_job_version(text: &str) -> Option<(String, String)> {
    let parts: Vec<&str> = text.split('_').collect();
    if parts.len() < 3 {
        return None;
    }
    let version_tag = parts[parts.len() - 1].to_string();
    let job_id = parts[..parts.len() - 1].join("_");
    Some((job_id, version_tag))
}

/// Resolves a set of file ids to the map of affected jobs and their
/// version tags. Unparseable ids are dropped.
pub fn collect_job_versions<'a, I>(file_ids: I) -> BTreeMap<String, BTreeSet<String>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut map: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for file_id in file_ids {
        if let Some(identity) = parse_file_identifier(file_id) {
            map.entry(identity.job_id)
                .or_default()
                .insert(identity.version_tag);
        }
    }
    map
}

/// SQL LIKE pattern matching every file id of a (job, version) pair.
pub fn file_pattern(job_id: &str, version_tag: &str) -> String {
    format!("FILE_{}_Labex_{}_%", version_tag, job_id)
}
