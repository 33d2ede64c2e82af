//! Aggregate job status derivation.
//!
//! Recomputed from the full completed-operation set whenever any
//! operation changes; never patched incrementally, so the stored value
//! cannot drift from the per-operation facts.

use std::collections::HashSet;

use serde::Serialize;

use crate::catalog::OperationCode;

/// Human-facing aggregate status of a (job, version).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    PrintReady,
    Printed,
    DigitalCut,
    Slitter,
    ProductionFinished,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::PrintReady => "print_ready",
            JobStatus::Printed => "printed",
            JobStatus::DigitalCut => "digital_cut",
            JobStatus::Slitter => "slitter",
            JobStatus::ProductionFinished => "production_finished",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of operations completed for one (job, version).
#[derive(Debug, Clone, Default)]
pub struct CompletedOperations(HashSet<OperationCode>);

impl CompletedOperations {
    pub fn insert(&mut self, code: OperationCode) {
        self.0.insert(code);
    }

    pub fn contains(&self, code: OperationCode) -> bool {
        self.0.contains(&code)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Builds the set from catalog operation ids; unknown ids are ignored.
    pub fn from_operation_ids<'a, I>(ids: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self(
            ids.into_iter()
                .filter_map(OperationCode::from_operation_id)
                .collect(),
        )
    }
}

impl FromIterator<OperationCode> for CompletedOperations {
    fn from_iter<T: IntoIterator<Item = OperationCode>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Derives the aggregate status. Priority-ordered, first match wins —
/// the rules are not cumulative.
///
/// Backscore without kiss-cut deliberately falls through to the lower
/// rules; see DESIGN.md for why this asymmetry is preserved.
pub fn derive_status(completed: &CompletedOperations) -> JobStatus {
    if completed.contains(OperationCode::Slit) {
        JobStatus::ProductionFinished
    } else if completed.contains(OperationCode::KissCut) {
        JobStatus::Slitter
    } else if completed.contains(OperationCode::Coat) {
        JobStatus::DigitalCut
    } else if completed.contains(OperationCode::Print) {
        JobStatus::Printed
    } else {
        JobStatus::PrintReady
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(codes: &[OperationCode]) -> CompletedOperations {
        codes.iter().copied().collect()
    }

    #[test]
    fn test_nothing_completed() {
        assert_eq!(derive_status(&CompletedOperations::default()), JobStatus::PrintReady);
    }

    #[test]
    fn test_print_alone() {
        assert_eq!(derive_status(&set(&[OperationCode::Print])), JobStatus::Printed);
    }

    #[test]
    fn test_coat_without_kiss_cut() {
        assert_eq!(derive_status(&set(&[OperationCode::Coat])), JobStatus::DigitalCut);
        assert_eq!(
            derive_status(&set(&[OperationCode::Print, OperationCode::Coat])),
            JobStatus::DigitalCut
        );
    }

    #[test]
    fn test_kiss_cut_reaches_slitter() {
        assert_eq!(derive_status(&set(&[OperationCode::KissCut])), JobStatus::Slitter);
        assert_eq!(
            derive_status(&set(&[OperationCode::KissCut, OperationCode::Backscore])),
            JobStatus::Slitter
        );
    }

    #[test]
    fn test_backscore_alone_falls_through() {
        // Backscore without kiss-cut does not reach slitter.
        assert_eq!(
            derive_status(&set(&[OperationCode::Print, OperationCode::Backscore])),
            JobStatus::Printed
        );
        assert_eq!(
            derive_status(&set(&[OperationCode::Coat, OperationCode::Backscore])),
            JobStatus::DigitalCut
        );
    }

    #[test]
    fn test_slit_wins_regardless() {
        assert_eq!(
            derive_status(&set(&[OperationCode::Slit])),
            JobStatus::ProductionFinished
        );
        assert_eq!(
            derive_status(&set(&[
                OperationCode::Print,
                OperationCode::Coat,
                OperationCode::KissCut,
                OperationCode::Backscore,
                OperationCode::Slit,
            ])),
            JobStatus::ProductionFinished
        );
    }

    #[test]
    fn test_from_operation_ids() {
        let completed = CompletedOperations::from_operation_ids(["op001", "op003", "bogus"]);
        assert!(completed.contains(OperationCode::Print));
        assert!(completed.contains(OperationCode::KissCut));
        assert!(!completed.contains(OperationCode::Coat));
        assert_eq!(derive_status(&completed), JobStatus::Slitter);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let s = serde_json::to_string(&JobStatus::ProductionFinished).unwrap();
        assert_eq!(s, "\"production_finished\"");
    }
}
