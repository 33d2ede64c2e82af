//! Fixed operation catalog — the pipeline stages in production order.
//!
//! The stage set is not user-configurable; this enum is the authoritative
//! ordering and the seeded `operations` table mirrors it.

/// One pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCode {
    Print,
    Coat,
    KissCut,
    Backscore,
    Slit,
}

impl OperationCode {
    /// All stages in pipeline order.
    pub const PIPELINE: [OperationCode; 5] = [
        OperationCode::Print,
        OperationCode::Coat,
        OperationCode::KissCut,
        OperationCode::Backscore,
        OperationCode::Slit,
    ];

    /// Catalog row id, lowercase to match the operation tables.
    pub fn operation_id(self) -> &'static str {
        match self {
            OperationCode::Print => "op001",
            OperationCode::Coat => "op002",
            OperationCode::KissCut => "op003",
            OperationCode::Backscore => "op004",
            OperationCode::Slit => "op005",
        }
    }

    /// Stable short code, used as the key in the jobs operations flag map.
    pub fn code(self) -> &'static str {
        match self {
            OperationCode::Print => "print",
            OperationCode::Coat => "coat",
            OperationCode::KissCut => "kiss_cut",
            OperationCode::Backscore => "backscore",
            OperationCode::Slit => "slit",
        }
    }

    /// Human-facing name, matching the seeded catalog.
    pub fn display_name(self) -> &'static str {
        match self {
            OperationCode::Print => "Print",
            OperationCode::Coat => "Coat",
            OperationCode::KissCut => "Kiss Cut",
            OperationCode::Backscore => "Backscore",
            OperationCode::Slit => "Slit",
        }
    }

    /// 1-based position in the pipeline.
    pub fn sequence(self) -> u8 {
        match self {
            OperationCode::Print => 1,
            OperationCode::Coat => 2,
            OperationCode::KissCut => 3,
            OperationCode::Backscore => 4,
            OperationCode::Slit => 5,
        }
    }

    /// Whether the stage may run in parallel with its neighbour.
    pub fn can_run_parallel(self) -> bool {
        matches!(self, OperationCode::KissCut | OperationCode::Backscore)
    }

    /// The preceding stage in pipeline order, if any.
    pub fn predecessor(self) -> Option<OperationCode> {
        let seq = self.sequence();
        Self::PIPELINE.iter().copied().find(|o| o.sequence() + 1 == seq)
    }

    /// Parses a catalog id like `op003` or `OP003`.
    pub fn from_operation_id(id: &str) -> Option<OperationCode> {
        let normalized = id.trim().to_lowercase();
        Self::PIPELINE
            .iter()
            .copied()
            .find(|o| o.operation_id() == normalized)
    }

    /// Legacy name normalizer: lowercased substring matching, so
    /// "Kiss-Cut", "kiss cut" and "KissCutting" all resolve.
    pub fn from_name(name: &str) -> Option<OperationCode> {
        let n = name.to_lowercase();
        if n.contains("print") {
            Some(OperationCode::Print)
        } else if n.contains("coat") {
            Some(OperationCode::Coat)
        } else if n.contains("kiss") && n.contains("cut") {
            Some(OperationCode::KissCut)
        } else if n.contains("backscore") {
            Some(OperationCode::Backscore)
        } else if n.contains("slit") {
            Some(OperationCode::Slit)
        } else {
            None
        }
    }

    /// Resolves either a catalog id or a (legacy) name.
    pub fn resolve(input: &str) -> Option<OperationCode> {
        Self::from_operation_id(input).or_else(|| Self::from_name(input))
    }
}

impl std::fmt::Display for OperationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_order() {
        let seqs: Vec<u8> = OperationCode::PIPELINE.iter().map(|o| o.sequence()).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_predecessor_chain() {
        assert_eq!(OperationCode::Print.predecessor(), None);
        assert_eq!(OperationCode::Coat.predecessor(), Some(OperationCode::Print));
        assert_eq!(
            OperationCode::Slit.predecessor(),
            Some(OperationCode::Backscore)
        );
    }

    #[test]
    fn test_from_operation_id_case_insensitive() {
        assert_eq!(
            OperationCode::from_operation_id("OP003"),
            Some(OperationCode::KissCut)
        );
        assert_eq!(
            OperationCode::from_operation_id("op001"),
            Some(OperationCode::Print)
        );
        assert_eq!(OperationCode::from_operation_id("op099"), None);
    }

    #[test]
    fn test_from_name_variants() {
        assert_eq!(OperationCode::from_name("Printing"), Some(OperationCode::Print));
        assert_eq!(OperationCode::from_name("kiss cut"), Some(OperationCode::KissCut));
        assert_eq!(OperationCode::from_name("Kiss-Cut"), Some(OperationCode::KissCut));
        assert_eq!(OperationCode::from_name("kisscut"), Some(OperationCode::KissCut));
        assert_eq!(OperationCode::from_name("Slitting"), Some(OperationCode::Slit));
        assert_eq!(OperationCode::from_name("Backscore"), Some(OperationCode::Backscore));
        assert_eq!(OperationCode::from_name("laminate"), None);
    }

    #[test]
    fn test_parallel_flags() {
        assert!(OperationCode::KissCut.can_run_parallel());
        assert!(OperationCode::Backscore.can_run_parallel());
        assert!(!OperationCode::Print.can_run_parallel());
        assert!(!OperationCode::Slit.can_run_parallel());
    }

    #[test]
    fn test_resolve_prefers_ids() {
        assert_eq!(OperationCode::resolve("op002"), Some(OperationCode::Coat));
        assert_eq!(OperationCode::resolve("Coating"), Some(OperationCode::Coat));
        assert_eq!(OperationCode::resolve("unknown"), None);
    }
}
