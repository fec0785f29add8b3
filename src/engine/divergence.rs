//! Divergence scoring - how disruptive a set of edits is

use crate::diff::{EditOperation, OpKind, PointerPath};

/// Weight of each operation kind. Entities appearing or disappearing
/// outweigh value updates.
pub fn operation_weight(kind: OpKind) -> f64 {
    match kind {
        OpKind::Add | OpKind::Remove => 2.0,
        OpKind::Replace => 1.0,
        OpKind::Move => 0.5,
        OpKind::Copy | OpKind::Test => 0.0,
    }
}

/// Weighted sum over `operations`
pub fn calculate_divergence_score(operations: &[EditOperation]) -> f64 {
    operations.iter().map(|op| operation_weight(op.kind)).sum()
}

/// True if any operation touches one of `critical_paths`
pub fn has_critical_changes(operations: &[EditOperation], critical_paths: &[PointerPath]) -> bool {
    operations
        .iter()
        .any(|op| critical_paths.iter().any(|prefix| op.path.starts_with(prefix)))
}

/// Summary of a diff's severity
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DivergenceReport {
    pub score: f64,
    pub critical: bool,
    pub operation_count: usize,
}

/// Divergence scorer
pub struct DivergenceScorer;

impl DivergenceScorer {
    pub fn assess(
        operations: &[EditOperation],
        critical_paths: &[PointerPath],
    ) -> DivergenceReport {
        DivergenceReport {
            score: calculate_divergence_score(operations),
            critical: has_critical_changes(operations, critical_paths),
            operation_count: operations.len(),
        }
    }

    /// Whether the report should take the divergent (rollback/discard) branch
    pub fn is_divergent(report: &DivergenceReport, threshold: f64, honor_critical: bool) -> bool {
        report.score > threshold || (honor_critical && report.critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn p(s: &str) -> PointerPath {
        PointerPath::parse(s).unwrap()
    }

    #[test]
    fn weights_by_kind() {
        let ops = vec![
            EditOperation::add(p("/a"), json!(1)),
            EditOperation::remove(p("/b")),
            EditOperation::replace(p("/c"), json!(2)),
            EditOperation::move_from(p("/d"), p("/e")),
            EditOperation::copy_from(p("/d"), p("/f")),
            EditOperation::test(p("/g"), json!(null)),
        ];
        assert_eq!(calculate_divergence_score(&ops), 5.5);
        assert_eq!(calculate_divergence_score(&[]), 0.0);
    }

    #[test]
    fn critical_prefixes() {
        let ops = vec![EditOperation::replace(p("/units/2/position/x"), json!(4))];
        assert!(has_critical_changes(&ops, &[p("/tiles"), p("/units")]));
        assert!(!has_critical_changes(&ops, &[p("/tiles")]));
        assert!(!has_critical_changes(&ops, &[]));
    }

    #[test]
    fn critical_override_is_opt_in() {
        let ops = vec![EditOperation::replace(p("/current_player"), json!(2))];
        let report = DivergenceScorer::assess(&ops, &[p("/current_player")]);
        assert!(report.critical);
        assert!(!DivergenceScorer::is_divergent(&report, 5.0, false));
        assert!(DivergenceScorer::is_divergent(&report, 5.0, true));
    }

    fn arb_kind() -> impl Strategy<Value = OpKind> {
        prop_oneof![
            Just(OpKind::Add),
            Just(OpKind::Remove),
            Just(OpKind::Replace),
            Just(OpKind::Move),
            Just(OpKind::Copy),
            Just(OpKind::Test),
        ]
    }

    fn op_of(kind: OpKind, i: usize) -> EditOperation {
        EditOperation {
            kind,
            path: PointerPath::root().child(i),
            value: Some(json!(i)),
            from: Some(PointerPath::root()),
        }
    }

    proptest! {
        /// Appending structural edits never lowers the score
        #[test]
        fn structural_edits_are_monotonic(
            base in prop::collection::vec(arb_kind(), 0..20),
            extra in prop::collection::vec(prop::bool::ANY, 1..10),
        ) {
            let mut ops: Vec<EditOperation> =
                base.iter().enumerate().map(|(i, k)| op_of(*k, i)).collect();
            let before = calculate_divergence_score(&ops);

            for (i, is_add) in extra.iter().enumerate() {
                let kind = if *is_add { OpKind::Add } else { OpKind::Remove };
                ops.push(op_of(kind, base.len() + i));
            }
            let after = calculate_divergence_score(&ops);

            prop_assert!(after >= before);
            prop_assert_eq!(after - before, 2.0 * extra.len() as f64);
        }
    }
}
