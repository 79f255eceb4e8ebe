//! Desired-vs-observed set algebra.

use serde::Serialize;

use dagger_core::DagSet;

/// The three-way split of `desired ∪ observed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RawDiff {
    /// Running but no longer desired.
    pub to_stop: DagSet,
    /// Desired but not running.
    pub to_start: DagSet,
    /// Desired and running; candidates for a drift check.
    pub same: DagSet,
}

impl RawDiff {
    pub fn is_empty(&self) -> bool {
        self.to_stop.is_empty() && self.to_start.is_empty() && self.same.is_empty()
    }
}

pub fn raw_diff(desired: &DagSet, observed: &DagSet) -> RawDiff {
    RawDiff {
        to_stop: observed.difference(desired).cloned().collect(),
        to_start: desired.difference(observed).cloned().collect(),
        same: intersection(desired, observed),
    }
}

/// `a ∩ b`, iterating whichever set is smaller.
pub fn intersection(a: &DagSet, b: &DagSet) -> DagSet {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    small
        .iter()
        .filter(|id| large.contains(*id))
        .cloned()
        .collect::<DagSet>()
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use dagger_core::dag_set;

    use super::*;

    #[test]
    fn concrete_scenario() {
        let diff = raw_diff(&dag_set(["a", "b"]), &dag_set(["b", "c"]));
        assert_eq!(diff.to_stop, dag_set(["c"]));
        assert_eq!(diff.to_start, dag_set(["a"]));
        assert_eq!(diff.same, dag_set(["b"]));
    }

    #[rstest]
    #[case(&[], &[])]
    #[case(&["a"], &[])]
    #[case(&[], &["a"])]
    #[case(&["a", "b", "c"], &["c", "d"])]
    #[case(&["x", "y"], &["x", "y"])]
    fn partition_covers_union_disjointly(#[case] desired: &[&str], #[case] observed: &[&str]) {
        let desired = dag_set(desired.iter().copied());
        let observed = dag_set(observed.iter().copied());
        let diff = raw_diff(&desired, &observed);

        assert!(diff.to_stop.is_disjoint(&diff.to_start));
        assert!(diff.to_stop.is_disjoint(&diff.same));
        assert!(diff.to_start.is_disjoint(&diff.same));

        let mut covered = diff.to_stop.clone();
        covered.extend(diff.to_start.iter().cloned());
        covered.extend(diff.same.iter().cloned());
        let union: DagSet = desired.union(&observed).cloned().collect();
        assert_eq!(covered, union);
    }

    #[test]
    fn intersection_is_symmetric() {
        let a = dag_set(["a", "b", "c", "d"]);
        let b = dag_set(["d", "b"]);
        assert_eq!(intersection(&a, &b), intersection(&b, &a));
        assert_eq!(intersection(&a, &b), dag_set(["b", "d"]));
    }
}
