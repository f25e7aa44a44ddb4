use crate::{Constraint, ViolationRecord};
use ahash::AHashSet as HashSet;
use std::fmt;

/// Identifies a violation within a refresh cycle.
///
/// The violation's own enforcement action and kind are not part of the key: two reports that
/// differ only in those fields are considered the same violation.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DedupKey {
    pub constraint_kind: String,
    pub constraint_name: String,
    pub violating_name: String,
    pub violating_namespace: Option<String>,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Deduplicated {
    /// Distinct violations, in first-seen order.
    pub records: Vec<ViolationRecord>,

    /// The key of every discarded duplicate, in the order it was encountered.
    pub suppressed: Vec<DedupKey>,
}

/// Collapses the violations of all constraints into distinct records. The first occurrence of a
/// key wins.
pub fn dedup(constraints: &[Constraint]) -> Deduplicated {
    dedup_records(constraints.iter().flat_map(|c| {
        c.violations
            .iter()
            .map(move |v| ViolationRecord::new(c, v))
    }))
}

pub fn dedup_records(records: impl IntoIterator<Item = ViolationRecord>) -> Deduplicated {
    let mut seen = HashSet::new();
    let mut out = Deduplicated::default();
    for record in records {
        let key = record.key();
        if seen.contains(&key) {
            out.suppressed.push(key);
            continue;
        }
        seen.insert(key);
        out.records.push(record);
    }
    out
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}",
            self.constraint_kind,
            self.constraint_name,
            self.violating_name,
            self.violating_namespace.as_deref().unwrap_or_default(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Violation;
    use pretty_assertions::assert_eq;

    fn mk_violation(name: &str, ns: Option<&str>, msg: &str, action: &str) -> Violation {
        Violation {
            kind: "Pod".to_string(),
            name: name.to_string(),
            namespace: ns.map(ToString::to_string),
            message: msg.to_string(),
            enforcement_action: action.to_string(),
        }
    }

    fn mk_constraint(kind: &str, name: &str, violations: Vec<Violation>) -> Constraint {
        Constraint {
            kind: kind.to_string(),
            name: name.to_string(),
            enforcement_action: "deny".to_string(),
            total_violations: violations.len() as f64,
            violations,
        }
    }

    #[test]
    fn collapses_same_key_with_different_enforcement() {
        let constraints = [mk_constraint(
            "K8sAllowedRepos",
            "repo-is-openpolicyagent",
            vec![
                mk_violation("nginx", Some("default"), "invalid repo", "deny"),
                mk_violation("nginx", Some("default"), "invalid repo", "dryrun"),
            ],
        )];

        let Deduplicated {
            records,
            suppressed,
        } = dedup(&constraints);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].enforcement_action, "deny");
        assert_eq!(suppressed, vec![records[0].key()]);
        assert_eq!(
            suppressed[0].to_string(),
            "K8sAllowedRepos-repo-is-openpolicyagent-nginx-default-invalid repo"
        );
    }

    #[test]
    fn distinguishes_each_key_component() {
        let constraints = [
            mk_constraint(
                "K8sAllowedRepos",
                "repo-is-openpolicyagent",
                vec![
                    mk_violation("nginx", Some("default"), "invalid repo", "deny"),
                    mk_violation("nginx", Some("kube-system"), "invalid repo", "deny"),
                    mk_violation("nginx", None, "invalid repo", "deny"),
                    mk_violation("redis", Some("default"), "invalid repo", "deny"),
                    mk_violation("nginx", Some("default"), "invalid tag", "deny"),
                ],
            ),
            mk_constraint(
                "K8sAllowedRepos",
                "repo-is-quay",
                vec![mk_violation("nginx", Some("default"), "invalid repo", "deny")],
            ),
            mk_constraint(
                "K8sBlockNodePort",
                "repo-is-openpolicyagent",
                vec![mk_violation("nginx", Some("default"), "invalid repo", "deny")],
            ),
        ];

        let out = dedup(&constraints);
        assert_eq!(out.records.len(), 7);
        assert!(out.suppressed.is_empty());
    }

    #[test]
    fn preserves_first_seen_order_across_constraints() {
        let constraints = [
            mk_constraint(
                "K8sAllowedRepos",
                "a",
                vec![
                    mk_violation("pod-1", Some("ns"), "m", "deny"),
                    mk_violation("pod-0", Some("ns"), "m", "deny"),
                ],
            ),
            mk_constraint(
                "K8sAllowedRepos",
                "b",
                vec![mk_violation("pod-2", Some("ns"), "m", "deny")],
            ),
            mk_constraint(
                "K8sAllowedRepos",
                "a",
                vec![
                    mk_violation("pod-0", Some("ns"), "m", "warn"),
                    mk_violation("pod-3", Some("ns"), "m", "deny"),
                ],
            ),
        ];

        let out = dedup(&constraints);
        let names = out
            .records
            .iter()
            .map(|r| (r.constraint_name.as_str(), r.violating_name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![("a", "pod-1"), ("a", "pod-0"), ("b", "pod-2"), ("a", "pod-3")]
        );
        assert_eq!(out.suppressed.len(), 1);
        assert_eq!(out.suppressed[0].violating_name, "pod-0");
    }

    #[test]
    fn idempotent() {
        let constraints = [mk_constraint(
            "K8sAllowedRepos",
            "repo-is-openpolicyagent",
            vec![
                mk_violation("nginx", Some("default"), "invalid repo", "deny"),
                mk_violation("redis", Some("default"), "invalid repo", "deny"),
                mk_violation("nginx", Some("default"), "invalid repo", "warn"),
                mk_violation("redis", Some("default"), "invalid repo", "deny"),
            ],
        )];

        let once = dedup(&constraints);
        assert_eq!(once.suppressed.len(), 2);

        let twice = dedup_records(once.records.clone());
        assert_eq!(twice.records, once.records);
        assert!(twice.suppressed.is_empty());
    }

    #[test]
    fn no_violations() {
        let constraints = [mk_constraint("K8sAllowedRepos", "a", vec![])];
        assert_eq!(dedup(&constraints), Deduplicated::default());
        assert_eq!(dedup(&[]), Deduplicated::default());
    }
}
