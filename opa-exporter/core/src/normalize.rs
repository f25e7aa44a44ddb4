use crate::{Constraint, RawDocument, Violation};
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum MalformedConstraint {
    #[error("missing {0}")]
    MissingField(&'static str),

    #[error("invalid constraint document: {0}")]
    Decode(#[from] serde_json::Error),
}

// Constraint kinds are generated from templates, so each kind has its own parameter schema. Only
// the fields shared by every kind are decoded here; everything else is ignored.

#[derive(Debug, Deserialize)]
struct Document {
    #[serde(default)]
    kind: Option<String>,

    #[serde(default)]
    metadata: Option<Metadata>,

    #[serde(default)]
    spec: Option<Spec>,

    #[serde(default)]
    status: Option<Status>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Spec {
    #[serde(default)]
    enforcement_action: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Status {
    #[serde(default)]
    total_violations: Option<f64>,

    #[serde(default)]
    violations: Option<Vec<RawViolation>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawViolation {
    #[serde(default)]
    kind: Option<String>,

    #[serde(default)]
    name: Option<String>,

    #[serde(default)]
    namespace: Option<String>,

    #[serde(default)]
    message: Option<String>,

    #[serde(default)]
    enforcement_action: Option<String>,
}

/// Decodes a constraint instance.
///
/// Absent `spec`/`status` fields default to empty values; a missing `totalViolations` is treated
/// as zero. A known field holding a value of the wrong type fails the whole document.
pub fn normalize(doc: &RawDocument) -> Result<Constraint, MalformedConstraint> {
    let Document {
        kind,
        metadata,
        spec,
        status,
    } = Document::deserialize(doc)?;

    let kind = kind
        .filter(|k| !k.is_empty())
        .ok_or(MalformedConstraint::MissingField("kind"))?;
    let Metadata { name, namespace } =
        metadata.ok_or(MalformedConstraint::MissingField("metadata"))?;
    let name = name
        .filter(|n| !n.is_empty())
        .ok_or(MalformedConstraint::MissingField("metadata.name"))?;
    tracing::trace!(%kind, %name, ?namespace, "Decoded constraint");

    let enforcement_action = spec
        .and_then(|Spec { enforcement_action }| enforcement_action)
        .unwrap_or_default();

    let (total_violations, violations) = match status {
        Some(Status {
            total_violations,
            violations,
        }) => (
            total_violations.unwrap_or_default(),
            violations.unwrap_or_default(),
        ),
        None => (0.0, Vec::new()),
    };

    Ok(Constraint {
        kind,
        name,
        enforcement_action,
        total_violations,
        violations: violations.into_iter().map(Violation::from).collect(),
    })
}

impl From<RawViolation> for Violation {
    fn from(v: RawViolation) -> Self {
        Self {
            kind: v.kind.unwrap_or_default(),
            name: v.name.unwrap_or_default(),
            namespace: v.namespace.filter(|ns| !ns.is_empty()),
            message: v.message.unwrap_or_default(),
            enforcement_action: v.enforcement_action.unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn decodes_audited_constraint() {
        let doc = json!({
            "apiVersion": "constraints.gatekeeper.sh/v1beta1",
            "kind": "K8sRequiredLabels",
            "metadata": {
                "name": "ns-must-have-owner",
                "uid": "0b5c3a39-7d0a-4a2e-9d3c-6b1f0b8a1e11",
            },
            "spec": {
                "enforcementAction": "dryrun",
                "match": {"kinds": [{"apiGroups": [""], "kinds": ["Namespace"]}]},
                "parameters": {"labels": ["owner"]},
            },
            "status": {
                "auditTimestamp": "2024-01-01T00:00:00Z",
                "totalViolations": 2,
                "violations": [
                    {
                        "enforcementAction": "dryrun",
                        "kind": "Namespace",
                        "message": "you must provide labels: {\"owner\"}",
                        "name": "default",
                    },
                    {
                        "enforcementAction": "dryrun",
                        "kind": "ConfigMap",
                        "message": "you must provide labels: {\"owner\"}",
                        "name": "settings",
                        "namespace": "kube-public",
                        "version": "v1",
                    },
                ],
            },
        });

        assert_eq!(
            normalize(&doc).expect("constraint must decode"),
            Constraint {
                kind: "K8sRequiredLabels".to_string(),
                name: "ns-must-have-owner".to_string(),
                enforcement_action: "dryrun".to_string(),
                total_violations: 2.0,
                violations: vec![
                    Violation {
                        kind: "Namespace".to_string(),
                        name: "default".to_string(),
                        namespace: None,
                        message: "you must provide labels: {\"owner\"}".to_string(),
                        enforcement_action: "dryrun".to_string(),
                    },
                    Violation {
                        kind: "ConfigMap".to_string(),
                        name: "settings".to_string(),
                        namespace: Some("kube-public".to_string()),
                        message: "you must provide labels: {\"owner\"}".to_string(),
                        enforcement_action: "dryrun".to_string(),
                    },
                ],
            }
        );
    }

    #[test]
    fn defaults_unaudited_constraint() {
        let doc = json!({
            "kind": "K8sAllowedRepos",
            "metadata": {"name": "repo-is-openpolicyagent"},
            "spec": {"enforcementAction": "deny"},
        });

        let constraint = normalize(&doc).expect("constraint must decode");
        assert_eq!(constraint.enforcement_action, "deny");
        assert_eq!(constraint.total_violations, 0.0);
        assert!(constraint.violations.is_empty());
    }

    #[test]
    fn tolerates_null_sections() {
        let doc = json!({
            "kind": "K8sAllowedRepos",
            "metadata": {"name": "repo-is-openpolicyagent", "namespace": null},
            "spec": null,
            "status": {"totalViolations": null, "violations": null},
        });

        let constraint = normalize(&doc).expect("constraint must decode");
        assert_eq!(constraint.enforcement_action, "");
        assert_eq!(constraint.total_violations, 0.0);
        assert!(constraint.violations.is_empty());
    }

    #[test]
    fn empty_violation_namespace_is_unset() {
        let doc = json!({
            "kind": "K8sRequiredLabels",
            "metadata": {"name": "ns-must-have-owner"},
            "status": {
                "totalViolations": 1,
                "violations": [{"kind": "Namespace", "name": "default", "namespace": ""}],
            },
        });

        let constraint = normalize(&doc).expect("constraint must decode");
        assert_eq!(constraint.violations[0].namespace, None);
        assert_eq!(constraint.violations[0].message, "");
    }

    #[test]
    fn rejects_mistyped_status() {
        let doc = json!({
            "kind": "K8sRequiredLabels",
            "metadata": {"name": "ns-must-have-owner"},
            "status": {"totalViolations": "many"},
        });
        assert!(matches!(
            normalize(&doc),
            Err(MalformedConstraint::Decode(_))
        ));

        let doc = json!({
            "kind": "K8sRequiredLabels",
            "metadata": {"name": "ns-must-have-owner"},
            "status": {"violations": {"kind": "Namespace"}},
        });
        assert!(matches!(
            normalize(&doc),
            Err(MalformedConstraint::Decode(_))
        ));
    }

    #[test]
    fn rejects_missing_envelope() {
        let doc = json!({"metadata": {"name": "ns-must-have-owner"}});
        assert!(matches!(
            normalize(&doc),
            Err(MalformedConstraint::MissingField("kind"))
        ));

        let doc = json!({"kind": "K8sRequiredLabels", "metadata": {}});
        assert!(matches!(
            normalize(&doc),
            Err(MalformedConstraint::MissingField("metadata.name"))
        ));

        assert!(matches!(
            normalize(&json!("K8sRequiredLabels")),
            Err(MalformedConstraint::Decode(_))
        ));
    }
}
