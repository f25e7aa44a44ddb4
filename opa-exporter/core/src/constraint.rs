use std::fmt;

/// Identifies a discovered constraint kind.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstraintKind {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

/// A normalized constraint instance.
#[derive(Clone, Debug, PartialEq)]
pub struct Constraint {
    pub kind: String,
    pub name: String,
    pub enforcement_action: String,

    /// The violation count reported by the audit controller. Zero when the constraint has not
    /// been audited yet.
    pub total_violations: f64,

    /// Violations in the order the audit controller reported them.
    pub violations: Vec<Violation>,
}

/// A single audit violation reported on a constraint.
///
/// `kind`, `name`, and `namespace` identify the violating object, not the constraint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Violation {
    pub kind: String,
    pub name: String,

    /// Unset for cluster-scoped objects.
    pub namespace: Option<String>,

    pub message: String,
    pub enforcement_action: String,
}

// === impl ConstraintKind ===

impl ConstraintKind {
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            return self.version.clone();
        }
        format!("{}/{}", self.group, self.version)
    }
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.plural, self.group, self.version)
    }
}
