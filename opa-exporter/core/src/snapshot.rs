use crate::{dedup::DedupKey, Constraint, Violation};
use std::sync::Arc;
use tokio::sync::watch;

/// The full set of metric records produced by one refresh cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricSnapshot {
    /// The refresh cycle that produced this snapshot.
    pub generation: u64,

    /// One record per constraint, in discovery order.
    pub constraints: Vec<ConstraintInfo>,

    /// One record per distinct violation, in first-seen order.
    pub violations: Vec<ViolationRecord>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ConstraintInfo {
    pub kind: String,
    pub name: String,
    pub enforcement_action: String,
    pub total_violations: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViolationRecord {
    pub constraint_kind: String,
    pub constraint_name: String,
    pub violating_kind: String,
    pub violating_name: String,
    pub violating_namespace: Option<String>,
    pub message: String,
    pub enforcement_action: String,
}

/// Replaces the published snapshot. There is exactly one publisher.
#[derive(Debug)]
pub struct Publisher(watch::Sender<Option<Arc<MetricSnapshot>>>);

/// Reads the most recently published snapshot.
#[derive(Clone, Debug)]
pub struct Reader(watch::Receiver<Option<Arc<MetricSnapshot>>>);

pub fn pair() -> (Publisher, Reader) {
    let (tx, rx) = watch::channel(None);
    (Publisher(tx), Reader(rx))
}

// === impl MetricSnapshot ===

impl MetricSnapshot {
    pub fn new(
        generation: u64,
        constraints: &[Constraint],
        violations: Vec<ViolationRecord>,
    ) -> Self {
        Self {
            generation,
            constraints: constraints.iter().map(ConstraintInfo::from).collect(),
            violations,
        }
    }
}

// === impl ConstraintInfo ===

impl ConstraintInfo {
    /// Renders the violation count as a label value, e.g. `2.000000`.
    pub fn total_violations_label(&self) -> String {
        format!("{:.6}", self.total_violations)
    }
}

impl From<&Constraint> for ConstraintInfo {
    fn from(c: &Constraint) -> Self {
        Self {
            kind: c.kind.clone(),
            name: c.name.clone(),
            enforcement_action: c.enforcement_action.clone(),
            total_violations: c.total_violations,
        }
    }
}

// === impl ViolationRecord ===

impl ViolationRecord {
    pub fn new(constraint: &Constraint, violation: &Violation) -> Self {
        Self {
            constraint_kind: constraint.kind.clone(),
            constraint_name: constraint.name.clone(),
            violating_kind: violation.kind.clone(),
            violating_name: violation.name.clone(),
            violating_namespace: violation.namespace.clone(),
            message: violation.message.clone(),
            enforcement_action: violation.enforcement_action.clone(),
        }
    }

    pub fn key(&self) -> DedupKey {
        DedupKey {
            constraint_kind: self.constraint_kind.clone(),
            constraint_name: self.constraint_name.clone(),
            violating_name: self.violating_name.clone(),
            violating_namespace: self.violating_namespace.clone(),
            message: self.message.clone(),
        }
    }
}

// === impl Publisher ===

impl Publisher {
    /// Replaces the visible snapshot. Readers observe either the previous snapshot or this one.
    pub fn publish(&self, snapshot: MetricSnapshot) -> Arc<MetricSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.0.send_replace(Some(snapshot.clone()));
        snapshot
    }

    pub fn reader(&self) -> Reader {
        Reader(self.0.subscribe())
    }
}

// === impl Reader ===

impl Reader {
    /// Returns the current snapshot, or `None` until the first cycle has been published.
    pub fn read(&self) -> Option<Arc<MetricSnapshot>> {
        self.0.borrow().clone()
    }

    /// Waits until a snapshot newer than the last one seen by this reader is published.
    ///
    /// Returns `None` if the publisher has been dropped.
    pub async fn next(&mut self) -> Option<Arc<MetricSnapshot>> {
        self.0.changed().await.ok()?;
        self.0.borrow_and_update().clone()
    }
}
