//! OPA Constraint Exporter
//!
//! The exporter periodically polls the cluster for Gatekeeper constraints and publishes their
//! state as a set of metrics. A single refresh cycle proceeds as follows:
//!
//! - Discover the constraint kinds registered under the constraints API group/version. Each
//!   Gatekeeper `ConstraintTemplate` produces its own kind, so this set changes over time.
//! - List every instance of each kind. Kinds are listed concurrently; a kind that fails to list
//!   is skipped without affecting the others.
//! - Normalize each instance into a [`Constraint`], skipping instances that cannot be decoded.
//! - Deduplicate the violations reported across all constraints.
//! - Publish the resulting [`MetricSnapshot`], replacing the previous one whole.
//!
//! ```text
//! [ Scheduler ] -> [ discover ] -> [ list ] -> [ normalize ] -> [ dedup ] -> [ Publisher ]
//!                                                                                  |
//!                                                        [ scrape ] <- [ Reader ] <-
//! ```
//!
//! Readers only ever observe complete snapshots: a snapshot is built in full before it is
//! swapped in, and the swap replaces a single shared pointer.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod constraint;
pub mod dedup;
pub mod discover;
pub mod metrics;
pub mod normalize;
pub mod refresh;
pub mod scheduler;
pub mod snapshot;


pub use self::{
    constraint::{Constraint, ConstraintKind, Violation},
    dedup::{dedup, DedupKey, Deduplicated},
    discover::{discover, list, DiscoveryUnavailable, ListFailure},
    metrics::RefreshMetrics,
    normalize::{normalize, MalformedConstraint},
    refresh::{Outcome, Refresher},
    scheduler::Scheduler,
    snapshot::{ConstraintInfo, MetricSnapshot, Reader, ViolationRecord},
};
use anyhow::Result;

/// The API group under which Gatekeeper registers constraint kinds.
pub const CONSTRAINTS_GROUP: &str = "constraints.gatekeeper.sh";

/// The API version under which Gatekeeper serves constraint kinds.
pub const CONSTRAINTS_VERSION: &str = "v1beta1";

/// An untyped API object, as returned by the API server.
pub type RawDocument = serde_json::Value;

/// Describes a resource advertised by API discovery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResourceInfo {
    pub group: String,
    pub version: String,
    pub kind: String,

    /// The plural resource name, e.g. `k8srequiredlabels`. Subresources are suffixed, as in
    /// `k8srequiredlabels/status`.
    pub name: String,

    pub verbs: Vec<String>,
}

/// Access to the API server.
#[async_trait::async_trait]
pub trait ResourceClient: Send + Sync {
    /// Returns all resources registered under the given group/version.
    async fn list_kinds(&self, group: &str, version: &str) -> Result<Vec<ApiResourceInfo>>;

    /// Returns every instance of the given kind, across all namespaces.
    async fn list_instances(&self, kind: &ConstraintKind) -> Result<Vec<RawDocument>>;
}
