use crate::refresh::Outcome;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{
        counter::Counter,
        family::Family,
        histogram::{exponential_buckets, Histogram},
    },
    registry::{Registry, Unit},
};
use tokio::time;

/// Describes the exporter's own refresh activity.
#[derive(Clone, Debug)]
pub struct RefreshMetrics {
    cycles: Family<OutcomeLabels, Counter>,
    duration: Histogram,
    list_failures: Family<KindLabels, Counter>,
    malformed: Family<KindLabels, Counter>,
    duplicates: Counter,
    coalesced: Counter,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct OutcomeLabels {
    outcome: &'static str,
}

#[derive(Clone, Hash, PartialEq, Eq, EncodeLabelSet, Debug)]
struct KindLabels {
    kind: String,
}

// === impl RefreshMetrics ===

impl RefreshMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let cycles = Family::<OutcomeLabels, Counter>::default();
        reg.register(
            "cycles",
            "Total number of refresh cycles by outcome",
            cycles.clone(),
        );

        // Cycles are bounded by the list timeout, so anything past a few minutes is off the
        // scale anyway.
        let duration = Histogram::new(exponential_buckets(0.01, 2.0, 15));
        reg.register_with_unit(
            "duration",
            "Histogram of refresh cycle latency",
            Unit::Seconds,
            duration.clone(),
        );

        let list_failures = Family::<KindLabels, Counter>::default();
        reg.register(
            "list_failures",
            "Total number of failed attempts to list a constraint kind",
            list_failures.clone(),
        );

        let malformed = Family::<KindLabels, Counter>::default();
        reg.register(
            "malformed_constraints",
            "Total number of constraint instances that could not be decoded",
            malformed.clone(),
        );

        let duplicates = Counter::default();
        reg.register(
            "duplicate_violations",
            "Total number of duplicate violations discarded",
            duplicates.clone(),
        );

        let coalesced = Counter::default();
        reg.register(
            "coalesced_ticks",
            "Total number of refresh ticks skipped because a cycle was still running",
            coalesced.clone(),
        );

        Self {
            cycles,
            duration,
            list_failures,
            malformed,
            duplicates,
            coalesced,
        }
    }

    pub(crate) fn cycle(&self, outcome: &Outcome, elapsed: time::Duration) {
        self.cycles
            .get_or_create(&OutcomeLabels {
                outcome: outcome.as_str(),
            })
            .inc();
        self.duration.observe(elapsed.as_secs_f64());
    }

    pub(crate) fn list_failed(&self, kind: &str) {
        self.list_failures
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn malformed(&self, kind: &str) {
        self.malformed
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    pub(crate) fn duplicates(&self, n: usize) {
        self.duplicates.inc_by(n as u64);
    }

    pub(crate) fn coalesced(&self) {
        self.coalesced.inc();
    }

    pub fn cycles_total(&self, outcome: &'static str) -> u64 {
        self.cycles.get_or_create(&OutcomeLabels { outcome }).get()
    }

    pub fn list_failures_total(&self, kind: &str) -> u64 {
        self.list_failures
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .get()
    }

    pub fn malformed_total(&self, kind: &str) -> u64 {
        self.malformed
            .get_or_create(&KindLabels {
                kind: kind.to_string(),
            })
            .get()
    }

    pub fn duplicates_total(&self) -> u64 {
        self.duplicates.get()
    }

    pub fn coalesced_total(&self) -> u64 {
        self.coalesced.get()
    }
}

impl Default for RefreshMetrics {
    /// Returns metrics that are not exported anywhere.
    fn default() -> Self {
        Self::register(&mut Registry::default())
    }
}
