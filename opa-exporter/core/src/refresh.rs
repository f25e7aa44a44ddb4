use crate::{
    dedup::{dedup, Deduplicated},
    discover::{discover, list, DiscoveryUnavailable},
    metrics::RefreshMetrics,
    normalize::normalize,
    snapshot::{MetricSnapshot, Publisher},
    ResourceClient,
};
use futures::prelude::*;
use std::num::NonZeroUsize;
use tokio::time;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[derive(Clone, Debug)]
pub struct Config {
    pub group: String,
    pub version: String,

    /// Bounds each per-kind list call.
    pub list_timeout: time::Duration,

    /// The maximum number of kinds listed at once.
    pub list_concurrency: NonZeroUsize,
}

/// Runs refresh cycles against a [`ResourceClient`], publishing each successful cycle's
/// snapshot.
#[derive(Debug)]
pub struct Refresher<C> {
    client: C,
    config: Config,
    publisher: Publisher,
    metrics: RefreshMetrics,
    generation: u64,
}

#[derive(Debug)]
pub enum Outcome {
    /// Every discovered kind was listed.
    Complete(Summary),

    /// Some kinds failed to list; the published snapshot omits them. When every kind fails, the
    /// published snapshot is empty.
    Partial(Summary),

    /// Nothing was published; the previous snapshot remains visible.
    Failed(CycleError),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub generation: u64,
    pub kinds: usize,
    pub failed_kinds: Vec<String>,
    pub constraints: usize,
    pub malformed: usize,
    pub violations: usize,
    pub duplicates: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryUnavailable),
}

/// Derives the per-kind list deadline from the refresh interval.
///
/// An unset, zero, or too-long timeout falls back to half the interval so that a hung list call
/// always gives up before the next tick.
pub fn list_timeout(interval: time::Duration, configured: Option<time::Duration>) -> time::Duration {
    let default = interval / 2;
    match configured {
        Some(timeout) if !timeout.is_zero() && timeout < interval => timeout,
        Some(timeout) => {
            warn!(?timeout, ?interval, "List timeout must be shorter than the refresh interval");
            default
        }
        None => default,
    }
}

// === impl Refresher ===

impl<C: ResourceClient> Refresher<C> {
    pub fn new(client: C, config: Config, publisher: Publisher, metrics: RefreshMetrics) -> Self {
        Self {
            client,
            config,
            publisher,
            metrics,
            generation: 0,
        }
    }

    pub fn metrics(&self) -> &RefreshMetrics {
        &self.metrics
    }

    /// Runs a single refresh cycle to completion.
    pub async fn run_cycle(&mut self) -> Outcome {
        self.generation += 1;
        let generation = self.generation;

        let start = time::Instant::now();
        let outcome = self
            .refresh(generation)
            .instrument(info_span!("refresh", generation))
            .await;
        self.metrics.cycle(&outcome, start.elapsed());
        outcome
    }

    async fn refresh(&self, generation: u64) -> Outcome {
        let Config {
            group,
            version,
            list_timeout,
            list_concurrency,
        } = &self.config;

        let kinds = match discover(&self.client, group, version).await {
            Ok(kinds) => kinds,
            Err(error) => {
                error!(%error, "Failed to discover constraint kinds");
                return Outcome::Failed(error.into());
            }
        };
        debug!(kinds = kinds.len(), "Discovered constraint kinds");

        // Results are yielded in discovery order regardless of which list call finishes first;
        // dedup's first-seen rule depends on this.
        let client = &self.client;
        let timeout = *list_timeout;
        let total = kinds.len();
        let listed = stream::iter(kinds)
            .map(move |kind| {
                let span = info_span!("list", kind = %kind.kind);
                async move {
                    let res = list(client, &kind, timeout).await;
                    (kind, res)
                }
                .instrument(span)
            })
            .buffered(list_concurrency.get())
            .collect::<Vec<_>>()
            .await;

        let mut summary = Summary {
            generation,
            kinds: total,
            ..Summary::default()
        };
        let mut constraints = Vec::new();
        for (kind, res) in listed {
            let docs = match res {
                Ok(docs) => docs,
                Err(error) => {
                    warn!(%error, "Skipping constraint kind");
                    self.metrics.list_failed(error.kind());
                    summary.failed_kinds.push(kind.kind);
                    continue;
                }
            };

            if docs.is_empty() {
                debug!(kind = %kind.kind, "Nothing returned for kind");
            }
            for doc in &docs {
                match normalize(doc) {
                    Ok(constraint) => constraints.push(constraint),
                    Err(error) => {
                        warn!(kind = %kind.kind, %error, "Skipping malformed constraint");
                        self.metrics.malformed(&kind.kind);
                        summary.malformed += 1;
                    }
                }
            }
        }

        let Deduplicated {
            records,
            suppressed,
        } = dedup(&constraints);
        for key in &suppressed {
            warn!(%key, "Found duplicate violation");
        }
        self.metrics.duplicates(suppressed.len());

        summary.constraints = constraints.len();
        summary.violations = records.len();
        summary.duplicates = suppressed.len();
        self.publisher
            .publish(MetricSnapshot::new(generation, &constraints, records));

        info!(
            kinds = summary.kinds,
            failed = summary.failed_kinds.len(),
            constraints = summary.constraints,
            violations = summary.violations,
            "Published snapshot"
        );
        if summary.failed_kinds.is_empty() {
            Outcome::Complete(summary)
        } else {
            Outcome::Partial(summary)
        }
    }
}

// === impl Outcome ===

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete(_) => "complete",
            Self::Partial(_) => "partial",
            Self::Failed(_) => "failed",
        }
    }

    pub fn summary(&self) -> Option<&Summary> {
        match self {
            Self::Complete(s) | Self::Partial(s) => Some(s),
            Self::Failed(_) => None,
        }
    }
}
