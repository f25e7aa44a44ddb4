use crate::{
    collector,
    core::{
        refresh::{self, Refresher},
        snapshot, RefreshMetrics, Scheduler, CONSTRAINTS_GROUP, CONSTRAINTS_VERSION,
    },
    duration::CliDuration,
    k8s::KubeResourceClient,
};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::num::NonZeroUsize;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "opa-exporter",
    about = "Exports Gatekeeper constraint status as Prometheus metrics"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "opa_exporter=info,warn",
        env = "OPA_EXPORTER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain", env = "OPA_EXPORTER_LOG_FORMAT")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// How often constraints are refreshed.
    #[clap(
        long,
        default_value = "60s",
        env = "OPA_EXPORTER_INTERVAL",
        value_parser = parse_interval
    )]
    interval: CliDuration,

    /// Bounds each per-kind list call.
    ///
    /// Defaults to half the refresh interval.
    #[clap(long, env = "OPA_EXPORTER_LIST_TIMEOUT")]
    list_timeout: Option<CliDuration>,

    /// The maximum number of constraint kinds listed at once.
    #[clap(long, default_value = "4")]
    list_concurrency: NonZeroUsize,

    /// Prepended to the names of exported constraint metrics.
    #[clap(long, env = "OPA_EXPORTER_METRICS_PREFIX")]
    metrics_prefix: Option<String>,

    #[clap(long, default_value = CONSTRAINTS_GROUP)]
    constraints_group: String,

    #[clap(long, default_value = CONSTRAINTS_VERSION)]
    constraints_version: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            interval,
            list_timeout,
            list_concurrency,
            metrics_prefix,
            constraints_group,
            constraints_version,
        } = self;
        let interval = interval.get();

        let (publisher, reader) = snapshot::pair();

        let mut prom = <Registry>::default();
        let refresh_metrics = RefreshMetrics::register(prom.sub_registry_with_prefix("refresh"));
        match metrics_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => {
                collector::register(prom.sub_registry_with_prefix(prefix), reader)
            }
            _ => collector::register(&mut prom, reader),
        }
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let config = refresh::Config {
            group: constraints_group,
            version: constraints_version,
            list_timeout: refresh::list_timeout(interval, list_timeout.map(CliDuration::get)),
            list_concurrency,
        };
        info!(
            ?interval,
            list_timeout = ?config.list_timeout,
            list_concurrency = config.list_concurrency.get(),
            group = %config.group,
            version = %config.version,
            metrics_prefix = metrics_prefix.as_deref().unwrap_or_default(),
            "Starting constraint exporter"
        );

        let refresher = Refresher::new(
            KubeResourceClient::new(runtime.client()),
            config,
            publisher,
            refresh_metrics,
        );
        tokio::spawn(
            Scheduler::new(refresher, interval)
                .run(runtime.shutdown_handle().signaled())
                .instrument(info_span!("scheduler")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the in-flight
        // refresh to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

fn parse_interval(s: &str) -> Result<CliDuration> {
    let interval = s.parse::<CliDuration>()?;
    if interval.get().is_zero() {
        bail!("the refresh interval must be greater than zero");
    }
    Ok(interval)
}
