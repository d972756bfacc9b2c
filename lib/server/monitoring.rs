use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping as a labeled
/// gauge with value `1`.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "dataset_ingest",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct IngestMetrics {
    /// Datasets staged, submitted and queued.
    pub datasets_ingested_total: Counter,
    /// Ingestions aborted by a store, submission or queue failure.
    pub datasets_failed_total: Counter,
    pub datasets_quarantined_total: Counter,
    /// Datasets whose index request succeeded.
    pub datasets_promoted_total: Counter,
}

impl IngestMetrics {
    fn init() -> Self {
        Self {
            datasets_ingested_total: Counter::default(),
            datasets_failed_total: Counter::default(),
            datasets_quarantined_total: Counter::default(),
            datasets_promoted_total: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "datasets_ingested",
            "Total number of datasets staged and submitted for transformation",
            metrics.datasets_ingested_total.clone(),
        );
        sub_registry.register(
            "datasets_failed",
            "Total number of dataset ingestions that failed before queueing",
            metrics.datasets_failed_total.clone(),
        );
        sub_registry.register(
            "datasets_quarantined",
            "Total number of datasets whose artifacts were removed",
            metrics.datasets_quarantined_total.clone(),
        );
        sub_registry.register(
            "datasets_promoted",
            "Total number of datasets stored and indexed",
            metrics.datasets_promoted_total.clone(),
        );
        metrics
    }
}

pub static INGEST_METRICS: OnceCell<IngestMetrics> = OnceCell::const_new();

#[derive(Clone)]
pub struct PollerMetrics {
    pub polls_total: Counter,
    pub requeues_total: Counter,
    pub completions_total: Counter,
    pub vanished_total: Counter,
    pub rejected_total: Counter,
    pub dead_lettered_total: Counter,
    pub cleanup_failures_total: Counter,
    /// Re-queues that found the queue full and had to wait.
    pub queue_overflow_total: Counter,
    pub queue_depth: Gauge,
    pub busy_workers: Gauge,
}

impl PollerMetrics {
    fn init() -> Self {
        Self {
            polls_total: Counter::default(),
            requeues_total: Counter::default(),
            completions_total: Counter::default(),
            vanished_total: Counter::default(),
            rejected_total: Counter::default(),
            dead_lettered_total: Counter::default(),
            cleanup_failures_total: Counter::default(),
            queue_overflow_total: Counter::default(),
            queue_depth: Gauge::default(),
            busy_workers: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "polls",
            "Total number of transform status poll attempts",
            metrics.polls_total.clone(),
        );
        sub_registry.register(
            "requeues",
            "Total number of tasks put back on the queue for another attempt",
            metrics.requeues_total.clone(),
        );
        sub_registry.register(
            "completions",
            "Total number of tasks finalized by promotion or quarantine",
            metrics.completions_total.clone(),
        );
        sub_registry.register(
            "vanished",
            "Total number of tasks dropped because the transform job disappeared",
            metrics.vanished_total.clone(),
        );
        sub_registry.register(
            "rejected",
            "Total number of tasks stopped by a malformed-request response",
            metrics.rejected_total.clone(),
        );
        sub_registry.register(
            "dead_lettered",
            "Total number of tasks recorded as dead letters",
            metrics.dead_lettered_total.clone(),
        );
        sub_registry.register(
            "cleanup_failures",
            "Total number of failed transform record deletions",
            metrics.cleanup_failures_total.clone(),
        );
        sub_registry.register(
            "queue_overflow",
            "Count of re-queues that waited on a full queue",
            metrics.queue_overflow_total.clone(),
        );
        sub_registry.register(
            "queue_depth",
            "Current task queue depth",
            metrics.queue_depth.clone(),
        );
        sub_registry.register(
            "busy_workers",
            "Workers currently running a drain cycle",
            metrics.busy_workers.clone(),
        );
        metrics
    }
}

pub static POLLER_METRICS: OnceCell<PollerMetrics> = OnceCell::const_new();
