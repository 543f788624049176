//! Thin wrapper over the `metrics` facade: free functions (`inc`/`gauge`/
//! `histogram`) backed by a label-carrying `MetricsHelper` built once per
//! manager via `.with_label(...)`.

#[derive(Clone, Debug, Default)]
pub struct MetricsHelper {
    labels: Vec<(String, String)>,
}

impl MetricsHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a label that will be applied to every metric recorded through this
    /// helper (e.g. `topic_partition`).
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.push((key.to_string(), value.to_string()));
        self
    }

    pub fn counter(&self, name: &'static str) -> CounterHandle<'_> {
        CounterHandle { helper: self, name }
    }

    pub fn histogram(&self, name: &'static str) -> HistogramHandle<'_> {
        HistogramHandle { helper: self, name }
    }

    pub fn gauge(&self, name: &'static str) -> GaugeHandle<'_> {
        GaugeHandle { helper: self, name }
    }
}

pub struct CounterHandle<'a> {
    helper: &'a MetricsHelper,
    name: &'static str,
}

impl CounterHandle<'_> {
    pub fn increment(&self, value: u64) {
        metrics::counter!(self.name, &self.helper.labels).increment(value);
    }
}

pub struct HistogramHandle<'a> {
    helper: &'a MetricsHelper,
    name: &'static str,
}

impl HistogramHandle<'_> {
    pub fn record(&self, value: f64) {
        metrics::histogram!(self.name, &self.helper.labels).record(value);
    }
}

pub struct GaugeHandle<'a> {
    helper: &'a MetricsHelper,
    name: &'static str,
}

impl GaugeHandle<'_> {
    pub fn set(&self, value: f64) {
        metrics::gauge!(self.name, &self.helper.labels).set(value);
    }
}

pub mod metrics_consts {
    pub const APPEND_VALIDATION_FAILURES: &str = "producer_state_append_validation_failures_total";
    pub const DUPLICATE_BATCHES: &str = "producer_state_duplicate_batches_total";
    pub const EXPIRED_PRODUCERS: &str = "producer_state_expired_producers_total";
    pub const RECOVERY_BATCHES_PROCESSED: &str = "producer_state_recovery_batches_processed_total";
    pub const RECOVERY_ERRORS: &str = "producer_state_recovery_errors_total";
    pub const RECOVERY_DURATION: &str = "producer_state_recovery_duration_seconds";
    pub const SNAPSHOT_WRITE_DURATION: &str = "producer_state_snapshot_write_duration_seconds";
    pub const SNAPSHOT_LOAD_DURATION: &str = "producer_state_snapshot_load_duration_seconds";
    pub const ONGOING_TXNS: &str = "producer_state_ongoing_txns";
}
