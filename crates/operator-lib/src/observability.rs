//! Observability infrastructure for the inference operator
//!
//! Provides:
//! - Prometheus metrics (cron latency and failures, reconciler writes, validation outcomes)
//! - Structured JSON logging with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info};

/// Histogram buckets for cron tick latency (in seconds)
const TICK_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

struct OperatorMetricsInner {
    cron_tick_seconds: HistogramVec,
    cron_failures: IntCounterVec,
    evicted_pods_deleted: IntCounter,
    autoscalers_created: IntCounter,
    validation_passes: IntCounterVec,
    telemetry_errors: IntCounter,
    worker_nodes: IntGauge,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            cron_tick_seconds: register_histogram_vec!(
                "inference_operator_cron_tick_seconds",
                "Time spent in one tick of a periodic task",
                &["cron"],
                TICK_BUCKETS.to_vec()
            )
            .expect("Failed to register cron_tick_seconds"),

            cron_failures: register_int_counter_vec!(
                "inference_operator_cron_failures_total",
                "Ticks of a periodic task that returned an error",
                &["cron"]
            )
            .expect("Failed to register cron_failures"),

            evicted_pods_deleted: register_int_counter!(
                "inference_operator_evicted_pods_deleted_total",
                "Evicted pods removed by the reconciler"
            )
            .expect("Failed to register evicted_pods_deleted"),

            autoscalers_created: register_int_counter!(
                "inference_operator_autoscalers_created_total",
                "Horizontal pod autoscalers installed by the reconciler"
            )
            .expect("Failed to register autoscalers_created"),

            validation_passes: register_int_counter_vec!(
                "inference_operator_validation_passes_total",
                "API validation passes by outcome",
                &["result"]
            )
            .expect("Failed to register validation_passes"),

            telemetry_errors: register_int_counter!(
                "inference_operator_telemetry_errors_total",
                "Errors forwarded to the telemetry sink"
            )
            .expect("Failed to register telemetry_errors"),

            worker_nodes: register_int_gauge!(
                "inference_operator_worker_nodes",
                "Worker nodes seen by the last telemetry probe"
            )
            .expect("Failed to register worker_nodes"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn observe_cron_tick(&self, cron: &str, duration_secs: f64) {
        self.inner()
            .cron_tick_seconds
            .with_label_values(&[cron])
            .observe(duration_secs);
    }

    pub fn inc_cron_failures(&self, cron: &str) {
        self.inner().cron_failures.with_label_values(&[cron]).inc();
    }

    pub fn inc_evicted_pods_deleted(&self) {
        self.inner().evicted_pods_deleted.inc();
    }

    pub fn inc_autoscalers_created(&self) {
        self.inner().autoscalers_created.inc();
    }

    /// Count a validation pass as "accepted" or "rejected"
    pub fn inc_validation_pass(&self, accepted: bool) {
        let result = if accepted { "accepted" } else { "rejected" };
        self.inner()
            .validation_passes
            .with_label_values(&[result])
            .inc();
    }

    pub fn inc_telemetry_errors(&self) {
        self.inner().telemetry_errors.inc();
    }

    pub fn set_worker_nodes(&self, count: i64) {
        self.inner().worker_nodes.set(count);
    }
}

/// Structured logger for operator events
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
}

impl StructuredLogger {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn log_startup(&self, version: &str, api_port: u16) {
        info!(
            event = "operator_started",
            namespace = %self.namespace,
            operator_version = %version,
            api_port = api_port,
            "Inference operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            namespace = %self.namespace,
            reason = %reason,
            "Inference operator shutting down"
        );
    }

    pub fn log_evicted_pod_deleted(&self, pod: &str) {
        info!(
            event = "evicted_pod_deleted",
            namespace = %self.namespace,
            pod = %pod,
            "Deleted evicted pod"
        );
    }

    pub fn log_autoscaler_created(&self, api: &str, min_replicas: i32, max_replicas: i32) {
        info!(
            event = "autoscaler_created",
            namespace = %self.namespace,
            api = %api,
            min_replicas = min_replicas,
            max_replicas = max_replicas,
            "Installed horizontal pod autoscaler"
        );
    }

    pub fn log_api_validated(&self, api: &str, endpoint: &str, predictor_type: &str) {
        info!(
            event = "api_validated",
            namespace = %self.namespace,
            api = %api,
            endpoint = %endpoint,
            predictor_type = %predictor_type,
            "API accepted"
        );
    }

    pub fn log_cron_failed(&self, cron: &str, err: &str) {
        error!(
            event = "cron_failed",
            namespace = %self.namespace,
            cron = %cron,
            error = %err,
            "{} cron failed",
            cron
        );
    }
}
