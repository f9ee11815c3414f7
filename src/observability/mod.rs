//! Observability surface co-located with the runtime: the metrics registry
//! and its recording entry points, structured JSON logging with redaction,
//! and the health/metrics endpoint servers.
//!
//! All metric recording is gated per call on the observability-metrics
//! flag; correlation labels attach to a sample only when their value is
//! non-empty, keeping cardinality bounded. `trace_id` goes to logs only,
//! never onto a metric.

pub mod endpoints;
pub mod logging;
pub mod metrics;

use std::sync::Arc;

use serde_json::Value;

use crate::core::ResultMetadata;
use crate::flags;
pub use endpoints::EndpointServer;
pub use logging::LogLevel;
pub use metrics::MetricsRegistry;

pub struct Observability {
    worker_id: String,
    registry: Arc<MetricsRegistry>,
}

impl Observability {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            registry: Arc::new(MetricsRegistry::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn render_metrics(&self) -> String {
        self.registry.render()
    }

    // --- metric recording -------------------------------------------------

    pub fn record_step_execution(
        &self,
        step_type: &str,
        execution_status: &str,
        meta: &ResultMetadata,
    ) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        let mut labels = vec![
            ("step_type", step_type),
            ("execution_status", execution_status),
        ];
        push_correlation_labels(&mut labels, meta);
        self.registry
            .inc_counter("worker_step_executions_total", &labels);
    }

    pub fn record_step_execution_duration(
        &self,
        step_type: &str,
        execution_status: &str,
        duration_seconds: f64,
        meta: &ResultMetadata,
    ) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        let mut labels = vec![
            ("step_type", step_type),
            ("execution_status", execution_status),
        ];
        push_correlation_labels(&mut labels, meta);
        self.registry.observe(
            "worker_step_execution_duration_seconds",
            &labels,
            duration_seconds,
        );
    }

    pub fn record_step_error(&self, step_type: &str, error_code: &str, meta: &ResultMetadata) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        let mut labels = vec![("step_type", step_type), ("error_code", error_code)];
        push_correlation_labels(&mut labels, meta);
        self.registry.inc_counter("worker_step_errors_total", &labels);
    }

    pub fn record_flow_execution_duration(&self, duration_seconds: f64, meta: &ResultMetadata) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        let mut labels = Vec::new();
        push_correlation_labels(&mut labels, meta);
        self.registry.observe(
            "worker_flow_execution_duration_seconds",
            &labels,
            duration_seconds,
        );
    }

    pub fn set_queue_depth(&self, resource_pool: &str, depth: i64) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        self.registry
            .set_gauge("worker_queue_depth", &[("resource_pool", resource_pool)], depth);
    }

    pub fn set_active_tasks(&self, resource_pool: &str, count: i64) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        self.registry
            .set_gauge("worker_active_tasks", &[("resource_pool", resource_pool)], count);
    }

    pub fn set_health_status(&self, check: &str, status: i64) {
        if !flags::observability_metrics_enabled() {
            return;
        }
        self.registry
            .set_gauge("worker_health_status", &[("check", check)], status);
    }

    // --- structured logging -----------------------------------------------

    pub fn log_info(&self, message: &str, meta: &ResultMetadata, context: Value) {
        self.emit(LogLevel::Info, message, meta, context);
    }

    pub fn log_warn(&self, message: &str, meta: &ResultMetadata, context: Value) {
        self.emit(LogLevel::Warn, message, meta, context);
    }

    pub fn log_error(&self, message: &str, meta: &ResultMetadata, context: Value) {
        self.emit(LogLevel::Error, message, meta, context);
    }

    pub fn log_debug(&self, message: &str, meta: &ResultMetadata, context: Value) {
        self.emit(LogLevel::Debug, message, meta, context);
    }

    fn emit(&self, level: LogLevel, message: &str, meta: &ResultMetadata, context: Value) {
        let line = logging::format_record(&self.worker_id, level, message, meta, context);
        println!("{line}");
        if level == LogLevel::Error {
            eprintln!("{line}");
        }
    }
}

fn push_correlation_labels<'a>(labels: &mut Vec<(&'a str, &'a str)>, meta: &'a ResultMetadata) {
    if !meta.tenant_id.is_empty() {
        labels.push(("tenant_id", &meta.tenant_id));
    }
    if !meta.run_id.is_empty() {
        labels.push(("run_id", &meta.run_id));
    }
    if !meta.flow_id.is_empty() {
        labels.push(("flow_id", &meta.flow_id));
    }
    if !meta.step_id.is_empty() {
        labels.push(("step_id", &meta.step_id));
    }
}
