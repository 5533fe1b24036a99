//! Prometheus metrics infrastructure

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::config::MetricsConfig;
use crate::domain::{AlertSeverity, ExperimentId, ExperimentStatus};
use crate::infrastructure::experiment::StatusCounts;

/// Prometheus metrics handle for rendering the exposition text
#[derive(Clone)]
pub struct PrometheusMetrics {
    handle: Arc<PrometheusHandle>,
}

impl PrometheusMetrics {
    /// Get the metrics in Prometheus text format
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

/// Initialize Prometheus metrics
pub fn init_metrics(config: &MetricsConfig) -> Option<PrometheusMetrics> {
    if !config.enabled {
        tracing::info!("Prometheus metrics disabled");
        return None;
    }

    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            register_default_metrics();

            tracing::info!("Prometheus metrics initialized");

            Some(PrometheusMetrics {
                handle: Arc::new(handle),
            })
        }
        Err(e) => {
            tracing::error!("Failed to initialize Prometheus metrics: {}", e);
            None
        }
    }
}

fn register_default_metrics() {
    gauge!("experiments_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

/// Record a lifecycle transition
pub fn record_status_change(experiment_id: &ExperimentId, status: ExperimentStatus) {
    let labels = [
        ("experiment_id", experiment_id.to_string()),
        ("status", status.to_string()),
    ];

    counter!("experiment_status_changes_total", &labels).increment(1);
}

/// Record an alert raised by the monitoring loop
pub fn record_alert(experiment_id: &ExperimentId, severity: AlertSeverity) {
    let labels = [
        ("experiment_id", experiment_id.to_string()),
        ("severity", severity.to_string()),
    ];

    counter!("experiment_alerts_total", &labels).increment(1);
}

/// Record an automatic rollback or pause
pub fn record_automatic_action(experiment_id: &ExperimentId, action: &'static str) {
    let labels = [
        ("experiment_id", experiment_id.to_string()),
        ("action", action.to_string()),
    ];

    counter!("experiment_automatic_actions_total", &labels).increment(1);
}

/// Record one monitoring cycle
pub fn record_monitor_cycle(duration: Duration, errors: usize) {
    histogram!("experiment_monitor_cycle_duration_seconds").record(duration.as_secs_f64());
    counter!("experiment_monitor_cycles_total").increment(1);

    if errors > 0 {
        counter!("experiment_monitor_errors_total").increment(errors as u64);
    }
}

/// Publish experiment counts by lifecycle state
pub fn record_status_counts(counts: &StatusCounts) {
    let states = [
        ("draft", counts.draft),
        ("running", counts.running),
        ("paused", counts.paused),
        ("completed", counts.completed),
        ("failed", counts.failed),
    ];

    for (state, count) in states {
        gauge!("experiments", "state" => state).set(count as f64);
    }
}
