//! Observability infrastructure - Prometheus metrics

mod metrics;

pub use metrics::{
    init_metrics, record_alert, record_automatic_action, record_monitor_cycle,
    record_status_change, record_status_counts, PrometheusMetrics,
};
