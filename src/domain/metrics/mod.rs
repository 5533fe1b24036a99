//! Metrics collector port
//!
//! The experimentation core emits participation counters and reads back metric
//! samples per experiment variant through this trait. Adapters are expected to
//! apply their own request timeouts.

use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::experiment::ExperimentId;
use crate::domain::DomainError;

#[cfg(test)]
use mockall::automock;

/// Counter emitted for every participation assignment
pub const PARTICIPATION_COUNTER: &str = "ab_test_participations_total";

/// Metric tags attached to counters and samples
pub type MetricTags = HashMap<String, String>;

/// Closed time range `[start, end]` for metric queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window covering `length` up to `end`, clamped at the earliest instant
    pub fn trailing(end: DateTime<Utc>, length: TimeDelta) -> Self {
        Self {
            start: end
                .checked_sub_signed(length)
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            end,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }
}

/// Samples of one metric for one experiment variant within a window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricQuery {
    pub experiment_id: ExperimentId,
    pub variant: String,
    pub metric_name: String,
    pub window: TimeWindow,
}

impl MetricQuery {
    pub fn new(
        experiment_id: ExperimentId,
        variant: impl Into<String>,
        metric_name: impl Into<String>,
        window: TimeWindow,
    ) -> Self {
        Self {
            experiment_id,
            variant: variant.into(),
            metric_name: metric_name.into(),
            window,
        }
    }
}

/// Telemetry sink and sample source used by the experimentation core
#[cfg_attr(test, automock)]
pub trait MetricsCollector: Send + Sync {
    /// Fire-and-forget counter increment
    fn record_counter(&self, name: &str, value: f64, tags: &MetricTags);

    /// Fetch raw samples for a variant metric
    fn query_metric(&self, query: &MetricQuery) -> Result<Vec<f64>, DomainError>;
}

/// Tags identifying an experiment variant
pub fn variant_tags(experiment_id: &ExperimentId, variant: &str) -> MetricTags {
    let mut tags = MetricTags::new();
    tags.insert("experiment_id".to_string(), experiment_id.to_string());
    tags.insert("variant".to_string(), variant.to_string());
    tags
}
