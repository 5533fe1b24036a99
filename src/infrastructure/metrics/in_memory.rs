//! In-memory metrics collector
//!
//! Keeps counters and timestamped samples in process memory and forwards every
//! counter to the global `metrics` recorder (a no-op unless one is installed).

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use metrics::{counter, Label};
use tracing::debug;

use crate::domain::metrics::{MetricQuery, MetricTags, MetricsCollector};
use crate::domain::{DomainError, ExperimentId};

type SampleKey = (ExperimentId, String, String);

/// Collector used by tests, the CLI simulation and single-process deployments
#[derive(Debug, Default)]
pub struct InMemoryMetricsCollector {
    counters: RwLock<HashMap<String, f64>>,
    samples: RwLock<HashMap<SampleKey, Vec<(DateTime<Utc>, f64)>>>,
    unavailable: AtomicBool,
}

impl InMemoryMetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observation of `metric` for a variant at the current time
    pub fn record_sample(
        &self,
        experiment_id: &ExperimentId,
        variant: &str,
        metric: &str,
        value: f64,
    ) -> Result<(), DomainError> {
        self.record_sample_at(experiment_id, variant, metric, value, Utc::now())
    }

    pub fn record_sample_at(
        &self,
        experiment_id: &ExperimentId,
        variant: &str,
        metric: &str,
        value: f64,
        at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let mut samples = self
            .samples
            .write()
            .map_err(|e| DomainError::internal(format!("Sample lock poisoned: {}", e)))?;

        samples
            .entry((experiment_id.clone(), variant.to_string(), metric.to_string()))
            .or_default()
            .push((at, value));

        Ok(())
    }

    /// Current value of a counter with exactly these tags
    pub fn counter_value(&self, name: &str, tags: &MetricTags) -> f64 {
        self.counters
            .read()
            .ok()
            .and_then(|counters| counters.get(&counter_key(name, tags)).copied())
            .unwrap_or(0.0)
    }

    /// Make every query fail, simulating an unreachable backend
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn record_counter(&self, name: &str, value: f64, tags: &MetricTags) {
        let labels: Vec<Label> = tags
            .iter()
            .map(|(k, v)| Label::new(k.clone(), v.clone()))
            .collect();
        counter!(name.to_string(), labels).increment(value.max(0.0).round() as u64);

        match self.counters.write() {
            Ok(mut counters) => {
                *counters.entry(counter_key(name, tags)).or_insert(0.0) += value;
            }
            Err(e) => debug!(counter = name, "Dropped counter update: {}", e),
        }
    }

    fn query_metric(&self, query: &MetricQuery) -> Result<Vec<f64>, DomainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DomainError::metrics(format!(
                "Metrics backend unavailable for '{}'",
                query.metric_name
            )));
        }

        let samples = self
            .samples
            .read()
            .map_err(|e| DomainError::internal(format!("Sample lock poisoned: {}", e)))?;

        let key = (
            query.experiment_id.clone(),
            query.variant.clone(),
            query.metric_name.clone(),
        );

        Ok(samples
            .get(&key)
            .map(|series| {
                series
                    .iter()
                    .filter(|(at, _)| query.window.contains(*at))
                    .map(|(_, value)| *value)
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// `name{k1=v1,k2=v2}` with tags in key order
fn counter_key(name: &str, tags: &MetricTags) -> String {
    let sorted: BTreeMap<&String, &String> = tags.iter().collect();
    let rendered: Vec<String> = sorted.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    format!("{}{{{}}}", name, rendered.join(","))
}
