//! Experiment result types for metrics and statistical analysis

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{ExperimentId, ExperimentStatus, StatisticalTest};

// ============================================================================
// TestResult
// ============================================================================

/// Outcome of a single hypothesis test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_type: StatisticalTest,
    pub test_statistic: f64,
    pub p_value: f64,
    pub confidence_interval_lower: f64,
    pub confidence_interval_upper: f64,
    pub effect_size: f64,
    pub power: f64,
    pub significant: bool,
    pub interpretation: String,
}

impl TestResult {
    /// Well-formed non-significant result for inputs too small to test
    pub fn insufficient(test_type: StatisticalTest, reason: impl Into<String>) -> Self {
        Self {
            test_type,
            test_statistic: 0.0,
            p_value: 1.0,
            confidence_interval_lower: 0.0,
            confidence_interval_upper: 0.0,
            effect_size: 0.0,
            power: 0.0,
            significant: false,
            interpretation: reason.into(),
        }
    }
}

// ============================================================================
// VariantResults
// ============================================================================

/// Per-variant aggregates recomputed every monitoring cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariantResults {
    pub variant_name: String,
    pub is_control: bool,
    /// Participants recorded in the ledger
    pub participants: u64,
    /// Primary metric samples in the analysis window
    pub sample_count: u64,
    pub primary_metric_mean: f64,
    pub primary_metric_std_dev: f64,
    /// Means of secondary and rollback metrics, keyed by metric name
    pub metric_means: BTreeMap<String, f64>,
    pub metric_std_devs: BTreeMap<String, f64>,
    pub metric_sample_counts: BTreeMap<String, u64>,
    /// Comparison against control, absent for the control itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<TestResult>,
}

impl VariantResults {
    pub fn new(variant_name: impl Into<String>, is_control: bool) -> Self {
        Self {
            variant_name: variant_name.into(),
            is_control,
            ..Default::default()
        }
    }

    /// Mean of a tracked metric, falling back to nothing when no samples exist
    pub fn metric_mean(&self, metric: &str) -> Option<f64> {
        self.metric_means.get(metric).copied()
    }

    pub fn metric_samples(&self, metric: &str) -> u64 {
        self.metric_sample_counts.get(metric).copied().unwrap_or(0)
    }
}

// ============================================================================
// ExperimentResults
// ============================================================================

/// Experiment-level analysis derived from participation and collected metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentResults {
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub analyzed_at: DateTime<Utc>,
    /// Time since the experiment started
    pub running_time_ms: u64,
    pub total_participants: u64,
    pub variants: Vec<VariantResults>,
    /// Bonferroni-adjusted p-values per non-control variant
    pub adjusted_p_values: BTreeMap<String, f64>,
    pub overall_p_value: f64,
    pub achieved_power: f64,
    pub is_significant: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_variant: Option<String>,
    pub has_sufficient_sample_size: bool,
    pub recommend_stop: bool,
    pub recommend_rollback: bool,
    pub concerns: Vec<String>,
    /// Fraction of variants with enough samples to analyze, in [0, 1]
    pub data_quality_score: f64,
}

impl ExperimentResults {
    pub fn new(experiment_id: ExperimentId, status: ExperimentStatus) -> Self {
        Self {
            experiment_id,
            status,
            analyzed_at: Utc::now(),
            running_time_ms: 0,
            total_participants: 0,
            variants: Vec::new(),
            adjusted_p_values: BTreeMap::new(),
            overall_p_value: 1.0,
            achieved_power: 0.0,
            is_significant: false,
            winning_variant: None,
            has_sufficient_sample_size: false,
            recommend_stop: false,
            recommend_rollback: false,
            concerns: Vec::new(),
            data_quality_score: 0.0,
        }
    }

    pub fn variant(&self, name: &str) -> Option<&VariantResults> {
        self.variants.iter().find(|v| v.variant_name == name)
    }

    pub fn control(&self) -> Option<&VariantResults> {
        self.variants.iter().find(|v| v.is_control)
    }

    /// Non-control variants
    pub fn treatments(&self) -> impl Iterator<Item = &VariantResults> {
        self.variants.iter().filter(|v| !v.is_control)
    }
}
