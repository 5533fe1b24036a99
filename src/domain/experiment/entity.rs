//! Experiment domain entities

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation::{
    is_open_unit_interval, validate_traffic_sum, validate_variant, ExperimentValidationError,
};
use crate::domain::serde_utils::{duration_ms, later_by, to_time_delta, u8_enum_conversions};

const HOUR: Duration = Duration::from_secs(3600);
const MINUTE: Duration = Duration::from_secs(60);

// ============================================================================
// ExperimentId
// ============================================================================

/// Unique identifier for an experiment, assigned by the registry on creation
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExperimentId(String);

impl ExperimentId {
    /// Wrap an existing identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate an identifier of the form `exp_<unix_ms>_<sequence>`
    pub fn generate(sequence: u64) -> Self {
        Self(format!(
            "exp_{}_{:06}",
            Utc::now().timestamp_millis(),
            sequence
        ))
    }

    /// Check whether the registry has assigned this identifier
    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for ExperimentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ExperimentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

// ============================================================================
// ExperimentStatus
// ============================================================================

/// Status of an experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum ExperimentStatus {
    /// Experiment is being configured, not yet running
    #[default]
    Draft,
    /// Experiment is actively routing traffic
    Running,
    /// Experiment is temporarily stopped
    Paused,
    /// Experiment finished normally
    Completed,
    /// Experiment was reverted after a safety threshold breach
    RolledBack,
    /// Experiment was stopped early
    Terminated,
}

u8_enum_conversions!(ExperimentStatus, "experiment status", {
    Draft = 0,
    Running = 1,
    Paused = 2,
    Completed = 3,
    RolledBack = 4,
    Terminated = 5,
});

impl ExperimentStatus {
    /// Check if the experiment is currently running
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Check if the experiment accepts structural changes
    pub fn is_editable(&self) -> bool {
        matches!(self, Self::Draft | Self::Paused)
    }

    /// Check if the experiment has reached an end state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack | Self::Terminated)
    }

    /// Check if a transition to the target status is valid
    pub fn can_transition_to(&self, target: ExperimentStatus) -> bool {
        match (self, target) {
            (Self::Draft | Self::Paused, Self::Running) => true,
            (Self::Running, Self::Paused) => true,
            (
                Self::Running | Self::Paused,
                Self::Completed | Self::RolledBack | Self::Terminated,
            ) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Running => write!(f, "running"),
            Self::Paused => write!(f, "paused"),
            Self::Completed => write!(f, "completed"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

// ============================================================================
// SplitStrategy / StatisticalTest / MetricGoal
// ============================================================================

/// How requests are distributed across variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum SplitStrategy {
    /// Uniform draw walked against the cumulative weights
    #[default]
    Random,
    /// Cycle through variants in stored order
    RoundRobin,
    /// Weighted draw on first sight of a user, cached afterwards
    StickySession,
    /// Deterministic hash of the request context
    HashBased,
    /// Same algorithm as `Random`
    WeightedRandom,
}

u8_enum_conversions!(SplitStrategy, "split strategy", {
    Random = 0,
    RoundRobin = 1,
    StickySession = 2,
    HashBased = 3,
    WeightedRandom = 4,
});

/// Hypothesis test used when comparing a variant against control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum StatisticalTest {
    #[default]
    TTest,
    ZTest,
    ChiSquare,
    MannWhitney,
    KolmogorovSmirnov,
}

u8_enum_conversions!(StatisticalTest, "statistical test", {
    TTest = 0,
    ZTest = 1,
    ChiSquare = 2,
    MannWhitney = 3,
    KolmogorovSmirnov = 4,
});

/// Direction in which the primary metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(into = "u8", try_from = "u8")]
pub enum MetricGoal {
    #[default]
    Increase,
    Decrease,
}

u8_enum_conversions!(MetricGoal, "metric goal", {
    Increase = 0,
    Decrease = 1,
});

impl MetricGoal {
    /// Check whether `candidate` is an improvement over `baseline`
    pub fn improves(&self, baseline: f64, candidate: f64) -> bool {
        match self {
            Self::Increase => candidate > baseline,
            Self::Decrease => candidate < baseline,
        }
    }
}

// ============================================================================
// TestVariant
// ============================================================================

/// One configuration option within an experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestVariant {
    name: String,
    #[serde(default)]
    description: String,
    traffic_percentage: f64,
    #[serde(default = "empty_object")]
    configuration: serde_json::Value,
    #[serde(default)]
    is_control: bool,
    #[serde(default)]
    metrics_baseline: HashMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    plugin_config: Option<serde_json::Value>,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TestVariant {
    /// Create a treatment variant
    pub fn new(name: impl Into<String>, traffic_percentage: f64) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            traffic_percentage,
            configuration: empty_object(),
            is_control: false,
            metrics_baseline: HashMap::new(),
            plugin_config: None,
        }
    }

    /// Create the control variant
    pub fn control(name: impl Into<String>, traffic_percentage: f64) -> Self {
        Self::new(name, traffic_percentage).with_control(true)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_traffic_percentage(mut self, traffic_percentage: f64) -> Self {
        self.traffic_percentage = traffic_percentage;
        self
    }

    pub fn with_configuration(mut self, configuration: serde_json::Value) -> Self {
        self.configuration = configuration;
        self
    }

    pub fn with_control(mut self, is_control: bool) -> Self {
        self.is_control = is_control;
        self
    }

    pub fn with_baseline(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.metrics_baseline.insert(metric.into(), value);
        self
    }

    pub fn with_plugin_config(mut self, plugin_config: serde_json::Value) -> Self {
        self.plugin_config = Some(plugin_config);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn traffic_percentage(&self) -> f64 {
        self.traffic_percentage
    }

    /// Opaque payload consumed by the proxy
    pub fn configuration(&self) -> &serde_json::Value {
        &self.configuration
    }

    pub fn is_control(&self) -> bool {
        self.is_control
    }

    pub fn metrics_baseline(&self) -> &HashMap<String, f64> {
        &self.metrics_baseline
    }

    pub fn plugin_config(&self) -> Option<&serde_json::Value> {
        self.plugin_config.as_ref()
    }

    /// Validate name and traffic share
    pub fn validate(&self) -> Result<(), ExperimentValidationError> {
        validate_variant(&self.name, self.traffic_percentage, self.is_control)
    }
}

// ============================================================================
// Experiment
// ============================================================================

/// An A/B test experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experiment {
    id: ExperimentId,
    name: String,
    description: String,
    status: ExperimentStatus,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    started_at: Option<DateTime<Utc>>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    ended_at: Option<DateTime<Utc>>,
    #[serde(
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    planned_end_time: Option<DateTime<Utc>>,
    #[serde(rename = "minimum_run_time_ms", with = "duration_ms")]
    minimum_run_time: Duration,
    #[serde(rename = "maximum_run_time_ms", with = "duration_ms")]
    maximum_run_time: Duration,

    variants: Vec<TestVariant>,
    split_strategy: SplitStrategy,
    target_plugins: BTreeSet<String>,
    target_providers: BTreeSet<String>,

    success_thresholds: HashMap<String, f64>,
    primary_metric: String,
    primary_metric_goal: MetricGoal,
    secondary_metrics: Vec<String>,

    auto_rollback_enabled: bool,
    rollback_thresholds: HashMap<String, f64>,
    #[serde(rename = "rollback_check_interval_ms", with = "duration_ms")]
    rollback_check_interval: Duration,
    #[serde(rename = "rollback_grace_period_ms", with = "duration_ms")]
    rollback_grace_period: Duration,

    significance_level: f64,
    statistical_power: f64,
    test_type: StatisticalTest,

    metadata: HashMap<String, String>,
}

impl Default for Experiment {
    fn default() -> Self {
        Self {
            id: ExperimentId::default(),
            name: String::new(),
            description: String::new(),
            status: ExperimentStatus::Draft,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            planned_end_time: None,
            minimum_run_time: 24 * HOUR,
            maximum_run_time: 168 * HOUR,
            variants: Vec::new(),
            split_strategy: SplitStrategy::default(),
            target_plugins: BTreeSet::new(),
            target_providers: BTreeSet::new(),
            success_thresholds: HashMap::new(),
            primary_metric: String::new(),
            primary_metric_goal: MetricGoal::default(),
            secondary_metrics: Vec::new(),
            auto_rollback_enabled: true,
            rollback_thresholds: HashMap::new(),
            rollback_check_interval: 10 * MINUTE,
            rollback_grace_period: 30 * MINUTE,
            significance_level: 0.05,
            statistical_power: 0.8,
            test_type: StatisticalTest::default(),
            metadata: HashMap::new(),
        }
    }
}

impl Experiment {
    /// Create a new draft experiment measured by `primary_metric`
    pub fn new(name: impl Into<String>, primary_metric: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_metric: primary_metric.into(),
            ..Self::default()
        }
    }

    // Builder methods

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Append a variant
    pub fn with_variant(mut self, variant: TestVariant) -> Self {
        self.variants.push(variant);
        self
    }

    /// Replace all variants
    pub fn with_variants(mut self, variants: Vec<TestVariant>) -> Self {
        self.variants = variants;
        self
    }

    pub fn with_split_strategy(mut self, strategy: SplitStrategy) -> Self {
        self.split_strategy = strategy;
        self
    }

    pub fn with_target_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.target_plugins.insert(plugin.into());
        self
    }

    pub fn with_target_provider(mut self, provider: impl Into<String>) -> Self {
        self.target_providers.insert(provider.into());
        self
    }

    pub fn with_success_threshold(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.success_thresholds.insert(metric.into(), value);
        self
    }

    pub fn with_primary_metric_goal(mut self, goal: MetricGoal) -> Self {
        self.primary_metric_goal = goal;
        self
    }

    pub fn with_secondary_metric(mut self, metric: impl Into<String>) -> Self {
        self.secondary_metrics.push(metric.into());
        self
    }

    pub fn with_auto_rollback(mut self, enabled: bool) -> Self {
        self.auto_rollback_enabled = enabled;
        self
    }

    /// Add an upper bound for a metric; crossing it after the grace period triggers alerts
    pub fn with_rollback_threshold(mut self, metric: impl Into<String>, value: f64) -> Self {
        self.rollback_thresholds.insert(metric.into(), value);
        self
    }

    pub fn with_rollback_check_interval(mut self, interval: Duration) -> Self {
        self.rollback_check_interval = interval;
        self
    }

    pub fn with_rollback_grace_period(mut self, grace_period: Duration) -> Self {
        self.rollback_grace_period = grace_period;
        self
    }

    pub fn with_minimum_run_time(mut self, run_time: Duration) -> Self {
        self.minimum_run_time = run_time;
        self
    }

    pub fn with_maximum_run_time(mut self, run_time: Duration) -> Self {
        self.maximum_run_time = run_time;
        self
    }

    pub fn with_planned_end_time(mut self, end: DateTime<Utc>) -> Self {
        self.planned_end_time = Some(end);
        self
    }

    pub fn with_significance_level(mut self, level: f64) -> Self {
        self.significance_level = level;
        self
    }

    pub fn with_statistical_power(mut self, power: f64) -> Self {
        self.statistical_power = power;
        self
    }

    pub fn with_test_type(mut self, test_type: StatisticalTest) -> Self {
        self.test_type = test_type;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    // Getters

    pub fn id(&self) -> &ExperimentId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn planned_end_time(&self) -> Option<DateTime<Utc>> {
        self.planned_end_time
    }

    pub fn minimum_run_time(&self) -> Duration {
        self.minimum_run_time
    }

    pub fn maximum_run_time(&self) -> Duration {
        self.maximum_run_time
    }

    pub fn variants(&self) -> &[TestVariant] {
        &self.variants
    }

    pub fn split_strategy(&self) -> SplitStrategy {
        self.split_strategy
    }

    pub fn target_plugins(&self) -> &BTreeSet<String> {
        &self.target_plugins
    }

    pub fn target_providers(&self) -> &BTreeSet<String> {
        &self.target_providers
    }

    pub fn success_thresholds(&self) -> &HashMap<String, f64> {
        &self.success_thresholds
    }

    pub fn primary_metric(&self) -> &str {
        &self.primary_metric
    }

    pub fn primary_metric_goal(&self) -> MetricGoal {
        self.primary_metric_goal
    }

    pub fn secondary_metrics(&self) -> &[String] {
        &self.secondary_metrics
    }

    pub fn auto_rollback_enabled(&self) -> bool {
        self.auto_rollback_enabled
    }

    pub fn rollback_thresholds(&self) -> &HashMap<String, f64> {
        &self.rollback_thresholds
    }

    pub fn rollback_check_interval(&self) -> Duration {
        self.rollback_check_interval
    }

    pub fn rollback_grace_period(&self) -> Duration {
        self.rollback_grace_period
    }

    pub fn significance_level(&self) -> f64 {
        self.significance_level
    }

    pub fn statistical_power(&self) -> f64 {
        self.statistical_power
    }

    pub fn test_type(&self) -> StatisticalTest {
        self.test_type
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Get the control variant
    pub fn control_variant(&self) -> Option<&TestVariant> {
        self.variants.iter().find(|v| v.is_control())
    }

    /// Find a variant by name
    pub fn variant(&self, name: &str) -> Option<&TestVariant> {
        self.variants.iter().find(|v| v.name() == name)
    }

    /// Every metric the monitor tracks for this experiment, primary first
    pub fn tracked_metrics(&self) -> Vec<&str> {
        let mut metrics = vec![self.primary_metric.as_str()];

        for metric in self
            .secondary_metrics
            .iter()
            .chain(self.rollback_thresholds.keys())
        {
            if !metrics.contains(&metric.as_str()) {
                metrics.push(metric);
            }
        }

        metrics
    }

    /// Check whether the rollback grace period has elapsed at `now`
    pub fn is_past_grace_period(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) => now - started >= to_time_delta(self.rollback_grace_period),
            None => false,
        }
    }

    /// Check whether the experiment has run at least its minimum run time at `now`
    pub fn has_met_minimum_run_time(&self, now: DateTime<Utc>) -> bool {
        match self.started_at {
            Some(started) => now - started >= to_time_delta(self.minimum_run_time),
            None => false,
        }
    }

    /// Check whether the planned end time has passed at `now`
    pub fn is_past_planned_end(&self, now: DateTime<Utc>) -> bool {
        self.planned_end_time.is_some_and(|end| now >= end)
    }

    /// Validate the full experiment definition
    pub fn validate(&self) -> Result<(), ExperimentValidationError> {
        if self.name.is_empty() {
            return Err(ExperimentValidationError::EmptyName);
        }

        if self.variants.is_empty() {
            return Err(ExperimentValidationError::NoVariants);
        }

        let mut seen = BTreeSet::new();

        for variant in &self.variants {
            variant.validate()?;

            if !seen.insert(variant.name()) {
                return Err(ExperimentValidationError::DuplicateVariantName(
                    variant.name().to_string(),
                ));
            }
        }

        let controls = self.variants.iter().filter(|v| v.is_control()).count();

        if controls != 1 {
            return Err(ExperimentValidationError::ControlCount(controls));
        }

        let percentages: Vec<f64> = self
            .variants
            .iter()
            .map(TestVariant::traffic_percentage)
            .collect();
        validate_traffic_sum(&percentages)?;

        if !is_open_unit_interval(self.significance_level) {
            return Err(ExperimentValidationError::InvalidSignificanceLevel(
                self.significance_level,
            ));
        }

        if !is_open_unit_interval(self.statistical_power) {
            return Err(ExperimentValidationError::InvalidStatisticalPower(
                self.statistical_power,
            ));
        }

        if self.primary_metric.is_empty() {
            return Err(ExperimentValidationError::EmptyPrimaryMetric);
        }

        Ok(())
    }

    /// Check validity without the reason
    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    // Registry-only mutations

    /// Stamp the registry-assigned identity and reset the lifecycle to Draft
    pub(crate) fn assign_identity(&mut self, id: ExperimentId, created_at: DateTime<Utc>) {
        self.id = id;
        self.created_at = created_at;
        self.status = ExperimentStatus::Draft;
        self.started_at = None;
        self.ended_at = None;
    }

    /// Move to Running, deriving the planned end from the maximum run time if unset
    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> Result<(), ExperimentValidationError> {
        self.transition(ExperimentStatus::Running)?;
        self.started_at = Some(now);

        if self.planned_end_time.is_none() {
            self.planned_end_time = Some(later_by(now, self.maximum_run_time));
        }

        Ok(())
    }

    pub(crate) fn pause(&mut self) -> Result<(), ExperimentValidationError> {
        self.transition(ExperimentStatus::Paused)
    }

    /// Move to a terminal status and stamp `ended_at`
    pub(crate) fn finish(
        &mut self,
        status: ExperimentStatus,
        now: DateTime<Utc>,
    ) -> Result<(), ExperimentValidationError> {
        if !status.is_terminal() {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                status.to_string(),
            ));
        }

        self.transition(status)?;
        self.ended_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, target: ExperimentStatus) -> Result<(), ExperimentValidationError> {
        if !self.status.can_transition_to(target) {
            return Err(ExperimentValidationError::InvalidStatusTransition(
                self.status.to_string(),
                target.to_string(),
            ));
        }

        self.status = target;
        Ok(())
    }

    /// Carry the lifecycle fields of `current` over a replacement definition
    pub(crate) fn inherit_lifecycle(&mut self, current: &Experiment) {
        self.id = current.id.clone();
        self.created_at = current.created_at;
        self.status = current.status;
        self.started_at = current.started_at;
        self.ended_at = current.ended_at;

        if self.planned_end_time.is_none() {
            self.planned_end_time = current.planned_end_time;
        }
    }
}
