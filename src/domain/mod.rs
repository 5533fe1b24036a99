//! Domain layer - experiment entities, validation and ports

pub mod error;
pub mod experiment;
pub mod metrics;
pub mod serde_utils;

pub use error::DomainError;
pub use experiment::{
    AlertSeverity, AssignmentContext, AssignmentResult, Experiment, ExperimentId,
    ExperimentResults, ExperimentStatus, ExperimentValidationError, FrameworkAlert, MetricGoal,
    ParticipationAssignment, SplitStrategy, StatisticalTest, TestResult, TestVariant,
    VariantResults,
};
pub use metrics::{MetricQuery, MetricTags, MetricsCollector, TimeWindow};

#[cfg(test)]
pub use metrics::MockMetricsCollector;
