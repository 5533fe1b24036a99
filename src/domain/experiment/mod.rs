//! Experiment domain module for A/B testing
//!
//! Types describing experiments, the variants they route traffic to, the
//! participation ledger entries, derived results and monitoring alerts.

mod alert;
mod assignment;
mod entity;
mod result;
mod validation;

pub use alert::{AlertSeverity, FrameworkAlert};
pub use assignment::{AssignmentContext, AssignmentResult, ParticipationAssignment};
pub use entity::{
    Experiment, ExperimentId, ExperimentStatus, MetricGoal, SplitStrategy, StatisticalTest,
    TestVariant,
};
pub use result::{ExperimentResults, TestResult, VariantResults};
pub use validation::{ExperimentValidationError, TRAFFIC_SUM_TOLERANCE};
