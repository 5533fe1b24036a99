//! Infrastructure layer for experiment A/B testing
//!
//! Provides the registry, traffic splitting, participation tracking and
//! statistical analysis behind the experiment service.

mod alerts;
mod analysis;
mod hashing;
mod ledger;
mod registry;
mod splitter;
mod statistical;
mod utils;

pub use alerts::AlertLog;
pub use analysis::{analyze_experiment, VariantSamples, MIN_DETECTABLE_EFFECT};
pub use hashing::{canonical_context, AssignmentHasher, Sha256AssignmentHasher};
pub use ledger::ParticipationLedger;
pub use registry::{ExperimentRegistry, MultiExperimentPolicy, StatusCounts};
pub use splitter::{SplitterDiagnostics, TrafficSplitter};
pub use statistical::{
    bonferroni_correction, cliffs_delta, effect_size_from_means, false_discovery_rate_correction,
    inverse_normal_cdf, is_statistically_significant, mean, normal_cdf, std_dev, variance,
    NormalApproximationAnalyzer, SampleSummary, StatisticalAnalyzer, DEFAULT_SAMPLE_SIZE,
    Z_TEST_MIN_SAMPLES,
};
pub use utils::{create_experiment_summary, generate_session_id, hash_user_id};
