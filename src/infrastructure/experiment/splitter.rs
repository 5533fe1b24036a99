//! Per-experiment traffic splitting
//!
//! A `TrafficSplitter` owns the latest snapshot of one experiment together with
//! the mutable assignment state (RNG, round-robin counter and sticky user map).
//! All of it lives behind a single mutex so assignments within one experiment
//! are serialized while different experiments never contend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::hashing::{context_point, AssignmentHasher};
use crate::domain::{
    AssignmentContext, AssignmentResult, DomainError, Experiment, SplitStrategy, TestVariant,
};

/// Descriptive view of how sticky assignments are spread across variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitterDiagnostics {
    pub assignment_counts: BTreeMap<String, u64>,
    pub split_accuracy: f64,
    pub round_robin_counter: u64,
}

struct SplitterState {
    experiment: Experiment,
    rng: StdRng,
    round_robin_counter: u64,
    user_assignments: HashMap<String, String>,
}

/// Assigns requests to the variants of one experiment
pub struct TrafficSplitter {
    state: Mutex<SplitterState>,
    hasher: Arc<dyn AssignmentHasher>,
}

impl std::fmt::Debug for TrafficSplitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrafficSplitter")
            .field("hasher", &self.hasher)
            .finish_non_exhaustive()
    }
}

impl TrafficSplitter {
    /// Create a splitter bound to an experiment snapshot
    ///
    /// A `seed` makes random and sticky assignment reproducible.
    pub fn new(
        experiment: Experiment,
        hasher: Arc<dyn AssignmentHasher>,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            state: Mutex::new(SplitterState {
                experiment,
                rng,
                round_robin_counter: 0,
                user_assignments: HashMap::new(),
            }),
            hasher,
        }
    }

    /// Pick a variant for a request
    ///
    /// Returns `None` only when the experiment has no variants.
    pub fn assign_variant(
        &self,
        user_id: &str,
        context: &AssignmentContext,
    ) -> Result<Option<AssignmentResult>, DomainError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| DomainError::internal(format!("Splitter lock poisoned: {}", e)))?;

        let SplitterState {
            experiment,
            rng,
            round_robin_counter,
            user_assignments,
        } = &mut *state;

        let variants = experiment.variants();

        if variants.is_empty() {
            return Ok(None);
        }

        let variant = match experiment.split_strategy() {
            SplitStrategy::Random | SplitStrategy::WeightedRandom => {
                weighted_pick(variants, rng.gen_range(0.0..1.0))
            }
            SplitStrategy::RoundRobin => {
                let index = (*round_robin_counter % variants.len() as u64) as usize;
                *round_robin_counter = round_robin_counter.wrapping_add(1);
                &variants[index]
            }
            SplitStrategy::StickySession => {
                sticky_pick(variants, user_assignments, rng, user_id)
            }
            SplitStrategy::HashBased => {
                if context.is_empty() {
                    weighted_pick(variants, rng.gen_range(0.0..1.0))
                } else {
                    weighted_pick(variants, context_point(self.hasher.as_ref(), context))
                }
            }
        };

        debug!(
            experiment_id = %experiment.id(),
            variant = %variant.name(),
            strategy = ?experiment.split_strategy(),
            "Assigned variant"
        );

        Ok(Some(AssignmentResult::from_variant(
            experiment.id().clone(),
            variant,
        )))
    }

    /// Swap in a new experiment snapshot; sticky assignments are kept
    pub fn update_experiment(&self, experiment: Experiment) -> Result<(), DomainError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| DomainError::internal(format!("Splitter lock poisoned: {}", e)))?;
        state.experiment = experiment;
        Ok(())
    }

    /// Per-variant tally of sticky assignments
    pub fn get_assignment_counts(&self) -> Result<BTreeMap<String, u64>, DomainError> {
        let state = self
            .state
            .lock()
            .map_err(|e| DomainError::internal(format!("Splitter lock poisoned: {}", e)))?;
        Ok(assignment_counts(&state))
    }

    /// `1 - Σ|expected - actual| / variant_count` over sticky assignments
    ///
    /// Returns 1.0 when nothing has been assigned yet.
    pub fn get_split_accuracy(&self) -> Result<f64, DomainError> {
        let state = self
            .state
            .lock()
            .map_err(|e| DomainError::internal(format!("Splitter lock poisoned: {}", e)))?;
        Ok(split_accuracy(&state))
    }

    pub fn diagnostics(&self) -> Result<SplitterDiagnostics, DomainError> {
        let state = self
            .state
            .lock()
            .map_err(|e| DomainError::internal(format!("Splitter lock poisoned: {}", e)))?;

        Ok(SplitterDiagnostics {
            assignment_counts: assignment_counts(&state),
            split_accuracy: split_accuracy(&state),
            round_robin_counter: state.round_robin_counter,
        })
    }
}

/// Walk variants accumulating their share until it reaches `point`
fn weighted_pick(variants: &[TestVariant], point: f64) -> &TestVariant {
    let mut cumulative = 0.0;

    for variant in variants {
        if variant.traffic_percentage() <= 0.0 {
            continue;
        }

        cumulative += variant.traffic_percentage() / 100.0;

        if cumulative >= point {
            return variant;
        }
    }

    // Floating-point shortfall below 1.0
    &variants[variants.len() - 1]
}

fn sticky_pick<'a>(
    variants: &'a [TestVariant],
    user_assignments: &mut HashMap<String, String>,
    rng: &mut StdRng,
    user_id: &str,
) -> &'a TestVariant {
    if user_id.is_empty() {
        return weighted_pick(variants, rng.gen_range(0.0..1.0));
    }

    let cached = user_assignments
        .get(user_id)
        .and_then(|name| variants.iter().find(|v| v.name() == name));

    if let Some(variant) = cached {
        return variant;
    }

    let variant = weighted_pick(variants, rng.gen_range(0.0..1.0));
    user_assignments.insert(user_id.to_string(), variant.name().to_string());
    variant
}

fn assignment_counts(state: &SplitterState) -> BTreeMap<String, u64> {
    let mut counts: BTreeMap<String, u64> = state
        .experiment
        .variants()
        .iter()
        .map(|v| (v.name().to_string(), 0))
        .collect();

    for variant in state.user_assignments.values() {
        *counts.entry(variant.clone()).or_insert(0) += 1;
    }

    counts
}

fn split_accuracy(state: &SplitterState) -> f64 {
    let variants = state.experiment.variants();
    let total = state.user_assignments.len();

    if total == 0 || variants.is_empty() {
        return 1.0;
    }

    let counts = assignment_counts(state);
    let divergence: f64 = variants
        .iter()
        .map(|v| {
            let expected = v.traffic_percentage() / 100.0;
            let actual = counts.get(v.name()).copied().unwrap_or(0) as f64 / total as f64;
            (expected - actual).abs()
        })
        .sum();

    1.0 - divergence / variants.len() as f64
}
