//! Thread-safe in-memory experiment registry
//!
//! The registry is the only place experiment status changes. Every experiment
//! owns one `TrafficSplitter`; participation records live in a separate
//! ledger. Lock order is always experiments, then splitters or results,
//! then a splitter's own state. No lock is held while calling the metrics collector.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::hashing::{AssignmentHasher, Sha256AssignmentHasher};
use super::ledger::ParticipationLedger;
use super::splitter::{SplitterDiagnostics, TrafficSplitter};
use crate::domain::metrics::{variant_tags, PARTICIPATION_COUNTER};
use crate::infrastructure::observability::record_status_change;
use crate::domain::{
    AssignmentContext, AssignmentResult, DomainError, Experiment, ExperimentId,
    ExperimentResults, ExperimentStatus, ExperimentValidationError, MetricsCollector,
    ParticipationAssignment,
};

/// How a request is matched when several experiments are running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiExperimentPolicy {
    /// Use the earliest-created running experiment
    #[default]
    FirstRunning,
    /// Assign nothing while more than one experiment is running
    RejectOverlap,
}

/// Experiment counts grouped by lifecycle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: usize,
    pub draft: usize,
    pub running: usize,
    pub paused: usize,
    pub completed: usize,
    /// Rolled back or terminated
    pub failed: usize,
}

#[derive(Debug)]
struct StoredExperiment {
    sequence: u64,
    experiment: Experiment,
}

/// Authoritative store of experiments and their splitters
pub struct ExperimentRegistry {
    experiments: RwLock<HashMap<ExperimentId, StoredExperiment>>,
    splitters: RwLock<HashMap<ExperimentId, Arc<TrafficSplitter>>>,
    results: RwLock<HashMap<ExperimentId, ExperimentResults>>,
    ledger: ParticipationLedger,
    collector: Arc<dyn MetricsCollector>,
    hasher: Arc<dyn AssignmentHasher>,
    seed: Option<u64>,
    policy: MultiExperimentPolicy,
    sequence: AtomicU64,
}

impl std::fmt::Debug for ExperimentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentRegistry")
            .field("policy", &self.policy)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl ExperimentRegistry {
    /// Create an empty registry reporting participation to `collector`
    pub fn new(collector: Arc<dyn MetricsCollector>) -> Self {
        Self {
            experiments: RwLock::new(HashMap::new()),
            splitters: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            ledger: ParticipationLedger::new(),
            collector,
            hasher: Arc::new(Sha256AssignmentHasher),
            seed: None,
            policy: MultiExperimentPolicy::default(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Use a different hash for hash-based assignment
    pub fn with_hasher(mut self, hasher: Arc<dyn AssignmentHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Seed every splitter's RNG; experiment `n` uses `seed + n`
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_policy(mut self, policy: MultiExperimentPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> MultiExperimentPolicy {
        self.policy
    }

    // ------------------------------------------------------------------
    // CRUD
    // ------------------------------------------------------------------

    /// Validate and store a new draft experiment
    pub fn create(&self, mut experiment: Experiment) -> Result<ExperimentId, DomainError> {
        experiment.validate()?;

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let id = ExperimentId::generate(sequence);
        experiment.assign_identity(id.clone(), Utc::now());

        let splitter = TrafficSplitter::new(
            experiment.clone(),
            Arc::clone(&self.hasher),
            self.seed.map(|seed| seed.wrapping_add(sequence)),
        );

        let mut experiments = self.write_experiments()?;
        self.write_splitters()?
            .insert(id.clone(), Arc::new(splitter));
        experiments.insert(
            id.clone(),
            StoredExperiment {
                sequence,
                experiment,
            },
        );

        info!(experiment_id = %id, "Created experiment");
        Ok(id)
    }

    /// Replace the definition of a draft or paused experiment
    pub fn update(&self, id: &ExperimentId, mut experiment: Experiment) -> Result<(), DomainError> {
        let mut experiments = self.write_experiments()?;

        let stored = experiments
            .get_mut(id)
            .ok_or_else(|| not_found(id))?;

        if !stored.experiment.status().is_editable() {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' cannot be updated while {}",
                id,
                stored.experiment.status()
            )));
        }

        experiment.validate()?;
        experiment.inherit_lifecycle(&stored.experiment);

        if let Some(splitter) = self.read_splitters()?.get(id) {
            splitter.update_experiment(experiment.clone())?;
        }

        stored.experiment = experiment;

        info!(experiment_id = %id, "Updated experiment");
        Ok(())
    }

    /// Remove an experiment that is not running or paused, cascading to its
    /// splitter, ledger entries and results
    pub fn delete(&self, id: &ExperimentId) -> Result<(), DomainError> {
        let mut experiments = self.write_experiments()?;

        let status = experiments
            .get(id)
            .map(|stored| stored.experiment.status())
            .ok_or_else(|| not_found(id))?;

        if matches!(status, ExperimentStatus::Running | ExperimentStatus::Paused) {
            return Err(DomainError::conflict(format!(
                "Experiment '{}' must be stopped before deletion (currently {})",
                id, status
            )));
        }

        self.write_splitters()?.remove(id);
        let removed = self.ledger.remove(id)?;
        self.write_results()?.remove(id);
        experiments.remove(id);

        info!(experiment_id = %id, participations = removed, "Deleted experiment");
        Ok(())
    }

    pub fn get(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        Ok(self
            .read_experiments()?
            .get(id)
            .map(|stored| stored.experiment.clone()))
    }

    /// All experiments in creation order
    pub fn list(&self) -> Result<Vec<Experiment>, DomainError> {
        self.snapshot(|_| true)
    }

    /// Running experiments in creation order
    pub fn list_active(&self) -> Result<Vec<Experiment>, DomainError> {
        self.snapshot(|experiment| experiment.status().is_running())
    }

    pub fn status_counts(&self) -> Result<StatusCounts, DomainError> {
        let experiments = self.read_experiments()?;
        let mut counts = StatusCounts {
            total: experiments.len(),
            ..StatusCounts::default()
        };

        for stored in experiments.values() {
            match stored.experiment.status() {
                ExperimentStatus::Draft => counts.draft += 1,
                ExperimentStatus::Running => counts.running += 1,
                ExperimentStatus::Paused => counts.paused += 1,
                ExperimentStatus::Completed => counts.completed += 1,
                ExperimentStatus::RolledBack | ExperimentStatus::Terminated => counts.failed += 1,
            }
        }

        Ok(counts)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Move a draft or paused experiment to Running
    pub fn start(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.transition(id, "start", |experiment, now| {
            if experiment.variants().is_empty() {
                return Err(ExperimentValidationError::NoVariants);
            }
            experiment.start(now)
        })
    }

    pub fn pause(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.transition(id, "pause", |experiment, _| experiment.pause())
    }

    /// Move a paused experiment back to Running
    pub fn resume(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.transition(id, "resume", |experiment, now| {
            if experiment.status() != ExperimentStatus::Paused {
                return Err(ExperimentValidationError::InvalidStatusTransition(
                    experiment.status().to_string(),
                    ExperimentStatus::Running.to_string(),
                ));
            }
            experiment.start(now)
        })
    }

    /// Finish normally
    pub fn stop(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.finish(id, ExperimentStatus::Completed)
    }

    pub fn terminate(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.finish(id, ExperimentStatus::Terminated)
    }

    pub fn rollback(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.finish(id, ExperimentStatus::RolledBack)
    }

    fn finish(&self, id: &ExperimentId, status: ExperimentStatus) -> Result<Experiment, DomainError> {
        let operation = match status {
            ExperimentStatus::Completed => "stop",
            ExperimentStatus::RolledBack => "rollback",
            _ => "terminate",
        };

        self.transition(id, operation, |experiment, now| experiment.finish(status, now))
    }

    fn transition<F>(
        &self,
        id: &ExperimentId,
        operation: &str,
        apply: F,
    ) -> Result<Experiment, DomainError>
    where
        F: FnOnce(&mut Experiment, DateTime<Utc>) -> Result<(), ExperimentValidationError>,
    {
        let mut experiments = self.write_experiments()?;

        let stored = experiments
            .get_mut(id)
            .ok_or_else(|| not_found(id))?;
        let previous = stored.experiment.status();

        apply(&mut stored.experiment, Utc::now()).map_err(|e| {
            DomainError::conflict(format!(
                "Cannot {} experiment '{}' (currently {}): {}",
                operation, id, previous, e
            ))
        })?;

        info!(
            experiment_id = %id,
            from = %previous,
            to = %stored.experiment.status(),
            "Experiment status changed"
        );
        record_status_change(id, stored.experiment.status());

        Ok(stored.experiment.clone())
    }

    // ------------------------------------------------------------------
    // Serving path
    // ------------------------------------------------------------------

    /// Assign a request to a variant of a running experiment and record it
    ///
    /// Returns `None` when no running experiment applies.
    pub fn get_variant_for_request(
        &self,
        user_id: &str,
        session_id: &str,
        context: &AssignmentContext,
    ) -> Result<Option<AssignmentResult>, DomainError> {
        let Some(experiment_id) = self.select_experiment()? else {
            return Ok(None);
        };

        let splitter = self.read_splitters()?.get(&experiment_id).cloned();

        let Some(splitter) = splitter else {
            warn!(experiment_id = %experiment_id, "Running experiment has no splitter");
            return Ok(None);
        };

        let Some(assignment) = splitter.assign_variant(user_id, context)? else {
            return Ok(None);
        };

        self.ledger.record(
            ParticipationAssignment::new(
                experiment_id.clone(),
                user_id,
                session_id,
                assignment.variant_name.clone(),
            )
            .with_context(context.clone()),
        )?;

        self.collector.record_counter(
            PARTICIPATION_COUNTER,
            1.0,
            &variant_tags(&experiment_id, &assignment.variant_name),
        );

        Ok(Some(assignment))
    }

    fn select_experiment(&self) -> Result<Option<ExperimentId>, DomainError> {
        let experiments = self.read_experiments()?;

        let mut running: Vec<(u64, &ExperimentId)> = experiments
            .iter()
            .filter(|(_, stored)| stored.experiment.status().is_running())
            .map(|(id, stored)| (stored.sequence, id))
            .collect();
        running.sort_unstable();

        match (self.policy, running.as_slice()) {
            (_, []) => Ok(None),
            (MultiExperimentPolicy::RejectOverlap, [_, _, ..]) => {
                warn!(
                    running = running.len(),
                    "Multiple running experiments overlap; no variant assigned"
                );
                Ok(None)
            }
            (_, [(_, id), ..]) => Ok(Some((*id).clone())),
        }
    }

    // ------------------------------------------------------------------
    // Participation and diagnostics
    // ------------------------------------------------------------------

    pub fn participations(
        &self,
        id: &ExperimentId,
    ) -> Result<Vec<ParticipationAssignment>, DomainError> {
        self.ledger.participations(id)
    }

    pub fn participant_count(&self, id: &ExperimentId, variant: &str) -> Result<u64, DomainError> {
        self.ledger.participant_count(id, variant)
    }

    pub fn participant_counts(&self, id: &ExperimentId) -> Result<BTreeMap<String, u64>, DomainError> {
        self.ledger.counts_by_variant(id)
    }

    pub fn splitter_diagnostics(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<SplitterDiagnostics>, DomainError> {
        let splitter = self.read_splitters()?.get(id).cloned();
        splitter.map(|s| s.diagnostics()).transpose()
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    /// Store results for an experiment that still exists
    pub fn store_results(&self, results: ExperimentResults) -> Result<(), DomainError> {
        let experiments = self.read_experiments()?;
        if !experiments.contains_key(&results.experiment_id) {
            return Err(not_found(&results.experiment_id));
        }

        debug!(experiment_id = %results.experiment_id, "Stored experiment results");
        self.write_results()?
            .insert(results.experiment_id.clone(), results);
        Ok(())
    }

    pub fn results(&self, id: &ExperimentId) -> Result<Option<ExperimentResults>, DomainError> {
        Ok(self.read_results()?.get(id).cloned())
    }

    /// Terminal experiments whose `ended_at` is before `cutoff`
    pub fn finished_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExperimentId>, DomainError> {
        Ok(self
            .read_experiments()?
            .iter()
            .filter(|(_, stored)| {
                stored.experiment.status().is_terminal()
                    && stored.experiment.ended_at().is_some_and(|ended| ended < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect())
    }

    // ------------------------------------------------------------------
    // Lock helpers
    // ------------------------------------------------------------------

    fn snapshot<F>(&self, keep: F) -> Result<Vec<Experiment>, DomainError>
    where
        F: Fn(&Experiment) -> bool,
    {
        let experiments = self.read_experiments()?;

        let mut selected: Vec<&StoredExperiment> = experiments
            .values()
            .filter(|stored| keep(&stored.experiment))
            .collect();
        selected.sort_unstable_by_key(|stored| stored.sequence);

        Ok(selected.into_iter().map(|s| s.experiment.clone()).collect())
    }

    fn read_experiments(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ExperimentId, StoredExperiment>>, DomainError>
    {
        self.experiments
            .read()
            .map_err(|e| DomainError::internal(format!("Experiment lock poisoned: {}", e)))
    }

    fn write_experiments(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ExperimentId, StoredExperiment>>, DomainError>
    {
        self.experiments
            .write()
            .map_err(|e| DomainError::internal(format!("Experiment lock poisoned: {}", e)))
    }

    fn read_splitters(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ExperimentId, Arc<TrafficSplitter>>>, DomainError>
    {
        self.splitters
            .read()
            .map_err(|e| DomainError::internal(format!("Splitter table lock poisoned: {}", e)))
    }

    fn write_splitters(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ExperimentId, Arc<TrafficSplitter>>>, DomainError>
    {
        self.splitters
            .write()
            .map_err(|e| DomainError::internal(format!("Splitter table lock poisoned: {}", e)))
    }

    fn read_results(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<ExperimentId, ExperimentResults>>, DomainError>
    {
        self.results
            .read()
            .map_err(|e| DomainError::internal(format!("Results lock poisoned: {}", e)))
    }

    fn write_results(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<ExperimentId, ExperimentResults>>, DomainError>
    {
        self.results
            .write()
            .map_err(|e| DomainError::internal(format!("Results lock poisoned: {}", e)))
    }
}

fn not_found(id: &ExperimentId) -> DomainError {
    DomainError::not_found(format!("Experiment '{}' not found", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::MockMetricsCollector;
    use crate::domain::{SplitStrategy, TestVariant};
    use crate::infrastructure::metrics::InMemoryMetricsCollector;

    fn experiment(name: &str) -> Experiment {
        Experiment::new(name, "latency_ms")
            .with_variant(TestVariant::control("control", 50.0))
            .with_variant(TestVariant::new("treatment", 50.0))
    }

    fn registry() -> ExperimentRegistry {
        ExperimentRegistry::new(Arc::new(InMemoryMetricsCollector::new())).with_seed(42)
    }

    mod crud_tests {
        use super::*;

        #[test]
        fn test_create_assigns_identity() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();

            let stored = registry.get(&id).unwrap().unwrap();
            assert_eq!(stored.id(), &id);
            assert_eq!(stored.status(), ExperimentStatus::Draft);
            assert!(id.as_str().starts_with("exp_"));
        }

        #[test]
        fn test_create_rejects_invalid() {
            let registry = registry();
            let invalid = Experiment::new("Bad", "latency_ms")
                .with_variant(TestVariant::control("control", 30.0))
                .with_variant(TestVariant::new("treatment", 30.0));

            let err = registry.create(invalid).unwrap_err();
            assert!(err.is_validation());
            assert!(registry.list().unwrap().is_empty());
        }

        #[test]
        fn test_ids_are_unique_and_listed_in_creation_order() {
            let registry = registry();
            let ids: Vec<ExperimentId> = (0..5)
                .map(|i| registry.create(experiment(&format!("E{}", i))).unwrap())
                .collect();

            let listed: Vec<ExperimentId> = registry
                .list()
                .unwrap()
                .iter()
                .map(|e| e.id().clone())
                .collect();
            assert_eq!(listed, ids);
        }

        #[test]
        fn test_get_unknown_returns_none() {
            assert!(registry().get(&ExperimentId::new("nope")).unwrap().is_none());
        }

        #[test]
        fn test_update_preserves_identity() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            let created_at = registry.get(&id).unwrap().unwrap().created_at();

            let replacement = experiment("A v2").with_split_strategy(SplitStrategy::RoundRobin);
            registry.update(&id, replacement).unwrap();

            let stored = registry.get(&id).unwrap().unwrap();
            assert_eq!(stored.name(), "A v2");
            assert_eq!(stored.id(), &id);
            assert_eq!(stored.created_at(), created_at);
            assert_eq!(stored.split_strategy(), SplitStrategy::RoundRobin);
        }

        #[test]
        fn test_update_errors() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();

            assert!(registry
                .update(&ExperimentId::new("missing"), experiment("B"))
                .unwrap_err()
                .is_not_found());

            let invalid = Experiment::new("Bad", "latency_ms");
            assert!(registry.update(&id, invalid).unwrap_err().is_validation());

            registry.start(&id).unwrap();
            assert!(registry.update(&id, experiment("C")).unwrap_err().is_conflict());
            assert_eq!(registry.get(&id).unwrap().unwrap().name(), "A");
        }

        #[test]
        fn test_update_reaches_splitter() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();

            let all_treatment = Experiment::new("A", "latency_ms")
                .with_variant(TestVariant::control("control", 0.0))
                .with_variant(TestVariant::new("treatment", 100.0));
            registry.update(&id, all_treatment).unwrap();
            registry.start(&id).unwrap();

            for i in 0..50 {
                let assignment = registry
                    .get_variant_for_request(&format!("u{}", i), "s", &AssignmentContext::new())
                    .unwrap()
                    .unwrap();
                assert_eq!(assignment.variant_name, "treatment");
            }
        }

        #[test]
        fn test_delete_rules() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            registry.start(&id).unwrap();

            assert!(registry.delete(&id).unwrap_err().is_conflict());
            registry.pause(&id).unwrap();
            assert!(registry.delete(&id).unwrap_err().is_conflict());

            registry.stop(&id).unwrap();
            registry.delete(&id).unwrap();
            assert!(registry.get(&id).unwrap().is_none());
            assert!(registry.delete(&id).unwrap_err().is_not_found());
        }

        #[test]
        fn test_delete_cascades() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            registry.start(&id).unwrap();
            registry
                .get_variant_for_request("u1", "s1", &AssignmentContext::new())
                .unwrap();
            registry
                .store_results(ExperimentResults::new(id.clone(), ExperimentStatus::Running))
                .unwrap();

            registry.terminate(&id).unwrap();
            registry.delete(&id).unwrap();

            assert!(registry.participations(&id).unwrap().is_empty());
            assert!(registry.splitter_diagnostics(&id).unwrap().is_none());
            assert!(registry.results(&id).unwrap().is_none());
        }

        #[test]
        fn test_results_for_deleted_experiment_are_rejected() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            registry.delete(&id).unwrap();

            let err = registry
                .store_results(ExperimentResults::new(id.clone(), ExperimentStatus::Running))
                .unwrap_err();

            assert!(err.is_not_found());
            assert!(registry.results(&id).unwrap().is_none());
        }
    }

    mod lifecycle_tests {
        use super::*;
        use std::time::Duration;

        #[test]
        fn test_unbounded_run_time_starts_and_keeps_registry_usable() {
            let registry = registry();
            let id = registry
                .create(experiment("A").with_maximum_run_time(Duration::from_secs(u64::MAX / 4)))
                .unwrap();

            registry.start(&id).unwrap();

            let started = registry.get(&id).unwrap().unwrap();
            assert_eq!(started.planned_end_time(), Some(DateTime::<Utc>::MAX_UTC));
            assert!(!started.is_past_planned_end(Utc::now()));
            assert_eq!(registry.list().unwrap().len(), 1);
            assert!(registry
                .get_variant_for_request("u1", "s1", &AssignmentContext::new())
                .unwrap()
                .is_some());
        }

        #[test]
        fn test_start_twice_conflicts() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();

            let started = registry.start(&id).unwrap();
            assert!(started.started_at().is_some());
            assert!(started.planned_end_time().is_some());

            assert!(registry.start(&id).unwrap_err().is_conflict());
        }

        #[test]
        fn test_pause_resume() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();

            assert!(registry.resume(&id).unwrap_err().is_conflict());
            registry.start(&id).unwrap();
            assert_eq!(registry.pause(&id).unwrap().status(), ExperimentStatus::Paused);
            assert_eq!(registry.resume(&id).unwrap().status(), ExperimentStatus::Running);
        }

        #[test]
        fn test_terminal_transitions_stamp_ended_at() {
            let registry = registry();

            for (finish, expected) in [
                (ExperimentStatus::Completed, ExperimentStatus::Completed),
                (ExperimentStatus::Terminated, ExperimentStatus::Terminated),
                (ExperimentStatus::RolledBack, ExperimentStatus::RolledBack),
            ] {
                let id = registry.create(experiment("A")).unwrap();
                registry.start(&id).unwrap();

                let ended = match finish {
                    ExperimentStatus::Completed => registry.stop(&id),
                    ExperimentStatus::Terminated => registry.terminate(&id),
                    _ => registry.rollback(&id),
                }
                .unwrap();

                assert_eq!(ended.status(), expected);
                assert!(ended.ended_at().is_some());
                assert!(registry.start(&id).unwrap_err().is_conflict());
            }
        }

        #[test]
        fn test_draft_cannot_finish() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            assert!(registry.stop(&id).unwrap_err().is_conflict());
            assert!(registry.rollback(&id).unwrap_err().is_conflict());
        }

        #[test]
        fn test_status_counts() {
            let registry = registry();
            let running = registry.create(experiment("A")).unwrap();
            let rolled_back = registry.create(experiment("B")).unwrap();
            registry.create(experiment("C")).unwrap();

            registry.start(&running).unwrap();
            registry.start(&rolled_back).unwrap();
            registry.rollback(&rolled_back).unwrap();

            let counts = registry.status_counts().unwrap();
            assert_eq!(counts.total, 3);
            assert_eq!(counts.running, 1);
            assert_eq!(counts.failed, 1);
            assert_eq!(counts.draft, 1);
        }
    }

    mod assignment_tests {
        use super::*;

        #[test]
        fn test_no_running_experiment() {
            let registry = registry();
            registry.create(experiment("A")).unwrap();

            assert!(registry
                .get_variant_for_request("u1", "s1", &AssignmentContext::new())
                .unwrap()
                .is_none());
        }

        #[test]
        fn test_assignment_is_recorded_and_counted() {
            let mut collector = MockMetricsCollector::new();
            collector
                .expect_record_counter()
                .withf(|name, value, tags| {
                    name == PARTICIPATION_COUNTER
                        && *value == 1.0
                        && tags.contains_key("experiment_id")
                        && tags.contains_key("variant")
                })
                .times(3)
                .return_const(());

            let registry = ExperimentRegistry::new(Arc::new(collector));
            let id = registry.create(experiment("A")).unwrap();
            registry.start(&id).unwrap();

            for user in ["a", "b", "c"] {
                let assignment = registry
                    .get_variant_for_request(user, "sess", &AssignmentContext::new())
                    .unwrap()
                    .unwrap();
                assert_eq!(assignment.experiment_id, id);
            }

            let participations = registry.participations(&id).unwrap();
            assert_eq!(participations.len(), 3);
            assert_eq!(participations[0].user_id, "a");
            assert_eq!(participations[0].session_id, "sess");

            let total: u64 = registry.participant_counts(&id).unwrap().values().sum();
            assert_eq!(total, 3);
        }

        #[test]
        fn test_first_running_policy_uses_creation_order() {
            let registry = registry();
            let first = registry.create(experiment("First")).unwrap();
            let second = registry.create(experiment("Second")).unwrap();
            registry.start(&second).unwrap();
            registry.start(&first).unwrap();

            let assignment = registry
                .get_variant_for_request("u", "s", &AssignmentContext::new())
                .unwrap()
                .unwrap();
            assert_eq!(assignment.experiment_id, first);
        }

        #[test]
        fn test_reject_overlap_policy() {
            let registry = registry().with_policy(MultiExperimentPolicy::RejectOverlap);
            let first = registry.create(experiment("First")).unwrap();
            let second = registry.create(experiment("Second")).unwrap();

            registry.start(&first).unwrap();
            assert!(registry
                .get_variant_for_request("u", "s", &AssignmentContext::new())
                .unwrap()
                .is_some());

            registry.start(&second).unwrap();
            assert!(registry
                .get_variant_for_request("u", "s", &AssignmentContext::new())
                .unwrap()
                .is_none());
        }

        #[test]
        fn test_paused_experiment_receives_no_traffic() {
            let registry = registry();
            let id = registry.create(experiment("A")).unwrap();
            registry.start(&id).unwrap();
            registry.pause(&id).unwrap();

            assert!(registry
                .get_variant_for_request("u", "s", &AssignmentContext::new())
                .unwrap()
                .is_none());
        }

        #[test]
        fn test_concurrent_assignment() {
            let registry = Arc::new(registry());
            let id = registry
                .create(experiment("A").with_split_strategy(SplitStrategy::RoundRobin))
                .unwrap();
            registry.start(&id).unwrap();

            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let registry = Arc::clone(&registry);
                    std::thread::spawn(move || {
                        for i in 0..250 {
                            registry
                                .get_variant_for_request(
                                    &format!("t{}-u{}", t, i),
                                    "s",
                                    &AssignmentContext::new(),
                                )
                                .unwrap();
                        }
                    })
                })
                .collect();

            for handle in handles {
                handle.join().unwrap();
            }

            assert_eq!(registry.participant_count(&id, "control").unwrap(), 1_000);
            assert_eq!(registry.participant_count(&id, "treatment").unwrap(), 1_000);
        }
    }

    #[test]
    fn test_finished_before() {
        let registry = registry();
        let id = registry.create(experiment("A")).unwrap();
        registry.start(&id).unwrap();
        registry.stop(&id).unwrap();

        let later = Utc::now() + chrono::TimeDelta::seconds(1);
        assert_eq!(registry.finished_before(later).unwrap(), vec![id]);
        assert!(registry
            .finished_before(Utc::now() - chrono::TimeDelta::hours(1))
            .unwrap()
            .is_empty());
    }
}
