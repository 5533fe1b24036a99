//! Experiment service for A/B testing
//!
//! Composes the registry, statistical analyzer, alert log and monitoring
//! loop behind the operations used by the serving path and dashboards.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::monitoring::{CycleReport, MonitorSettings, MonitoringLoop};
use crate::config::ExperimentsConfig;
use crate::domain::{
    AssignmentContext, AssignmentResult, DomainError, Experiment, ExperimentId, ExperimentResults,
    FrameworkAlert, MetricsCollector, ParticipationAssignment, TestResult,
};
use crate::infrastructure::experiment::{
    create_experiment_summary, AlertLog, ExperimentRegistry, NormalApproximationAnalyzer,
    SplitterDiagnostics, StatisticalAnalyzer,
};

/// Alerts included in the status overview
const STATUS_ALERT_LIMIT: usize = 10;

/// Overview of the experimentation framework
#[derive(Debug, Clone, Serialize)]
pub struct FrameworkStatus {
    pub monitoring_active: bool,
    pub total_experiments: usize,
    pub draft_experiments: usize,
    pub running_experiments: usize,
    pub paused_experiments: usize,
    pub completed_experiments: usize,
    /// Rolled back or terminated
    pub failed_experiments: usize,
    pub recent_alert_count: usize,
    pub recent_alerts: Vec<FrameworkAlert>,
}

/// Service for managing A/B testing experiments
pub struct ExperimentService {
    registry: Arc<ExperimentRegistry>,
    analyzer: Arc<dyn StatisticalAnalyzer>,
    alerts: Arc<AlertLog>,
    monitor: MonitoringLoop,
}

impl std::fmt::Debug for ExperimentService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentService")
            .field("registry", &self.registry)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl ExperimentService {
    /// Create a service with the default analyzer, configured from `config`
    pub fn new(collector: Arc<dyn MetricsCollector>, config: &ExperimentsConfig) -> Self {
        let mut registry =
            ExperimentRegistry::new(collector.clone()).with_policy(config.selection_policy);

        if let Some(seed) = config.assignment_seed {
            registry = registry.with_seed(seed);
        }

        Self::from_parts(
            Arc::new(registry),
            collector,
            Arc::new(NormalApproximationAnalyzer),
            Arc::new(AlertLog::new(config.max_recent_alerts, config.alert_cooldown())),
            MonitorSettings::from(config),
        )
    }

    pub fn from_parts(
        registry: Arc<ExperimentRegistry>,
        collector: Arc<dyn MetricsCollector>,
        analyzer: Arc<dyn StatisticalAnalyzer>,
        alerts: Arc<AlertLog>,
        settings: MonitorSettings,
    ) -> Self {
        let monitor = MonitoringLoop::new(
            registry.clone(),
            collector,
            analyzer.clone(),
            alerts.clone(),
            settings,
        );

        Self {
            registry,
            analyzer,
            alerts,
            monitor,
        }
    }

    pub fn registry(&self) -> &Arc<ExperimentRegistry> {
        &self.registry
    }

    // ========================================================================
    // CRUD Operations
    // ========================================================================

    /// Validate and store a new draft experiment
    pub fn create_experiment(&self, experiment: Experiment) -> Result<ExperimentId, DomainError> {
        debug!(name = %experiment.name(), "Creating experiment");
        self.registry.create(experiment)
    }

    /// Replace the definition of a draft or paused experiment
    pub fn update_experiment(
        &self,
        id: &ExperimentId,
        experiment: Experiment,
    ) -> Result<(), DomainError> {
        debug!(experiment_id = %id, "Updating experiment");
        self.registry.update(id, experiment)
    }

    pub fn delete_experiment(&self, id: &ExperimentId) -> Result<(), DomainError> {
        debug!(experiment_id = %id, "Deleting experiment");
        self.registry.delete(id)
    }

    pub fn get_experiment(&self, id: &ExperimentId) -> Result<Option<Experiment>, DomainError> {
        self.registry.get(id)
    }

    pub fn list_experiments(&self) -> Result<Vec<Experiment>, DomainError> {
        self.registry.list()
    }

    pub fn list_active_experiments(&self) -> Result<Vec<Experiment>, DomainError> {
        self.registry.list_active()
    }

    // ========================================================================
    // Lifecycle Operations
    // ========================================================================

    /// Start a draft or paused experiment (-> Running)
    pub fn start_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.start(id)
    }

    pub fn pause_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.pause(id)
    }

    pub fn resume_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.resume(id)
    }

    /// Finish normally (-> Completed)
    pub fn stop_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.stop(id)
    }

    pub fn terminate_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.terminate(id)
    }

    pub fn rollback_experiment(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry.rollback(id)
    }

    // ========================================================================
    // Serving Path
    // ========================================================================

    /// Assign a request to a variant; `None` when no running experiment applies
    pub fn get_variant_for_request(
        &self,
        user_id: &str,
        session_id: &str,
        context: &AssignmentContext,
    ) -> Result<Option<AssignmentResult>, DomainError> {
        self.registry.get_variant_for_request(user_id, session_id, context)
    }

    pub fn participations(
        &self,
        id: &ExperimentId,
    ) -> Result<Vec<ParticipationAssignment>, DomainError> {
        self.registry.participations(id)
    }

    pub fn splitter_diagnostics(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<SplitterDiagnostics>, DomainError> {
        self.registry.splitter_diagnostics(id)
    }

    // ========================================================================
    // Analysis
    // ========================================================================

    /// Recompute and store the results of an experiment
    pub fn get_experiment_results(
        &self,
        id: &ExperimentId,
    ) -> Result<Option<ExperimentResults>, DomainError> {
        let Some(experiment) = self.registry.get(id)? else {
            return Ok(None);
        };

        let results = self.monitor.compute_results(&experiment)?;
        match self.registry.store_results(results.clone()) {
            Ok(()) => Ok(Some(results)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Compare two variants on `metric` (the primary metric when `None`)
    pub fn compare_variants(
        &self,
        id: &ExperimentId,
        baseline: &str,
        candidate: &str,
        metric: Option<&str>,
    ) -> Result<TestResult, DomainError> {
        let experiment = self.require(id)?;

        for name in [baseline, candidate] {
            if experiment.variant(name).is_none() {
                return Err(DomainError::not_found(format!(
                    "Variant '{}' not found in experiment '{}'",
                    name, id
                )));
            }
        }

        let metric = metric.unwrap_or(experiment.primary_metric());
        let samples = self.monitor.collect_samples(&experiment, &[metric])?;
        let values = |variant: &str| -> Vec<f64> {
            samples
                .get(variant)
                .and_then(|metrics| metrics.get(metric))
                .cloned()
                .unwrap_or_default()
        };

        Ok(self.analyzer.compare(
            experiment.test_type(),
            &values(baseline),
            &values(candidate),
            experiment.significance_level(),
        ))
    }

    pub fn is_experiment_significant(&self, id: &ExperimentId) -> Result<bool, DomainError> {
        Ok(self
            .get_experiment_results(id)?
            .is_some_and(|results| results.is_significant))
    }

    pub fn get_winning_variant(&self, id: &ExperimentId) -> Result<Option<String>, DomainError> {
        Ok(self
            .get_experiment_results(id)?
            .and_then(|results| results.winning_variant))
    }

    /// JSON overview of an experiment with its last stored results
    pub fn experiment_summary(&self, id: &ExperimentId) -> Result<Option<Value>, DomainError> {
        let Some(experiment) = self.registry.get(id)? else {
            return Ok(None);
        };
        let results = self.registry.results(id)?;

        Ok(Some(create_experiment_summary(&experiment, results.as_ref())))
    }

    // ========================================================================
    // Alerts and Monitoring
    // ========================================================================

    /// Evaluate thresholds of a running experiment now and log the resulting alerts
    pub fn check_for_alerts(&self, id: &ExperimentId) -> Result<Vec<FrameworkAlert>, DomainError> {
        let experiment = self.require(id)?;

        if !experiment.status().is_running() {
            return Ok(Vec::new());
        }

        let alerts = self.monitor.evaluate_alerts(&experiment)?;

        for alert in &alerts {
            self.alerts.record(alert.clone());
        }

        Ok(alerts)
    }

    /// Up to `limit` alerts, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<FrameworkAlert> {
        self.alerts.recent(limit)
    }

    pub fn clear_alerts(&self) {
        self.alerts.clear();
        info!("Cleared alert log");
    }

    pub fn get_status(&self) -> Result<FrameworkStatus, DomainError> {
        let counts = self.registry.status_counts()?;

        Ok(FrameworkStatus {
            monitoring_active: self.monitor.is_active(),
            total_experiments: counts.total,
            draft_experiments: counts.draft,
            running_experiments: counts.running,
            paused_experiments: counts.paused,
            completed_experiments: counts.completed,
            failed_experiments: counts.failed,
            recent_alert_count: self.alerts.len(),
            recent_alerts: self.alerts.recent(STATUS_ALERT_LIMIT),
        })
    }

    pub fn start_monitoring(&self) -> Result<(), DomainError> {
        self.monitor.start()
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop();
    }

    /// Run one monitoring cycle on the calling thread
    pub fn run_monitoring_cycle(&self) -> CycleReport {
        self.monitor.run_cycle()
    }

    fn require(&self, id: &ExperimentId) -> Result<Experiment, DomainError> {
        self.registry
            .get(id)?
            .ok_or_else(|| DomainError::not_found(format!("Experiment '{}' not found", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AlertSeverity, ExperimentStatus, TestVariant};
    use crate::infrastructure::metrics::InMemoryMetricsCollector;

    fn service() -> (ExperimentService, Arc<InMemoryMetricsCollector>) {
        let collector = Arc::new(InMemoryMetricsCollector::default());
        let config = ExperimentsConfig {
            assignment_seed: Some(11),
            ..Default::default()
        };

        (ExperimentService::new(collector.clone(), &config), collector)
    }

    fn experiment() -> Experiment {
        Experiment::new("Prompt rewrite", "quality")
            .with_variant(TestVariant::control("control", 50.0))
            .with_variant(TestVariant::new("treatment", 50.0))
            .with_rollback_threshold("error_rate", 0.1)
    }

    mod crud {
        use super::*;

        #[test]
        fn test_create_and_get() {
            let (service, _) = service();
            let id = service.create_experiment(experiment()).unwrap();

            let stored = service.get_experiment(&id).unwrap().unwrap();
            assert_eq!(stored.name(), "Prompt rewrite");
            assert_eq!(stored.status(), ExperimentStatus::Draft);
            assert_eq!(service.list_experiments().unwrap().len(), 1);
            assert!(service.list_active_experiments().unwrap().is_empty());
        }

        #[test]
        fn test_unknown_experiment() {
            let (service, _) = service();
            let id = ExperimentId::new("exp_missing");

            assert!(service.get_experiment(&id).unwrap().is_none());
            assert!(service.get_experiment_results(&id).unwrap().is_none());
            assert!(service.start_experiment(&id).unwrap_err().is_not_found());
            assert!(service.check_for_alerts(&id).unwrap_err().is_not_found());
        }
    }

    mod analysis {
        use super::*;

        #[test]
        fn test_compare_variants() {
            let (service, collector) = service();
            let id = service.create_experiment(experiment()).unwrap();
            service.start_experiment(&id).unwrap();

            for value in [10.0, 12.0, 11.0, 13.0, 9.0] {
                collector.record_sample(&id, "control", "quality", value).unwrap();
            }
            for value in [15.0, 16.0, 14.0, 17.0, 13.0] {
                collector.record_sample(&id, "treatment", "quality", value).unwrap();
            }

            let result = service.compare_variants(&id, "control", "treatment", None).unwrap();
            assert!(result.significant);
            assert!(result.effect_size > 0.0);

            assert!(service.is_experiment_significant(&id).unwrap());
            assert_eq!(
                service.get_winning_variant(&id).unwrap().as_deref(),
                Some("treatment")
            );
        }

        #[test]
        fn test_compare_unknown_variant() {
            let (service, _) = service();
            let id = service.create_experiment(experiment()).unwrap();

            let err = service.compare_variants(&id, "control", "missing", None).unwrap_err();
            assert!(err.is_not_found());
        }

        #[test]
        fn test_summary_uses_stored_results() {
            let (service, _) = service();
            let id = service.create_experiment(experiment()).unwrap();

            let summary = service.experiment_summary(&id).unwrap().unwrap();
            assert!(summary.get("results").is_none());

            service.get_experiment_results(&id).unwrap();
            let summary = service.experiment_summary(&id).unwrap().unwrap();
            assert!(summary.get("results").is_some());
        }
    }

    mod alerts {
        use super::*;

        #[test]
        fn test_check_for_alerts_records_without_acting() {
            let (service, collector) = service();
            let id = service.create_experiment(experiment()).unwrap();
            service.start_experiment(&id).unwrap();
            collector.record_sample(&id, "treatment", "error_rate", 0.12).unwrap();

            let alerts = service.check_for_alerts(&id).unwrap();

            assert_eq!(alerts.len(), 1);
            assert_eq!(alerts[0].severity, AlertSeverity::Error);
            assert_eq!(service.recent_alerts(5).len(), 1);
            assert_eq!(
                service.get_experiment(&id).unwrap().unwrap().status(),
                ExperimentStatus::Running
            );

            service.clear_alerts();
            assert!(service.recent_alerts(5).is_empty());
        }

        #[test]
        fn test_draft_has_no_alerts() {
            let (service, collector) = service();
            let id = service.create_experiment(experiment()).unwrap();
            collector.record_sample(&id, "treatment", "error_rate", 0.5).unwrap();

            assert!(service.check_for_alerts(&id).unwrap().is_empty());
        }
    }

    mod status {
        use super::*;

        #[test]
        fn test_status_counts() {
            let (service, _) = service();
            let running = service.create_experiment(experiment()).unwrap();
            let rolled_back = service.create_experiment(experiment()).unwrap();
            service.create_experiment(experiment()).unwrap();

            service.start_experiment(&running).unwrap();
            service.start_experiment(&rolled_back).unwrap();
            service.rollback_experiment(&rolled_back).unwrap();

            let status = service.get_status().unwrap();
            assert!(!status.monitoring_active);
            assert_eq!(status.total_experiments, 3);
            assert_eq!(status.draft_experiments, 1);
            assert_eq!(status.running_experiments, 1);
            assert_eq!(status.failed_experiments, 1);
            assert_eq!(status.recent_alert_count, 0);
        }

        #[test]
        fn test_monitoring_toggle() {
            let (service, _) = service();

            service.start_monitoring().unwrap();
            assert!(service.get_status().unwrap().monitoring_active);

            service.stop_monitoring();
            assert!(!service.get_status().unwrap().monitoring_active);
        }
    }
}
