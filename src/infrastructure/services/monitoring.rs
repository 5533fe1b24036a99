//! Background monitoring of running experiments
//!
//! One worker thread runs a cycle of four passes every update interval:
//! threshold alerts, results refresh, sustained-breach rollback and cleanup
//! of finished experiments. Each pass is isolated, and within a pass each
//! experiment is isolated, so one failure never stops the rest or the worker.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, info_span, warn};

use crate::config::ExperimentsConfig;
use crate::domain::serde_utils::{earlier_by, to_time_delta};
use crate::domain::{
    AlertSeverity, DomainError, Experiment, ExperimentId, ExperimentResults, ExperimentStatus,
    FrameworkAlert, MetricQuery, MetricsCollector, TimeWindow,
};
use crate::infrastructure::experiment::{
    analyze_experiment, mean, AlertLog, ExperimentRegistry, StatisticalAnalyzer, VariantSamples,
};
use crate::infrastructure::observability::{
    record_alert, record_automatic_action, record_monitor_cycle, record_status_counts,
};
use crate::infrastructure::sync::lock_or_recover;

/// Monitoring loop settings
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub update_interval: Duration,
    /// Replaces every experiment's own rollback check interval when set
    pub rollback_check_interval: Option<Duration>,
    pub cleanup_delay: Duration,
    pub enable_auto_rollback: bool,
    pub auto_pause_on_alert: bool,
    pub min_samples_for_rollback: usize,
    pub warning_ratio: f64,
    pub critical_ratio: f64,
}

impl From<&ExperimentsConfig> for MonitorSettings {
    fn from(config: &ExperimentsConfig) -> Self {
        Self {
            update_interval: config.update_interval(),
            rollback_check_interval: config.rollback_check_interval(),
            cleanup_delay: config.cleanup_delay(),
            enable_auto_rollback: config.enable_auto_rollback,
            auto_pause_on_alert: config.auto_pause_on_alert,
            min_samples_for_rollback: config.min_samples_for_rollback.max(1),
            warning_ratio: config.warning_ratio,
            critical_ratio: config.critical_ratio,
        }
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&ExperimentsConfig::default())
    }
}

/// What one monitoring cycle did
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub alerts_raised: usize,
    pub rolled_back: Vec<ExperimentId>,
    pub paused: Vec<ExperimentId>,
    pub completed: Vec<ExperimentId>,
    pub results_updated: usize,
    pub cleaned_up: Vec<ExperimentId>,
    pub errors: usize,
}

struct MonitorCore {
    registry: Arc<ExperimentRegistry>,
    collector: Arc<dyn MetricsCollector>,
    analyzer: Arc<dyn StatisticalAnalyzer>,
    alerts: Arc<AlertLog>,
    settings: MonitorSettings,
    last_rollback_check: Mutex<HashMap<ExperimentId, DateTime<Utc>>>,
}

struct Worker {
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

/// Periodic monitor that raises alerts and applies automatic rollback
pub struct MonitoringLoop {
    core: Arc<MonitorCore>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for MonitoringLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitoringLoop")
            .field("settings", &self.core.settings)
            .field("active", &self.is_active())
            .finish()
    }
}

impl MonitoringLoop {
    pub fn new(
        registry: Arc<ExperimentRegistry>,
        collector: Arc<dyn MetricsCollector>,
        analyzer: Arc<dyn StatisticalAnalyzer>,
        alerts: Arc<AlertLog>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            core: Arc::new(MonitorCore {
                registry,
                collector,
                analyzer,
                alerts,
                settings,
                last_rollback_check: Mutex::new(HashMap::new()),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.core.settings
    }

    /// Spawn the worker thread; does nothing if it is already running
    pub fn start(&self) -> Result<(), DomainError> {
        let mut worker = lock_or_recover(&self.worker);

        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            debug!("Monitoring loop already running");
            return Ok(());
        }

        if let Some(finished) = worker.take() {
            if finished.handle.join().is_err() {
                error!("Previous monitoring thread panicked");
            }
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let core = Arc::clone(&self.core);
        let interval = core.settings.update_interval;

        let handle = thread::Builder::new()
            .name("experiment-monitor".to_string())
            .spawn(move || run_worker(&core, &stop_rx, interval))
            .map_err(|e| DomainError::internal(format!("Failed to spawn monitoring thread: {}", e)))?;

        *worker = Some(Worker { stop_tx, handle });
        info!(interval_ms = interval.as_millis() as u64, "Monitoring loop started");

        Ok(())
    }

    /// Signal the worker and wait for it to exit; does nothing if not running
    pub fn stop(&self) {
        let Some(worker) = lock_or_recover(&self.worker).take() else {
            return;
        };

        // A worker that already exited has dropped its receiver
        let _ = worker.stop_tx.send(());

        if worker.handle.join().is_err() {
            error!("Monitoring thread panicked");
        }

        info!("Monitoring loop stopped");
    }

    pub fn is_active(&self) -> bool {
        lock_or_recover(&self.worker)
            .as_ref()
            .is_some_and(|w| !w.handle.is_finished())
    }

    /// Run one full cycle on the calling thread
    pub fn run_cycle(&self) -> CycleReport {
        self.core.run_cycle()
    }

    /// Current threshold alerts for one experiment, without acting on them
    pub fn evaluate_alerts(&self, experiment: &Experiment) -> Result<Vec<FrameworkAlert>, DomainError> {
        self.core.evaluate_alerts(experiment, Utc::now())
    }

    /// Compute results for one experiment from the collector's samples
    pub fn compute_results(&self, experiment: &Experiment) -> Result<ExperimentResults, DomainError> {
        self.core.compute_results(experiment, Utc::now())
    }

    /// Samples of one metric per variant since the experiment started
    pub fn collect_samples(
        &self,
        experiment: &Experiment,
        metrics: &[&str],
    ) -> Result<VariantSamples, DomainError> {
        let window = self.core.analysis_window(experiment, Utc::now());
        self.core.collect_samples(experiment, metrics, window)
    }
}

impl Drop for MonitoringLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(core: &MonitorCore, stop_rx: &mpsc::Receiver<()>, interval: Duration) {
    loop {
        core.run_cycle();

        match stop_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn isolate<F>(pass: &'static str, report: &mut CycleReport, run: F)
where
    F: FnOnce(&mut CycleReport) -> Result<(), DomainError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| run(report))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            report.errors += 1;
            warn!(pass, error = %e, "Monitoring pass failed");
        }
        Err(_) => {
            report.errors += 1;
            error!(pass, "Monitoring pass panicked");
        }
    }
}

/// Run one experiment's share of a pass so its failure leaves the others untouched
fn isolate_experiment<F>(
    pass: &'static str,
    experiment_id: &ExperimentId,
    report: &mut CycleReport,
    run: F,
) where
    F: FnOnce(&mut CycleReport) -> Result<(), DomainError>,
{
    match panic::catch_unwind(AssertUnwindSafe(|| run(report))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            report.errors += 1;
            warn!(pass, experiment_id = %experiment_id, error = %e, "Experiment check failed");
        }
        Err(_) => {
            report.errors += 1;
            error!(pass, experiment_id = %experiment_id, "Experiment check panicked");
        }
    }
}

impl MonitorCore {
    fn run_cycle(&self) -> CycleReport {
        let _span = info_span!("monitor_cycle").entered();
        let started = Instant::now();
        let now = Utc::now();
        let mut report = CycleReport::default();

        isolate("alerts", &mut report, |r| self.alert_pass(now, r));
        isolate("results", &mut report, |r| self.results_pass(now, r));
        isolate("rollback", &mut report, |r| self.rollback_pass(now, r));
        isolate("cleanup", &mut report, |r| self.cleanup_pass(now, r));

        if let Ok(counts) = self.registry.status_counts() {
            record_status_counts(&counts);
        }
        record_monitor_cycle(started.elapsed(), report.errors);

        debug!(
            alerts = report.alerts_raised,
            rolled_back = report.rolled_back.len(),
            results = report.results_updated,
            cleaned_up = report.cleaned_up.len(),
            errors = report.errors,
            "Monitoring cycle finished"
        );

        report
    }

    fn alert_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), DomainError> {
        for experiment in self.registry.list_active()? {
            isolate_experiment("alerts", experiment.id(), report, |r| {
                self.check_thresholds(&experiment, now, r)
            });
        }

        Ok(())
    }

    fn results_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), DomainError> {
        for experiment in self.registry.list_active()? {
            isolate_experiment("results", experiment.id(), report, |r| {
                self.refresh_results(&experiment, now, r)
            });
        }

        Ok(())
    }

    fn rollback_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), DomainError> {
        for experiment in self.registry.list_active()? {
            isolate_experiment("rollback", experiment.id(), report, |r| {
                self.check_sustained_breaches(&experiment, now, r)
            });
        }

        Ok(())
    }

    fn check_thresholds(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), DomainError> {
        if !experiment.is_past_grace_period(now) {
            return Ok(());
        }

        let alerts = self.evaluate_alerts(experiment, now)?;
        self.handle_alerts(experiment, alerts, report);
        Ok(())
    }

    fn refresh_results(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), DomainError> {
        let id = experiment.id();
        let mut results = self.compute_results(experiment, now)?;

        if experiment.is_past_planned_end(now) {
            match self.registry.stop(id) {
                Ok(_) => {
                    info!(experiment_id = %id, "Experiment reached its planned end");
                    results.status = ExperimentStatus::Completed;
                    report.completed.push(id.clone());
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(experiment_id = %id, error = %e, "Failed to complete expired experiment");
                }
            }
        }

        match self.registry.store_results(results) {
            Ok(()) => report.results_updated += 1,
            Err(e) if e.is_not_found() => {
                debug!(experiment_id = %id, "Experiment deleted before its results were stored");
            }
            Err(e) => return Err(e),
        }

        Ok(())
    }

    fn check_sustained_breaches(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<(), DomainError> {
        if !experiment.is_past_grace_period(now) || !self.rollback_check_due(experiment, now) {
            return Ok(());
        }

        let Some(results) = self.registry.results(experiment.id())? else {
            return Ok(());
        };

        let alerts = self.sustained_breaches(experiment, &results);
        self.handle_alerts(experiment, alerts, report);
        Ok(())
    }

    fn cleanup_pass(&self, now: DateTime<Utc>, report: &mut CycleReport) -> Result<(), DomainError> {
        let cutoff = earlier_by(now, self.settings.cleanup_delay);

        for id in self.registry.finished_before(cutoff)? {
            match self.registry.delete(&id) {
                Ok(()) => {
                    info!(experiment_id = %id, "Cleaned up finished experiment");
                    report.cleaned_up.push(id);
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(experiment_id = %id, error = %e, "Failed to clean up experiment");
                }
            }
        }

        let running: Vec<ExperimentId> = self
            .registry
            .list_active()?
            .iter()
            .map(|e| e.id().clone())
            .collect();
        lock_or_recover(&self.last_rollback_check).retain(|id, _| running.contains(id));

        Ok(())
    }

    fn evaluate_alerts(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
    ) -> Result<Vec<FrameworkAlert>, DomainError> {
        let window = TimeWindow::trailing(now, to_time_delta(self.check_interval(experiment)));
        let mut alerts = Vec::new();

        for variant in experiment.variants().iter().filter(|v| !v.is_control()) {
            for (metric, threshold) in sorted_thresholds(experiment) {
                let samples = self.collector.query_metric(&MetricQuery::new(
                    experiment.id().clone(),
                    variant.name(),
                    metric,
                    window,
                ))?;

                if samples.len() < self.settings.min_samples_for_rollback {
                    continue;
                }

                let value = mean(&samples);

                if let Some(severity) = self.grade(value, threshold) {
                    alerts.push(FrameworkAlert::threshold_breach(
                        severity,
                        experiment.id().clone(),
                        variant.name(),
                        metric,
                        value,
                        threshold,
                    ));
                }
            }
        }

        Ok(alerts)
    }

    fn sustained_breaches(
        &self,
        experiment: &Experiment,
        results: &ExperimentResults,
    ) -> Vec<FrameworkAlert> {
        let mut alerts = Vec::new();

        for variant in results.treatments() {
            for (metric, threshold) in sorted_thresholds(experiment) {
                if variant.metric_samples(metric) < self.settings.min_samples_for_rollback as u64 {
                    continue;
                }

                let Some(value) = variant.metric_mean(metric) else {
                    continue;
                };

                if let Some(severity) = self.grade(value, threshold) {
                    alerts.push(FrameworkAlert::threshold_breach(
                        severity,
                        experiment.id().clone(),
                        variant.variant_name.as_str(),
                        metric,
                        value,
                        threshold,
                    ));
                }
            }
        }

        alerts
    }

    fn compute_results(
        &self,
        experiment: &Experiment,
        now: DateTime<Utc>,
    ) -> Result<ExperimentResults, DomainError> {
        let window = self.analysis_window(experiment, now);
        let samples = self.collect_samples(experiment, &experiment.tracked_metrics(), window)?;
        let participants = self.registry.participant_counts(experiment.id())?;

        Ok(analyze_experiment(
            experiment,
            &participants,
            &samples,
            self.analyzer.as_ref(),
            now,
        ))
    }

    fn collect_samples(
        &self,
        experiment: &Experiment,
        metrics: &[&str],
        window: TimeWindow,
    ) -> Result<VariantSamples, DomainError> {
        let mut samples = VariantSamples::new();

        for variant in experiment.variants() {
            let per_metric = samples.entry(variant.name().to_string()).or_default();

            for metric in metrics {
                let values = self.collector.query_metric(&MetricQuery::new(
                    experiment.id().clone(),
                    variant.name(),
                    *metric,
                    window,
                ))?;
                per_metric.insert(metric.to_string(), values);
            }
        }

        Ok(samples)
    }

    fn analysis_window(&self, experiment: &Experiment, now: DateTime<Utc>) -> TimeWindow {
        let start = experiment.started_at().unwrap_or_else(|| experiment.created_at());
        let end = experiment.ended_at().unwrap_or(now);
        TimeWindow::new(start.min(end), end)
    }

    fn handle_alerts(
        &self,
        experiment: &Experiment,
        alerts: Vec<FrameworkAlert>,
        report: &mut CycleReport,
    ) {
        let mut reason = None;

        for alert in alerts {
            if reason.is_none() && alert.severity.is_actionable() {
                reason = Some(alert.message.clone());
            }

            let severity = alert.severity;
            if self.alerts.record(alert) {
                record_alert(experiment.id(), severity);
                report.alerts_raised += 1;
            }
        }

        if let Some(reason) = reason {
            self.react(experiment, &reason, report);
        }
    }

    fn react(&self, experiment: &Experiment, reason: &str, report: &mut CycleReport) {
        let id = experiment.id();

        if experiment.auto_rollback_enabled() && self.settings.enable_auto_rollback {
            match self.registry.rollback(id) {
                Ok(_) => {
                    warn!(experiment_id = %id, reason, "Experiment rolled back automatically");
                    record_automatic_action(id, "rollback");
                    lock_or_recover(&self.last_rollback_check).remove(id);
                    report.rolled_back.push(id.clone());
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(experiment_id = %id, error = %e, "Automatic rollback failed");
                }
            }
        } else if self.settings.auto_pause_on_alert {
            match self.registry.pause(id) {
                Ok(_) => {
                    warn!(experiment_id = %id, reason, "Experiment paused automatically");
                    record_automatic_action(id, "pause");
                    report.paused.push(id.clone());
                }
                Err(e) => {
                    report.errors += 1;
                    warn!(experiment_id = %id, error = %e, "Automatic pause failed");
                }
            }
        } else {
            debug!(experiment_id = %id, reason, "Automatic action disabled for alert");
        }
    }

    fn rollback_check_due(&self, experiment: &Experiment, now: DateTime<Utc>) -> bool {
        let interval = to_time_delta(self.check_interval(experiment));
        let mut checks = lock_or_recover(&self.last_rollback_check);

        match checks.get(experiment.id()) {
            Some(last) if now - *last < interval => false,
            _ => {
                checks.insert(experiment.id().clone(), now);
                true
            }
        }
    }

    fn check_interval(&self, experiment: &Experiment) -> Duration {
        self.settings
            .rollback_check_interval
            .unwrap_or_else(|| experiment.rollback_check_interval())
    }

    fn grade(&self, value: f64, threshold: f64) -> Option<AlertSeverity> {
        AlertSeverity::grade(
            value,
            threshold,
            self.settings.warning_ratio,
            self.settings.critical_ratio,
        )
    }
}

fn sorted_thresholds(experiment: &Experiment) -> Vec<(&str, f64)> {
    let mut thresholds: Vec<(&str, f64)> = experiment
        .rollback_thresholds()
        .iter()
        .map(|(metric, threshold)| (metric.as_str(), *threshold))
        .collect();
    thresholds.sort_by(|a, b| a.0.cmp(b.0));
    thresholds
}
