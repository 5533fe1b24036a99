//! Derivation of experiment results from participation counts and metric samples

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::statistical::{bonferroni_correction, mean, std_dev, StatisticalAnalyzer};
use crate::domain::{Experiment, ExperimentResults, StatisticalTest, VariantResults};

/// Standardized effect size the sample-size check is designed to detect
pub const MIN_DETECTABLE_EFFECT: f64 = 0.2;

/// Allowed gap between configured and observed traffic share
pub const SAMPLE_RATIO_TOLERANCE: f64 = 0.05;

/// Samples keyed by variant name, then metric name
pub type VariantSamples = BTreeMap<String, BTreeMap<String, Vec<f64>>>;

/// Build the full results of one experiment
pub fn analyze_experiment(
    experiment: &Experiment,
    participants: &BTreeMap<String, u64>,
    samples: &VariantSamples,
    analyzer: &dyn StatisticalAnalyzer,
    now: DateTime<Utc>,
) -> ExperimentResults {
    let alpha = experiment.significance_level();
    let primary = experiment.primary_metric();
    let empty = BTreeMap::new();

    let mut results = ExperimentResults::new(experiment.id().clone(), experiment.status());
    results.analyzed_at = now;
    results.running_time_ms = experiment
        .started_at()
        .map(|started| (now - started).num_milliseconds().max(0) as u64)
        .unwrap_or(0);

    let control_samples: &[f64] = experiment
        .control_variant()
        .and_then(|control| samples.get(control.name()))
        .and_then(|metrics| metrics.get(primary))
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    for variant in experiment.variants() {
        let variant_samples = samples.get(variant.name()).unwrap_or(&empty);
        let mut summary = VariantResults::new(variant.name(), variant.is_control());
        summary.participants = participants.get(variant.name()).copied().unwrap_or(0);

        for metric in experiment.tracked_metrics() {
            let values = variant_samples.get(metric).map(Vec::as_slice).unwrap_or(&[]);

            if values.is_empty() {
                continue;
            }

            summary.metric_means.insert(metric.to_string(), mean(values));
            summary.metric_std_devs.insert(metric.to_string(), std_dev(values));
            summary
                .metric_sample_counts
                .insert(metric.to_string(), values.len() as u64);
        }

        let primary_values = variant_samples.get(primary).map(Vec::as_slice).unwrap_or(&[]);
        summary.sample_count = primary_values.len() as u64;
        summary.primary_metric_mean = mean(primary_values);
        summary.primary_metric_std_dev = std_dev(primary_values);

        if !variant.is_control() {
            summary.comparison = Some(analyzer.compare(
                experiment.test_type(),
                control_samples,
                primary_values,
                alpha,
            ));
        }

        results.total_participants += summary.participants;
        results.variants.push(summary);
    }

    apply_corrections(&mut results, alpha);
    pick_winner(&mut results, experiment, alpha);
    assess(&mut results, experiment, analyzer, now);

    results
}

fn apply_corrections(results: &mut ExperimentResults, alpha: f64) {
    let compared: Vec<(String, f64, f64)> = results
        .treatments()
        .filter_map(|v| {
            v.comparison
                .as_ref()
                .map(|c| (v.variant_name.clone(), c.p_value, c.power))
        })
        .collect();

    let raw: Vec<f64> = compared.iter().map(|(_, p, _)| *p).collect();
    let adjusted = bonferroni_correction(&raw);

    for ((name, _, _), p) in compared.iter().zip(&adjusted) {
        results.adjusted_p_values.insert(name.clone(), *p);
    }

    results.overall_p_value = adjusted.iter().copied().fold(1.0, f64::min);
    results.is_significant = results.overall_p_value < alpha;
    results.achieved_power = compared
        .iter()
        .map(|(_, _, power)| *power)
        .fold(0.0, f64::max);
}

fn pick_winner(results: &mut ExperimentResults, experiment: &Experiment, alpha: f64) {
    let goal = experiment.primary_metric_goal();

    let Some(control) = results.control() else {
        return;
    };
    let control_mean = control.primary_metric_mean;
    let control_name = control.variant_name.clone();

    let significant: Vec<(&str, f64)> = results
        .treatments()
        .filter(|v| {
            results
                .adjusted_p_values
                .get(&v.variant_name)
                .is_some_and(|p| *p < alpha)
        })
        .map(|v| (v.variant_name.as_str(), v.primary_metric_mean))
        .collect();

    let best = significant.iter().copied().reduce(|best, candidate| {
        if goal.improves(best.1, candidate.1) {
            candidate
        } else {
            best
        }
    });

    let winner = match best {
        Some((name, value)) if goal.improves(control_mean, value) => Some(name.to_string()),
        Some(_) => Some(control_name),
        None => None,
    };

    results.winning_variant = winner;
}

fn assess(
    results: &mut ExperimentResults,
    experiment: &Experiment,
    analyzer: &dyn StatisticalAnalyzer,
    now: DateTime<Utc>,
) {
    let required = analyzer.required_sample_size(
        MIN_DETECTABLE_EFFECT,
        experiment.significance_level(),
        experiment.statistical_power(),
        StatisticalTest::TTest,
    );

    results.has_sufficient_sample_size = !results.variants.is_empty()
        && results
            .variants
            .iter()
            .all(|v| v.sample_count as f64 >= required);

    if !results.has_sufficient_sample_size {
        results.concerns.push(format!(
            "Insufficient sample size: {:.0} samples per variant required",
            required.ceil()
        ));
    }

    if experiment.test_type() == StatisticalTest::ChiSquare {
        results.concerns.push(
            "Chi-square needs category counts; variants were compared with a t-test".to_string(),
        );
    }

    let sparse: Vec<String> = results
        .variants
        .iter()
        .filter(|v| v.sample_count < 2)
        .map(|v| {
            format!(
                "Variant '{}' has fewer than 2 samples of '{}'",
                v.variant_name,
                experiment.primary_metric()
            )
        })
        .collect();
    results.concerns.extend(sparse);

    if results.total_participants > 0 {
        for variant in experiment.variants() {
            let expected = variant.traffic_percentage() / 100.0;
            let observed = results
                .variant(variant.name())
                .map(|v| v.participants as f64 / results.total_participants as f64)
                .unwrap_or(0.0);

            if (expected - observed).abs() > SAMPLE_RATIO_TOLERANCE {
                results.concerns.push(format!(
                    "Sample ratio mismatch for '{}': expected {:.1}%, observed {:.1}%",
                    variant.name(),
                    expected * 100.0,
                    observed * 100.0
                ));
            }
        }
    }

    let mut rollback_reasons = Vec::new();
    let mut missed_targets = Vec::new();

    for variant in results.treatments() {
        for (metric, threshold) in experiment.rollback_thresholds() {
            if let Some(value) = variant.metric_mean(metric).filter(|v| v > threshold) {
                rollback_reasons.push(format!(
                    "Variant '{}' {} = {:.4} exceeds rollback threshold {:.4}",
                    variant.variant_name, metric, value, threshold
                ));
            }
        }

        for (metric, threshold) in experiment.success_thresholds() {
            if let Some(value) = variant.metric_mean(metric).filter(|v| v < threshold) {
                missed_targets.push(format!(
                    "Variant '{}' {} = {:.4} misses success threshold {:.4}",
                    variant.variant_name, metric, value, threshold
                ));
            }
        }
    }

    results.recommend_rollback = !rollback_reasons.is_empty();
    results.concerns.extend(missed_targets);
    results.concerns.extend(rollback_reasons);

    results.recommend_stop = experiment.is_past_planned_end(now)
        || (results.is_significant
            && results.has_sufficient_sample_size
            && experiment.has_met_minimum_run_time(now));

    let analyzable = results.variants.iter().filter(|v| v.sample_count >= 2).count();
    results.data_quality_score = if results.variants.is_empty() {
        0.0
    } else {
        analyzable as f64 / results.variants.len() as f64
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MetricGoal, TestVariant};
    use crate::infrastructure::experiment::statistical::NormalApproximationAnalyzer;

    fn experiment() -> Experiment {
        Experiment::new("Analysis", "conversion")
            .with_variant(TestVariant::control("control", 50.0))
            .with_variant(TestVariant::new("treatment", 50.0))
            .with_rollback_threshold("error_rate", 0.1)
    }

    fn samples(control: &[f64], treatment: &[f64]) -> VariantSamples {
        let mut samples = VariantSamples::new();
        samples
            .entry("control".to_string())
            .or_default()
            .insert("conversion".to_string(), control.to_vec());
        samples
            .entry("treatment".to_string())
            .or_default()
            .insert("conversion".to_string(), treatment.to_vec());
        samples
    }

    fn participants(control: u64, treatment: u64) -> BTreeMap<String, u64> {
        BTreeMap::from([
            ("control".to_string(), control),
            ("treatment".to_string(), treatment),
        ])
    }

    #[test]
    fn test_significant_improvement_wins() {
        let results = analyze_experiment(
            &experiment(),
            &participants(5, 5),
            &samples(&[10.0, 12.0, 11.0, 13.0, 9.0], &[15.0, 16.0, 14.0, 17.0, 13.0]),
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        assert_eq!(results.total_participants, 10);
        assert!(results.is_significant);
        assert_eq!(results.winning_variant.as_deref(), Some("treatment"));
        assert_eq!(results.variant("treatment").unwrap().primary_metric_mean, 15.0);
        assert!(results.variant("treatment").unwrap().comparison.is_some());
        assert!(results.control().unwrap().comparison.is_none());
        assert_eq!(results.data_quality_score, 1.0);
        assert!(!results.has_sufficient_sample_size);
    }

    #[test]
    fn test_decrease_goal_prefers_control() {
        let exp = experiment().with_primary_metric_goal(MetricGoal::Decrease);
        let results = analyze_experiment(
            &exp,
            &participants(5, 5),
            &samples(&[10.0, 12.0, 11.0, 13.0, 9.0], &[15.0, 16.0, 14.0, 17.0, 13.0]),
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        assert_eq!(results.winning_variant.as_deref(), Some("control"));
    }

    #[test]
    fn test_no_data() {
        let results = analyze_experiment(
            &experiment(),
            &BTreeMap::new(),
            &VariantSamples::new(),
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        assert_eq!(results.overall_p_value, 1.0);
        assert!(!results.is_significant);
        assert!(results.winning_variant.is_none());
        assert_eq!(results.data_quality_score, 0.0);
        assert!(!results.concerns.is_empty());
    }

    #[test]
    fn test_rollback_threshold_breach_is_flagged() {
        let mut data = samples(&[1.0, 2.0], &[1.0, 2.0]);
        data.get_mut("treatment")
            .unwrap()
            .insert("error_rate".to_string(), vec![0.4, 0.6]);

        let results = analyze_experiment(
            &experiment(),
            &participants(1, 1),
            &data,
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        assert!(results.recommend_rollback);
        let treatment = results.variant("treatment").unwrap();
        assert_eq!(treatment.metric_mean("error_rate"), Some(0.5));
        assert_eq!(treatment.metric_samples("error_rate"), 2);
    }

    #[test]
    fn test_chi_square_experiment_reports_t_test_substitution() {
        let exp = experiment().with_test_type(StatisticalTest::ChiSquare);
        let results = analyze_experiment(
            &exp,
            &participants(5, 5),
            &samples(&[10.0, 12.0, 11.0, 13.0, 9.0], &[15.0, 16.0, 14.0, 17.0, 13.0]),
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        let comparison = results
            .variant("treatment")
            .unwrap()
            .comparison
            .as_ref()
            .unwrap();
        assert_eq!(comparison.test_type, StatisticalTest::TTest);
        assert!(results
            .concerns
            .iter()
            .any(|c| c.starts_with("Chi-square needs category counts")));
    }

    #[test]
    fn test_sample_ratio_mismatch() {
        let results = analyze_experiment(
            &experiment(),
            &participants(90, 10),
            &VariantSamples::new(),
            &NormalApproximationAnalyzer,
            Utc::now(),
        );

        assert!(results
            .concerns
            .iter()
            .any(|c| c.starts_with("Sample ratio mismatch")));
    }
}
