//! Statistical analysis functions for A/B testing
//!
//! Closed-form hypothesis tests and power/sample-size math. Tail probabilities
//! use the standard normal approximation throughout; exact Student's t and
//! chi-square distributions can be substituted by another
//! `StatisticalAnalyzer` implementation without touching callers.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::{StatisticalTest, TestResult};

/// Minimum per-group sample size for the z-test
pub const Z_TEST_MIN_SAMPLES: usize = 30;

/// Sample size returned for test types without a closed-form formula
pub const DEFAULT_SAMPLE_SIZE: f64 = 100.0;

const Z_95: f64 = 1.96;

/// Sufficient statistics of one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub mean: f64,
    pub variance: f64,
    pub n: usize,
}

impl SampleSummary {
    pub fn new(mean: f64, variance: f64, n: usize) -> Self {
        Self { mean, variance, n }
    }

    pub fn from_values(values: &[f64]) -> Self {
        Self {
            mean: mean(values),
            variance: variance(values),
            n: values.len(),
        }
    }
}

/// Hypothesis testing and design-time power analysis
pub trait StatisticalAnalyzer: Send + Sync {
    /// Two-sample pooled-variance t-test
    fn t_test(&self, control: &[f64], variant: &[f64], alpha: f64) -> TestResult;

    /// Two-sample z-test on summary statistics
    fn z_test(&self, control: SampleSummary, variant: SampleSummary, alpha: f64) -> TestResult;

    /// Chi-square test of independence on a 2 x k table of category counts
    fn chi_square_test(&self, control_counts: &[u64], variant_counts: &[u64], alpha: f64)
        -> TestResult;

    /// Mann-Whitney U rank-sum test
    fn mann_whitney_test(&self, control: &[f64], variant: &[f64], alpha: f64) -> TestResult;

    /// Two-sample Kolmogorov-Smirnov test
    fn kolmogorov_smirnov_test(&self, control: &[f64], variant: &[f64], alpha: f64)
        -> TestResult;

    /// Per-group sample size needed to detect `effect_size`
    fn required_sample_size(
        &self,
        effect_size: f64,
        alpha: f64,
        power: f64,
        test_type: StatisticalTest,
    ) -> f64;

    /// Power achieved by the smaller of the two samples for `effect_size`
    fn achieved_power(&self, control: &[f64], variant: &[f64], effect_size: f64, alpha: f64)
        -> f64;

    /// Pooled-standard-deviation effect size
    fn cohens_d(&self, control: &[f64], variant: &[f64]) -> f64;

    /// Compare raw samples with the requested test
    ///
    /// Chi-square needs category counts rather than raw values, so sample
    /// comparisons requested as chi-square run the t-test instead.
    fn compare(
        &self,
        test_type: StatisticalTest,
        control: &[f64],
        variant: &[f64],
        alpha: f64,
    ) -> TestResult {
        match test_type {
            StatisticalTest::TTest => self.t_test(control, variant, alpha),
            StatisticalTest::ChiSquare => {
                debug!("Chi-square requested for raw samples; running t-test");
                self.t_test(control, variant, alpha)
            }
            StatisticalTest::ZTest => self.z_test(
                SampleSummary::from_values(control),
                SampleSummary::from_values(variant),
                alpha,
            ),
            StatisticalTest::MannWhitney => self.mann_whitney_test(control, variant, alpha),
            StatisticalTest::KolmogorovSmirnov => {
                self.kolmogorov_smirnov_test(control, variant, alpha)
            }
        }
    }
}

/// Default analyzer using normal-approximation tail probabilities
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalApproximationAnalyzer;

impl StatisticalAnalyzer for NormalApproximationAnalyzer {
    fn t_test(&self, control: &[f64], variant: &[f64], alpha: f64) -> TestResult {
        if control.len() < 2 || variant.len() < 2 {
            return TestResult::insufficient(
                StatisticalTest::TTest,
                "Two-sample t-test needs at least 2 observations per group",
            );
        }

        let n1 = control.len() as f64;
        let n2 = variant.len() as f64;
        let mean1 = mean(control);
        let mean2 = mean(variant);

        let pooled_variance = pooled_variance(control, variant);

        if pooled_variance <= 0.0 {
            return TestResult::insufficient(
                StatisticalTest::TTest,
                "Two-sample t-test is undefined for zero variance",
            );
        }

        let standard_error = (pooled_variance * (1.0 / n1 + 1.0 / n2)).sqrt();
        let t = (mean2 - mean1) / standard_error;
        let p_value = two_sided_p_value(t);
        let effect_size = effect_size_from_means(mean1, mean2, pooled_variance.sqrt());
        let power = self.achieved_power(control, variant, effect_size, alpha);
        let significant = is_statistically_significant(p_value, alpha);

        TestResult {
            test_type: StatisticalTest::TTest,
            test_statistic: t,
            p_value,
            confidence_interval_lower: mean2 - Z_95 * standard_error,
            confidence_interval_upper: mean2 + Z_95 * standard_error,
            effect_size,
            power,
            significant,
            interpretation: interpret("Two-sample t-test", p_value, alpha, effect_size),
        }
    }

    fn z_test(&self, control: SampleSummary, variant: SampleSummary, alpha: f64) -> TestResult {
        if control.n < Z_TEST_MIN_SAMPLES || variant.n < Z_TEST_MIN_SAMPLES {
            return TestResult::insufficient(
                StatisticalTest::ZTest,
                "Two-sample z-test needs at least 30 observations per group",
            );
        }

        let standard_error =
            (control.variance / control.n as f64 + variant.variance / variant.n as f64).sqrt();

        if standard_error <= 0.0 {
            return TestResult::insufficient(
                StatisticalTest::ZTest,
                "Two-sample z-test is undefined for zero variance",
            );
        }

        let z = (variant.mean - control.mean) / standard_error;
        let p_value = two_sided_p_value(z);
        let pooled_sd = ((control.variance + variant.variance) / 2.0).sqrt();
        let effect_size = effect_size_from_means(control.mean, variant.mean, pooled_sd);
        let power = power_for(effect_size, control.n.min(variant.n), alpha);

        TestResult {
            test_type: StatisticalTest::ZTest,
            test_statistic: z,
            p_value,
            confidence_interval_lower: variant.mean - Z_95 * standard_error,
            confidence_interval_upper: variant.mean + Z_95 * standard_error,
            effect_size,
            power,
            significant: is_statistically_significant(p_value, alpha),
            interpretation: interpret("Two-sample z-test", p_value, alpha, effect_size),
        }
    }

    fn chi_square_test(
        &self,
        control_counts: &[u64],
        variant_counts: &[u64],
        alpha: f64,
    ) -> TestResult {
        if control_counts.is_empty() || control_counts.len() != variant_counts.len() {
            return TestResult::insufficient(
                StatisticalTest::ChiSquare,
                "Chi-square test needs two non-empty count vectors of equal length",
            );
        }

        let control_total: u64 = control_counts.iter().sum();
        let variant_total: u64 = variant_counts.iter().sum();
        let grand_total = (control_total + variant_total) as f64;

        if grand_total == 0.0 {
            return TestResult::insufficient(
                StatisticalTest::ChiSquare,
                "Chi-square test needs at least one observation",
            );
        }

        let mut chi_square = 0.0;

        for (&observed_control, &observed_variant) in control_counts.iter().zip(variant_counts) {
            let category_total = (observed_control + observed_variant) as f64;

            for (observed, group_total) in [
                (observed_control, control_total),
                (observed_variant, variant_total),
            ] {
                let expected = category_total * group_total as f64 / grand_total;

                if expected > 0.0 {
                    chi_square += (observed as f64 - expected).powi(2) / expected;
                }
            }
        }

        let p_value = 1.0 - normal_cdf(chi_square);
        // Cramér's V for a 2 x k table
        let effect_size = (chi_square / grand_total).sqrt();

        TestResult {
            test_type: StatisticalTest::ChiSquare,
            test_statistic: chi_square,
            p_value,
            confidence_interval_lower: 0.0,
            confidence_interval_upper: 0.0,
            effect_size,
            power: 0.0,
            significant: is_statistically_significant(p_value, alpha),
            interpretation: interpret("Chi-square test", p_value, alpha, effect_size),
        }
    }

    fn mann_whitney_test(&self, control: &[f64], variant: &[f64], alpha: f64) -> TestResult {
        if control.len() < 2 || variant.len() < 2 {
            return TestResult::insufficient(
                StatisticalTest::MannWhitney,
                "Mann-Whitney U test needs at least 2 observations per group",
            );
        }

        let n1 = control.len() as f64;
        let n2 = variant.len() as f64;
        let n = n1 + n2;

        let mut pooled: Vec<(f64, bool)> = control
            .iter()
            .map(|&v| (v, false))
            .chain(variant.iter().map(|&v| (v, true)))
            .collect();
        pooled.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

        let mut variant_rank_sum = 0.0;
        let mut tie_term = 0.0;
        let mut i = 0;

        while i < pooled.len() {
            let mut j = i;
            while j + 1 < pooled.len() && pooled[j + 1].0 == pooled[i].0 {
                j += 1;
            }

            // Ranks are 1-based; tied values share the average rank
            let average_rank = (i + j) as f64 / 2.0 + 1.0;
            let ties = (j - i + 1) as f64;
            tie_term += ties.powi(3) - ties;

            variant_rank_sum += pooled[i..=j]
                .iter()
                .filter(|(_, is_variant)| *is_variant)
                .count() as f64
                * average_rank;

            i = j + 1;
        }

        let u_variant = variant_rank_sum - n2 * (n2 + 1.0) / 2.0;
        let expected_u = n1 * n2 / 2.0;
        let sigma = (n1 * n2 / 12.0 * ((n + 1.0) - tie_term / (n * (n - 1.0)))).sqrt();

        if sigma <= 0.0 {
            return TestResult::insufficient(
                StatisticalTest::MannWhitney,
                "Mann-Whitney U test is undefined when every value is tied",
            );
        }

        let z = (u_variant - expected_u) / sigma;
        let p_value = two_sided_p_value(z);
        // Rank-biserial correlation, equal to Cliff's delta
        let effect_size = 2.0 * u_variant / (n1 * n2) - 1.0;

        TestResult {
            test_type: StatisticalTest::MannWhitney,
            test_statistic: u_variant,
            p_value,
            confidence_interval_lower: 0.0,
            confidence_interval_upper: 0.0,
            effect_size,
            power: 0.0,
            significant: is_statistically_significant(p_value, alpha),
            interpretation: interpret("Mann-Whitney U test", p_value, alpha, effect_size),
        }
    }

    fn kolmogorov_smirnov_test(&self, control: &[f64], variant: &[f64], alpha: f64) -> TestResult {
        if control.is_empty() || variant.is_empty() {
            return TestResult::insufficient(
                StatisticalTest::KolmogorovSmirnov,
                "Kolmogorov-Smirnov test needs observations in both groups",
            );
        }

        let mut a = control.to_vec();
        let mut b = variant.to_vec();
        a.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));
        b.sort_by(|x, y| x.partial_cmp(y).unwrap_or(Ordering::Equal));

        let n1 = a.len() as f64;
        let n2 = b.len() as f64;
        let (mut i, mut j) = (0usize, 0usize);
        let mut d: f64 = 0.0;

        while i < a.len() && j < b.len() {
            let value = a[i].min(b[j]);
            while i < a.len() && a[i] <= value {
                i += 1;
            }
            while j < b.len() && b[j] <= value {
                j += 1;
            }
            d = d.max((i as f64 / n1 - j as f64 / n2).abs());
        }

        let en = (n1 * n2 / (n1 + n2)).sqrt();
        let p_value = kolmogorov_survival((en + 0.12 + 0.11 / en) * d);

        TestResult {
            test_type: StatisticalTest::KolmogorovSmirnov,
            test_statistic: d,
            p_value,
            confidence_interval_lower: 0.0,
            confidence_interval_upper: 0.0,
            effect_size: d,
            power: 0.0,
            significant: is_statistically_significant(p_value, alpha),
            interpretation: interpret("Kolmogorov-Smirnov test", p_value, alpha, d),
        }
    }

    fn required_sample_size(
        &self,
        effect_size: f64,
        alpha: f64,
        power: f64,
        test_type: StatisticalTest,
    ) -> f64 {
        match test_type {
            StatisticalTest::TTest => {
                if effect_size == 0.0 {
                    return f64::INFINITY;
                }

                let z_alpha = inverse_normal_cdf(1.0 - alpha / 2.0);
                let z_beta = inverse_normal_cdf(power);
                2.0 * (z_alpha + z_beta).powi(2) / (effect_size * effect_size)
            }
            _ => DEFAULT_SAMPLE_SIZE,
        }
    }

    fn achieved_power(&self, control: &[f64], variant: &[f64], effect_size: f64, alpha: f64) -> f64 {
        power_for(effect_size, control.len().min(variant.len()), alpha)
    }

    fn cohens_d(&self, control: &[f64], variant: &[f64]) -> f64 {
        if control.is_empty() || variant.is_empty() {
            return 0.0;
        }

        let pooled_sd = pooled_variance(control, variant).sqrt();
        effect_size_from_means(mean(control), mean(variant), pooled_sd)
    }
}

/// Calculate mean of a sample
pub fn mean(sample: &[f64]) -> f64 {
    if sample.is_empty() {
        return 0.0;
    }
    sample.iter().sum::<f64>() / sample.len() as f64
}

/// Calculate variance of a sample (sample variance, n-1 denominator)
pub fn variance(sample: &[f64]) -> f64 {
    if sample.len() < 2 {
        return 0.0;
    }

    let m = mean(sample);
    let n = sample.len() as f64;
    sample.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1.0)
}

/// Calculate standard deviation of a sample
pub fn std_dev(sample: &[f64]) -> f64 {
    variance(sample).sqrt()
}

/// `(variant_mean - control_mean) / pooled_sd`, zero when the spread is zero
pub fn effect_size_from_means(control_mean: f64, variant_mean: f64, pooled_sd: f64) -> f64 {
    if pooled_sd > 0.0 {
        (variant_mean - control_mean) / pooled_sd
    } else {
        0.0
    }
}

pub fn is_statistically_significant(p_value: f64, alpha: f64) -> bool {
    p_value < alpha
}

/// Probability that a random variant value exceeds a random control value,
/// minus the reverse, in [-1, 1]
pub fn cliffs_delta(control: &[f64], variant: &[f64]) -> f64 {
    if control.is_empty() || variant.is_empty() {
        return 0.0;
    }

    let mut dominance: i64 = 0;

    for v in variant {
        for c in control {
            match v.partial_cmp(c) {
                Some(Ordering::Greater) => dominance += 1,
                Some(Ordering::Less) => dominance -= 1,
                _ => {}
            }
        }
    }

    dominance as f64 / (control.len() * variant.len()) as f64
}

/// Bonferroni-adjusted p-values, capped at 1
pub fn bonferroni_correction(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len() as f64;
    p_values.iter().map(|p| (p * m).min(1.0)).collect()
}

/// Benjamini-Hochberg adjusted p-values, in input order
pub fn false_discovery_rate_correction(p_values: &[f64]) -> Vec<f64> {
    let m = p_values.len();
    let mut order: Vec<usize> = (0..m).collect();
    order.sort_by(|&a, &b| {
        p_values[a]
            .partial_cmp(&p_values[b])
            .unwrap_or(Ordering::Equal)
    });

    let mut adjusted = vec![1.0; m];
    let mut running_min: f64 = 1.0;

    for (rank, &index) in order.iter().enumerate().rev() {
        let candidate = p_values[index] * m as f64 / (rank + 1) as f64;
        running_min = running_min.min(candidate);
        adjusted[index] = running_min.min(1.0);
    }

    adjusted
}

/// Standard normal cumulative distribution function
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Inverse standard normal CDF (Beasley-Springer-Moro)
///
/// Returns 0 for `p` outside the open interval (0, 1).
pub fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 4] = [
        2.50662823884,
        -18.61500062529,
        41.39119773534,
        -25.44106049637,
    ];
    const B: [f64; 4] = [
        -8.47351093090,
        23.08336743743,
        -21.06224101826,
        3.13082909833,
    ];
    const C: [f64; 9] = [
        0.3374754822726147,
        0.9761690190917186,
        0.1607979714918209,
        0.0276438810333863,
        0.0038405729373609,
        0.0003951896511919,
        0.0000321767881768,
        0.0000002888167364,
        0.0000003960315187,
    ];

    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }

    let y = p - 0.5;

    if y.abs() < 0.42 {
        let r = y * y;
        return y * (((A[3] * r + A[2]) * r + A[1]) * r + A[0])
            / ((((B[3] * r + B[2]) * r + B[1]) * r + B[0]) * r + 1.0);
    }

    let tail = if y < 0.0 { p } else { 1.0 - p };
    let r = (-tail.ln()).ln();
    let x = C
        .iter()
        .rev()
        .fold(0.0, |acc, coefficient| acc * r + coefficient);

    if y < 0.0 { -x } else { x }
}

fn two_sided_p_value(statistic: f64) -> f64 {
    2.0 * (1.0 - normal_cdf(statistic.abs()))
}

fn power_for(effect_size: f64, n: usize, alpha: f64) -> f64 {
    let z_alpha = inverse_normal_cdf(1.0 - alpha / 2.0);
    normal_cdf(effect_size.abs() * (n as f64 / 2.0).sqrt() - z_alpha)
}

fn pooled_variance(control: &[f64], variant: &[f64]) -> f64 {
    let n1 = control.len() as f64;
    let n2 = variant.len() as f64;

    if n1 + n2 <= 2.0 {
        return 0.0;
    }

    ((n1 - 1.0) * variance(control) + (n2 - 1.0) * variance(variant)) / (n1 + n2 - 2.0)
}

/// Asymptotic Kolmogorov distribution survival function Q_KS(λ)
fn kolmogorov_survival(lambda: f64) -> f64 {
    const EPS1: f64 = 0.001;
    const EPS2: f64 = 1.0e-8;

    let a2 = -2.0 * lambda * lambda;
    let mut factor = 2.0;
    let mut sum = 0.0;
    let mut previous: f64 = 0.0;

    for j in 1..=100 {
        let term = factor * (a2 * (j * j) as f64).exp();
        sum += term;

        if term.abs() <= EPS1 * previous || term.abs() <= EPS2 * sum {
            return sum.clamp(0.0, 1.0);
        }

        factor = -factor;
        previous = term.abs();
    }

    // Series fails to converge only for very small λ
    1.0
}

fn interpret(test: &str, p_value: f64, alpha: f64, effect_size: f64) -> String {
    let magnitude = match effect_size.abs() {
        e if e < 0.2 => "negligible",
        e if e < 0.5 => "small",
        e if e < 0.8 => "medium",
        _ => "large",
    };

    if is_statistically_significant(p_value, alpha) {
        format!(
            "{}: significant at alpha={} (p={:.4}), {} effect",
            test, alpha, p_value, magnitude
        )
    } else {
        format!(
            "{}: not significant at alpha={} (p={:.4})",
            test, alpha, p_value
        )
    }
}

/// Error function approximation
///
/// Uses Horner's method for the polynomial approximation.
/// Accurate to about 1.5e-7.
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYZER: NormalApproximationAnalyzer = NormalApproximationAnalyzer;

    mod descriptive_tests {
        use super::*;

        #[test]
        fn test_mean() {
            assert_eq!(mean(&[1.0, 2.0, 3.0, 4.0, 5.0]), 3.0);
            assert_eq!(mean(&[]), 0.0);
            assert_eq!(mean(&[42.0]), 42.0);
        }

        #[test]
        fn test_variance() {
            let var = variance(&[1.0, 2.0, 3.0, 4.0, 5.0]);
            assert!((var - 2.5).abs() < 0.001);

            assert_eq!(variance(&[]), 0.0);
            assert_eq!(variance(&[42.0]), 0.0);
        }

        #[test]
        fn test_std_dev() {
            let sd = std_dev(&[1.0, 2.0, 3.0, 4.0, 5.0]);
            assert!((sd - 1.5811).abs() < 0.001);
        }

        #[test]
        fn test_cliffs_delta() {
            assert_eq!(cliffs_delta(&[1.0, 2.0], &[3.0, 4.0]), 1.0);
            assert_eq!(cliffs_delta(&[3.0, 4.0], &[1.0, 2.0]), -1.0);
            assert_eq!(cliffs_delta(&[1.0, 2.0], &[1.0, 2.0]), 0.0);
            assert_eq!(cliffs_delta(&[], &[1.0]), 0.0);
        }

        #[test]
        fn test_effect_size_from_means() {
            assert_eq!(effect_size_from_means(10.0, 12.0, 2.0), 1.0);
            assert_eq!(effect_size_from_means(10.0, 12.0, 0.0), 0.0);
        }
    }

    mod distribution_tests {
        use super::*;

        #[test]
        fn test_normal_cdf() {
            assert!((normal_cdf(0.0) - 0.5).abs() < 0.001);
            assert!(normal_cdf(3.0) > 0.998);
            assert!(normal_cdf(-3.0) < 0.002);
            assert!((normal_cdf(1.96) - 0.975).abs() < 0.001);
        }

        #[test]
        fn test_erf() {
            assert!((erf(0.0)).abs() < 0.001);
            assert!(erf(3.0) > 0.999);
            assert!(erf(-3.0) < -0.999);
        }

        #[test]
        fn test_inverse_normal_cdf_known_values() {
            assert!(inverse_normal_cdf(0.5).abs() < 1e-9);
            assert!((inverse_normal_cdf(0.975) - 1.959964).abs() < 1e-3);
            assert!((inverse_normal_cdf(0.8) - 0.841621).abs() < 1e-3);
            assert!((inverse_normal_cdf(0.025) + 1.959964).abs() < 1e-3);
            assert!((inverse_normal_cdf(0.999) - 3.090232).abs() < 1e-3);
        }

        #[test]
        fn test_inverse_normal_cdf_out_of_range() {
            assert_eq!(inverse_normal_cdf(0.0), 0.0);
            assert_eq!(inverse_normal_cdf(1.0), 0.0);
            assert_eq!(inverse_normal_cdf(-0.3), 0.0);
        }

        #[test]
        fn test_inverse_round_trips_through_cdf() {
            for p in [0.01, 0.1, 0.3, 0.6, 0.9, 0.99] {
                assert!((normal_cdf(inverse_normal_cdf(p)) - p).abs() < 1e-3, "p = {}", p);
            }
        }
    }

    mod t_test_tests {
        use super::*;

        #[test]
        fn test_insufficient_samples() {
            let result = ANALYZER.t_test(&[1.0], &[1.0, 2.0], 0.05);
            assert!(!result.significant);
            assert_eq!(result.p_value, 1.0);

            let result = ANALYZER.t_test(&[1.0, 2.0], &[], 0.05);
            assert_eq!(result.p_value, 1.0);
        }

        #[test]
        fn test_clear_improvement() {
            let result = ANALYZER.t_test(
                &[10.0, 12.0, 11.0, 13.0, 9.0],
                &[15.0, 16.0, 14.0, 17.0, 13.0],
                0.05,
            );

            assert!((result.test_statistic - 4.0).abs() < 1e-9);
            assert!(result.p_value < 0.001);
            assert!(result.significant);
            assert!(result.effect_size > 0.0);
            assert!((result.confidence_interval_lower - 13.04).abs() < 1e-9);
            assert!((result.confidence_interval_upper - 16.96).abs() < 1e-9);
            assert!(result.power > 0.9);
        }

        #[test]
        fn test_similar_samples() {
            let result = ANALYZER.t_test(
                &[100.0, 102.0, 98.0, 101.0, 99.0],
                &[101.0, 99.0, 100.0, 102.0, 98.0],
                0.05,
            );
            assert!(!result.significant);
            assert!(result.p_value > 0.5);
        }

        #[test]
        fn test_zero_variance() {
            let result = ANALYZER.t_test(&[5.0, 5.0], &[5.0, 5.0], 0.05);
            assert_eq!(result.p_value, 1.0);
            assert!(!result.significant);
        }
    }

    mod z_test_tests {
        use super::*;

        #[test]
        fn test_small_samples_are_not_tested() {
            let result = ANALYZER.z_test(
                SampleSummary::new(10.0, 1.0, 29),
                SampleSummary::new(20.0, 1.0, 100),
                0.05,
            );
            assert!(!result.significant);
            assert_eq!(result.p_value, 1.0);
        }

        #[test]
        fn test_large_difference() {
            let result = ANALYZER.z_test(
                SampleSummary::new(10.0, 4.0, 100),
                SampleSummary::new(11.0, 4.0, 100),
                0.05,
            );

            // SE = sqrt(0.04 + 0.04)
            assert!((result.test_statistic - 1.0 / 0.08f64.sqrt()).abs() < 1e-9);
            assert!(result.significant);
            assert!((result.effect_size - 0.5).abs() < 1e-9);
        }
    }

    mod chi_square_tests {
        use super::*;

        #[test]
        fn test_mismatched_counts() {
            assert_eq!(ANALYZER.chi_square_test(&[1, 2], &[1], 0.05).p_value, 1.0);
            assert_eq!(ANALYZER.chi_square_test(&[], &[], 0.05).p_value, 1.0);
            assert_eq!(ANALYZER.chi_square_test(&[0, 0], &[0, 0], 0.05).p_value, 1.0);
        }

        #[test]
        fn test_identical_distributions() {
            let result = ANALYZER.chi_square_test(&[50, 50], &[50, 50], 0.05);
            assert_eq!(result.test_statistic, 0.0);
            assert!(!result.significant);
        }

        #[test]
        fn test_different_distributions() {
            let result = ANALYZER.chi_square_test(&[90, 10], &[50, 50], 0.05);
            assert!(result.test_statistic > 30.0);
            assert!(result.significant);
            assert!(result.effect_size > 0.0);
        }
    }

    mod rank_tests {
        use super::*;

        #[test]
        fn test_mann_whitney_separated_groups() {
            let control = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
            let variant = [11.0, 12.0, 13.0, 14.0, 15.0, 16.0, 17.0, 18.0];

            let result = ANALYZER.mann_whitney_test(&control, &variant, 0.05);

            assert_eq!(result.test_statistic, 64.0);
            assert_eq!(result.effect_size, 1.0);
            assert!(result.significant);
        }

        #[test]
        fn test_mann_whitney_ties_average_ranks() {
            let result = ANALYZER.mann_whitney_test(&[1.0, 2.0, 2.0], &[2.0, 3.0, 3.0], 0.05);
            // Ranks: 1, {2,3,4} -> 3, {5,6} -> 5.5 ; variant sum = 3 + 5.5 + 5.5
            assert!((result.test_statistic - (14.0 - 6.0)).abs() < 1e-9);
        }

        #[test]
        fn test_mann_whitney_all_tied() {
            let result = ANALYZER.mann_whitney_test(&[1.0, 1.0], &[1.0, 1.0], 0.05);
            assert_eq!(result.p_value, 1.0);
        }

        #[test]
        fn test_ks_identical_samples() {
            let sample = [1.0, 2.0, 3.0, 4.0, 5.0];
            let result = ANALYZER.kolmogorov_smirnov_test(&sample, &sample, 0.05);
            assert_eq!(result.test_statistic, 0.0);
            assert_eq!(result.p_value, 1.0);
        }

        #[test]
        fn test_ks_shifted_samples() {
            let control: Vec<f64> = (0..50).map(|i| i as f64).collect();
            let variant: Vec<f64> = (0..50).map(|i| i as f64 + 40.0).collect();

            let result = ANALYZER.kolmogorov_smirnov_test(&control, &variant, 0.05);

            assert!((result.test_statistic - 0.8).abs() < 1e-9);
            assert!(result.significant);
        }
    }

    mod design_tests {
        use super::*;

        #[test]
        fn test_required_sample_size() {
            let n = ANALYZER.required_sample_size(0.5, 0.05, 0.8, StatisticalTest::TTest);
            // 2 * (1.96 + 0.84)^2 / 0.25
            assert!((n - 62.8).abs() < 0.5, "n = {}", n);

            assert_eq!(
                ANALYZER.required_sample_size(0.5, 0.05, 0.8, StatisticalTest::MannWhitney),
                DEFAULT_SAMPLE_SIZE
            );
            assert!(ANALYZER
                .required_sample_size(0.0, 0.05, 0.8, StatisticalTest::TTest)
                .is_infinite());
        }

        #[test]
        fn test_cohens_d() {
            let d = ANALYZER.cohens_d(&[10.0, 12.0, 11.0, 13.0, 9.0], &[15.0, 16.0, 14.0, 17.0, 13.0]);
            assert!((d - 4.0 / 2.5f64.sqrt()).abs() < 1e-9);
            assert_eq!(ANALYZER.cohens_d(&[], &[1.0]), 0.0);
            assert_eq!(ANALYZER.cohens_d(&[1.0, 1.0], &[1.0, 1.0]), 0.0);
        }

        #[test]
        fn test_achieved_power_grows_with_samples() {
            let small = ANALYZER.achieved_power(&[0.0; 10], &[0.0; 10], 0.5, 0.05);
            let large = ANALYZER.achieved_power(&[0.0; 200], &[0.0; 200], 0.5, 0.05);
            assert!(large > small);
            assert!(large > 0.9);
        }

        #[test]
        fn test_compare_dispatches_by_test_type() {
            let control = [10.0, 12.0, 11.0, 13.0, 9.0];
            let variant = [15.0, 16.0, 14.0, 17.0, 13.0];

            let chi = ANALYZER.compare(StatisticalTest::ChiSquare, &control, &variant, 0.05);
            assert_eq!(chi.test_type, StatisticalTest::TTest);

            let mw = ANALYZER.compare(StatisticalTest::MannWhitney, &control, &variant, 0.05);
            assert_eq!(mw.test_type, StatisticalTest::MannWhitney);

            let z = ANALYZER.compare(StatisticalTest::ZTest, &control, &variant, 0.05);
            assert_eq!(z.p_value, 1.0);
        }
    }

    mod correction_tests {
        use super::*;

        #[test]
        fn test_bonferroni() {
            let adjusted = bonferroni_correction(&[0.01, 0.04, 0.5]);
            assert!((adjusted[0] - 0.03).abs() < 1e-12);
            assert!((adjusted[1] - 0.12).abs() < 1e-12);
            assert_eq!(adjusted[2], 1.0);
            assert!(bonferroni_correction(&[]).is_empty());
        }

        #[test]
        fn test_benjamini_hochberg() {
            let adjusted = false_discovery_rate_correction(&[0.04, 0.01, 0.03]);
            // Sorted: 0.01 * 3/1 = 0.03, 0.03 * 3/2 = 0.045, 0.04 * 3/3 = 0.04
            assert!((adjusted[1] - 0.03).abs() < 1e-12);
            assert!((adjusted[2] - 0.04).abs() < 1e-12);
            assert!((adjusted[0] - 0.04).abs() < 1e-12);
        }

        #[test]
        fn test_benjamini_hochberg_caps_at_one() {
            let adjusted = false_discovery_rate_correction(&[0.9, 0.8]);
            assert!(adjusted.iter().all(|p| *p <= 1.0));
        }

        #[test]
        fn test_significance_helper() {
            assert!(is_statistically_significant(0.01, 0.05));
            assert!(!is_statistically_significant(0.05, 0.05));
        }
    }
}
