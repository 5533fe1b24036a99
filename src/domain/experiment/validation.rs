//! Experiment validation utilities

use thiserror::Error;

use crate::domain::DomainError;

/// Allowed deviation of the traffic percentage sum from 100
pub const TRAFFIC_SUM_TOLERANCE: f64 = 0.01;

/// Validation errors for experiments and variants
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExperimentValidationError {
    #[error("Experiment name cannot be empty")]
    EmptyName,

    #[error("Experiment must have at least one variant")]
    NoVariants,

    #[error("Variant name cannot be empty")]
    EmptyVariantName,

    #[error("Duplicate variant name: '{0}'")]
    DuplicateVariantName(String),

    #[error("Variant '{0}' traffic percentage must be within [0, 100], got {1}")]
    TrafficOutOfRange(String, f64),

    #[error("Variant '{0}' must receive traffic unless it is the control")]
    ZeroTraffic(String),

    #[error("Experiment must have exactly one control variant, found {0}")]
    ControlCount(usize),

    #[error("Traffic percentages must sum to 100, got {0}")]
    InvalidTrafficSum(f64),

    #[error("Significance level must be strictly between 0 and 1, got {0}")]
    InvalidSignificanceLevel(f64),

    #[error("Statistical power must be strictly between 0 and 1, got {0}")]
    InvalidStatisticalPower(f64),

    #[error("Primary metric cannot be empty")]
    EmptyPrimaryMetric,

    #[error("Invalid experiment status transition from {0} to {1}")]
    InvalidStatusTransition(String, String),

    #[error("Unknown {0} value: {1}")]
    UnknownEnumValue(&'static str, u8),
}

impl From<ExperimentValidationError> for DomainError {
    fn from(error: ExperimentValidationError) -> Self {
        DomainError::validation(error.to_string())
    }
}

/// Validate a single variant's name and traffic share
pub fn validate_variant(
    name: &str,
    traffic_percentage: f64,
    is_control: bool,
) -> Result<(), ExperimentValidationError> {
    if name.is_empty() {
        return Err(ExperimentValidationError::EmptyVariantName);
    }

    if !(0.0..=100.0).contains(&traffic_percentage) {
        return Err(ExperimentValidationError::TrafficOutOfRange(
            name.to_string(),
            traffic_percentage,
        ));
    }

    if traffic_percentage == 0.0 && !is_control {
        return Err(ExperimentValidationError::ZeroTraffic(name.to_string()));
    }

    Ok(())
}

/// Validate that traffic percentages sum to 100 within tolerance
pub fn validate_traffic_sum(percentages: &[f64]) -> Result<(), ExperimentValidationError> {
    let total: f64 = percentages.iter().sum();

    if (total - 100.0).abs() > TRAFFIC_SUM_TOLERANCE {
        return Err(ExperimentValidationError::InvalidTrafficSum(total));
    }

    Ok(())
}

/// Validate a probability-like configuration value lies in the open interval (0, 1)
pub fn is_open_unit_interval(value: f64) -> bool {
    value > 0.0 && value < 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    mod variant_validation {
        use super::*;

        #[test]
        fn test_valid_variants() {
            assert!(validate_variant("control", 50.0, true).is_ok());
            assert!(validate_variant("treatment", 100.0, false).is_ok());
            assert!(validate_variant("control", 0.0, true).is_ok());
        }

        #[test]
        fn test_empty_name() {
            assert_eq!(
                validate_variant("", 50.0, false),
                Err(ExperimentValidationError::EmptyVariantName)
            );
        }

        #[test]
        fn test_out_of_range() {
            assert_eq!(
                validate_variant("v", 100.5, false),
                Err(ExperimentValidationError::TrafficOutOfRange(
                    "v".to_string(),
                    100.5
                ))
            );
            assert!(validate_variant("v", -1.0, false).is_err());
        }

        #[test]
        fn test_zero_traffic_treatment() {
            assert_eq!(
                validate_variant("treatment", 0.0, false),
                Err(ExperimentValidationError::ZeroTraffic("treatment".to_string()))
            );
        }
    }

    mod traffic_sum_validation {
        use super::*;

        #[test]
        fn test_exact_sum() {
            assert!(validate_traffic_sum(&[50.0, 50.0]).is_ok());
            assert!(validate_traffic_sum(&[33.33, 33.33, 33.34]).is_ok());
        }

        #[test]
        fn test_within_tolerance() {
            assert!(validate_traffic_sum(&[50.0, 50.005]).is_ok());
        }

        #[test]
        fn test_outside_tolerance() {
            assert!(matches!(
                validate_traffic_sum(&[30.0, 30.0]),
                Err(ExperimentValidationError::InvalidTrafficSum(_))
            ));
            assert!(validate_traffic_sum(&[50.0, 50.02]).is_err());
        }
    }

    #[test]
    fn test_open_unit_interval() {
        assert!(is_open_unit_interval(0.05));
        assert!(!is_open_unit_interval(0.0));
        assert!(!is_open_unit_interval(1.0));
        assert!(!is_open_unit_interval(-0.2));
    }

    #[test]
    fn test_into_domain_error() {
        let error: DomainError = ExperimentValidationError::EmptyPrimaryMetric.into();
        assert!(error.is_validation());
        assert!(error.to_string().contains("Primary metric"));
    }
}
