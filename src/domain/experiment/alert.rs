//! Monitoring alerts raised against running experiments

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::ExperimentId;
use crate::domain::serde_utils::u8_enum_conversions;

/// Alert severity, ordered from least to most severe
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum AlertSeverity {
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

u8_enum_conversions!(AlertSeverity, "alert severity", {
    Info = 0,
    Warning = 1,
    Error = 2,
    Critical = 3,
});

impl AlertSeverity {
    /// Grade `value` against an upper-bound `threshold`
    ///
    /// Returns `None` when the value is comfortably below the threshold.
    pub fn grade(value: f64, threshold: f64, warning_ratio: f64, critical_ratio: f64) -> Option<Self> {
        if value > threshold * critical_ratio {
            Some(Self::Critical)
        } else if value > threshold {
            Some(Self::Error)
        } else if value > threshold * warning_ratio {
            Some(Self::Warning)
        } else {
            None
        }
    }

    /// Severe enough to act on the experiment
    pub fn is_actionable(&self) -> bool {
        *self >= Self::Error
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// An alert raised by the monitoring loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameworkAlert {
    pub severity: AlertSeverity,
    pub experiment_id: ExperimentId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_name: Option<String>,
    pub message: String,
    pub current_value: f64,
    pub threshold_value: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl FrameworkAlert {
    pub fn new(
        severity: AlertSeverity,
        experiment_id: ExperimentId,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            experiment_id,
            variant_name: None,
            metric_name: None,
            message: message.into(),
            current_value: 0.0,
            threshold_value: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Alert for a metric of one variant crossing its threshold
    pub fn threshold_breach(
        severity: AlertSeverity,
        experiment_id: ExperimentId,
        variant_name: impl Into<String>,
        metric_name: impl Into<String>,
        current_value: f64,
        threshold_value: f64,
    ) -> Self {
        let variant_name = variant_name.into();
        let metric_name = metric_name.into();
        let message = format!(
            "Variant '{}' {} = {:.4} exceeds threshold {:.4}",
            variant_name, metric_name, current_value, threshold_value
        );

        Self {
            variant_name: Some(variant_name),
            metric_name: Some(metric_name),
            current_value,
            threshold_value,
            ..Self::new(severity, experiment_id, message)
        }
    }

    /// Identity used to suppress repeats of the same alert
    pub fn dedupe_key(&self) -> (&ExperimentId, Option<&str>, Option<&str>, AlertSeverity) {
        (
            &self.experiment_id,
            self.variant_name.as_deref(),
            self.metric_name.as_deref(),
            self.severity,
        )
    }
}
