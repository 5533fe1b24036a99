//! Bounded log of recent monitoring alerts

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::domain::{AlertSeverity, ExperimentId, FrameworkAlert};
use crate::domain::serde_utils::to_time_delta;
use crate::infrastructure::sync::lock_or_recover;

/// Keeps the most recent alerts, suppressing repeats within a cooldown
#[derive(Debug)]
pub struct AlertLog {
    alerts: Mutex<VecDeque<FrameworkAlert>>,
    capacity: usize,
    cooldown: Duration,
}

impl AlertLog {
    pub fn new(capacity: usize, cooldown: Duration) -> Self {
        Self {
            alerts: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            cooldown,
        }
    }

    /// Store an alert unless an identical one was seen within the cooldown
    ///
    /// Returns whether the alert was stored.
    pub fn record(&self, alert: FrameworkAlert) -> bool {
        let mut alerts = lock_or_recover(&self.alerts);
        let cooldown = to_time_delta(self.cooldown);

        let duplicate = alerts.iter().rev().any(|existing| {
            existing.dedupe_key() == alert.dedupe_key()
                && alert.timestamp - existing.timestamp < cooldown
        });

        if duplicate {
            debug!(
                experiment_id = %alert.experiment_id,
                severity = %alert.severity,
                "Suppressed repeated alert"
            );
            return false;
        }

        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::Error => {
                error!(experiment_id = %alert.experiment_id, severity = %alert.severity, "{}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(experiment_id = %alert.experiment_id, "{}", alert.message)
            }
            AlertSeverity::Info => {
                info!(experiment_id = %alert.experiment_id, "{}", alert.message)
            }
        }

        if alerts.len() >= self.capacity {
            alerts.pop_front();
        }

        alerts.push_back(alert);
        true
    }

    /// Up to `limit` alerts, newest first
    pub fn recent(&self, limit: usize) -> Vec<FrameworkAlert> {
        lock_or_recover(&self.alerts)
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn for_experiment(&self, experiment_id: &ExperimentId) -> Vec<FrameworkAlert> {
        lock_or_recover(&self.alerts)
            .iter()
            .filter(|a| &a.experiment_id == experiment_id)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.alerts).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock_or_recover(&self.alerts).clear();
    }
}
