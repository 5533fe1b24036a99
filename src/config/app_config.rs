use std::time::Duration;

use serde::Deserialize;

use crate::infrastructure::experiment::MultiExperimentPolicy;

/// Application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub logging: LoggingConfig,
    pub experiments: ExperimentsConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
    /// Separate level for the monitoring loop, which logs every cycle
    pub monitor_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Experiment framework and monitoring loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExperimentsConfig {
    /// Seconds between monitoring cycles
    pub update_interval_secs: u64,
    /// Overrides every experiment's own rollback check interval when set
    pub rollback_check_interval_secs: Option<u64>,
    /// Retention of finished experiments before cleanup
    pub experiment_cleanup_delay_secs: u64,
    /// Global kill switch for automatic rollback
    pub enable_auto_rollback: bool,
    /// Pause instead of rolling back when rollback is not permitted
    pub auto_pause_on_alert: bool,
    pub max_recent_alerts: usize,
    pub alert_cooldown_secs: u64,
    /// Samples a metric needs before it can trigger a rollback
    pub min_samples_for_rollback: usize,
    pub selection_policy: MultiExperimentPolicy,
    /// Fixed RNG seed for reproducible traffic splitting
    pub assignment_seed: Option<u64>,
    pub warning_ratio: f64,
    pub critical_ratio: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Install the Prometheus recorder
    pub enabled: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            monitor_level: None,
        }
    }
}

impl Default for ExperimentsConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 10,
            rollback_check_interval_secs: None,
            experiment_cleanup_delay_secs: 86_400,
            enable_auto_rollback: true,
            auto_pause_on_alert: false,
            max_recent_alerts: 100,
            alert_cooldown_secs: 300,
            min_samples_for_rollback: 1,
            selection_policy: MultiExperimentPolicy::default(),
            assignment_seed: None,
            warning_ratio: 0.9,
            critical_ratio: 1.5,
        }
    }
}

impl ExperimentsConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs(self.update_interval_secs.max(1))
    }

    pub fn rollback_check_interval(&self) -> Option<Duration> {
        self.rollback_check_interval_secs.map(Duration::from_secs)
    }

    pub fn cleanup_delay(&self) -> Duration {
        Duration::from_secs(self.experiment_cleanup_delay_secs)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name("config/local").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
