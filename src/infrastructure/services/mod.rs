//! Infrastructure services

mod experiment_service;
mod monitoring;

pub use experiment_service::{ExperimentService, FrameworkStatus};
pub use monitoring::{CycleReport, MonitorSettings, MonitoringLoop};
