//! PMP LLM Experiments
//!
//! Experimentation control plane for the LLM gateway:
//! - Experiment registry with a validated lifecycle state machine
//! - Traffic splitting (random, round robin, sticky, hash based)
//! - Closed-form statistical tests and power analysis
//! - Background monitoring with alerting and automatic rollback

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
pub use infrastructure::services::ExperimentService;
