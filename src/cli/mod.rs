//! CLI module for PMP LLM Experiments
//!
//! Provides subcommands for exercising the experimentation core offline:
//! - `simulate`: run a synthetic experiment through one monitoring cycle
//! - `analyze`: run a two-sample test over literal samples
//! - `sample-size`: required participants per variant

pub mod analyze;
pub mod sample_size;
pub mod simulate;

use clap::{Parser, Subcommand};

use crate::config::AppConfig;
use crate::infrastructure::logging;

/// PMP LLM Experiments - A/B testing control plane for the LLM gateway
#[derive(Parser)]
#[command(name = "pmp-llm-experiments")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Simulate traffic and metrics for one experiment
    Simulate(simulate::SimulateArgs),

    /// Compare two literal samples
    Analyze(analyze::AnalyzeArgs),

    /// Compute the per-variant sample size for an effect
    SampleSize(sample_size::SampleSizeArgs),
}

/// Load `.env` and layered configuration, then install logging
pub fn bootstrap() -> anyhow::Result<AppConfig> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    logging::init_logging(&config.logging)?;

    Ok(config)
}
