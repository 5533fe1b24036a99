//! Sample-size command - design-time power analysis

use clap::Args;
use serde_json::json;

use crate::domain::StatisticalTest;
use crate::infrastructure::experiment::{NormalApproximationAnalyzer, StatisticalAnalyzer};

/// Arguments for the sample-size command
#[derive(Args, Clone, Debug)]
pub struct SampleSizeArgs {
    /// Standardized effect size (Cohen's d) to detect
    #[arg(long)]
    pub effect_size: f64,

    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,

    #[arg(long, default_value_t = 0.8)]
    pub power: f64,
}

pub fn run(args: SampleSizeArgs) -> anyhow::Result<()> {
    crate::cli::bootstrap()?;

    let required = NormalApproximationAnalyzer.required_sample_size(
        args.effect_size,
        args.alpha,
        args.power,
        StatisticalTest::TTest,
    );

    if !required.is_finite() {
        anyhow::bail!("an effect size of {} can never be detected", args.effect_size);
    }

    let output = json!({
        "effect_size": args.effect_size,
        "alpha": args.alpha,
        "power": args.power,
        "required_per_variant": required.ceil() as u64,
    });

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
