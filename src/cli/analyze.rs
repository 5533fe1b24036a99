//! Analyze command - two-sample test over literal samples

use anyhow::Context;
use clap::{Args, ValueEnum};

use crate::domain::StatisticalTest;
use crate::infrastructure::experiment::{NormalApproximationAnalyzer, StatisticalAnalyzer};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum TestKind {
    TTest,
    ZTest,
    MannWhitney,
    Ks,
}

impl From<TestKind> for StatisticalTest {
    fn from(kind: TestKind) -> Self {
        match kind {
            TestKind::TTest => StatisticalTest::TTest,
            TestKind::ZTest => StatisticalTest::ZTest,
            TestKind::MannWhitney => StatisticalTest::MannWhitney,
            TestKind::Ks => StatisticalTest::KolmogorovSmirnov,
        }
    }
}

/// Arguments for the analyze command
#[derive(Args, Clone, Debug)]
pub struct AnalyzeArgs {
    /// Comma-separated control observations
    #[arg(long)]
    pub control: String,

    /// Comma-separated variant observations
    #[arg(long)]
    pub variant: String,

    #[arg(long, value_enum, default_value = "t-test")]
    pub test: TestKind,

    #[arg(long, default_value_t = 0.05)]
    pub alpha: f64,
}

/// Run the selected test and print the result as JSON
pub fn run(args: AnalyzeArgs) -> anyhow::Result<()> {
    crate::cli::bootstrap()?;

    let control = parse_samples(&args.control).context("invalid --control")?;
    let variant = parse_samples(&args.variant).context("invalid --variant")?;

    let result =
        NormalApproximationAnalyzer.compare(args.test.into(), &control, &variant, args.alpha);

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn parse_samples(raw: &str) -> anyhow::Result<Vec<f64>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .with_context(|| format!("'{}' is not a number", s))
        })
        .collect()
}
