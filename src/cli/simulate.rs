//! Simulate command - synthetic traffic through one experiment

use std::collections::BTreeMap;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, ValueEnum};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tracing::info;

use crate::domain::{Experiment, SplitStrategy, TestVariant};
use crate::infrastructure::experiment::generate_session_id;
use crate::infrastructure::metrics::InMemoryMetricsCollector;
use crate::infrastructure::observability::init_metrics;
use crate::infrastructure::services::ExperimentService;

const PRIMARY_METRIC: &str = "quality_score";
const ERROR_METRIC: &str = "error_rate";

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum StrategyArg {
    Random,
    RoundRobin,
    Sticky,
    Hash,
    Weighted,
}

impl From<StrategyArg> for SplitStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Random => SplitStrategy::Random,
            StrategyArg::RoundRobin => SplitStrategy::RoundRobin,
            StrategyArg::Sticky => SplitStrategy::StickySession,
            StrategyArg::Hash => SplitStrategy::HashBased,
            StrategyArg::Weighted => SplitStrategy::WeightedRandom,
        }
    }
}

/// Arguments for the simulate command
#[derive(Args, Clone, Debug)]
pub struct SimulateArgs {
    /// Number of synthetic requests
    #[arg(long, default_value_t = 1000)]
    pub requests: usize,

    /// Share of traffic sent to the treatment, in percent
    #[arg(long, default_value_t = 50.0)]
    pub treatment_percentage: f64,

    #[arg(long, value_enum, default_value = "random")]
    pub strategy: StrategyArg,

    /// Seed for both traffic splitting and synthetic metrics
    #[arg(long)]
    pub seed: Option<u64>,

    #[arg(long, default_value_t = 10.0)]
    pub control_mean: f64,

    #[arg(long, default_value_t = 10.5)]
    pub treatment_mean: f64,

    #[arg(long, default_value_t = 2.0)]
    pub std_dev: f64,

    /// Probability that a treatment request fails
    #[arg(long, default_value_t = 0.0)]
    pub treatment_error_rate: f64,

    /// Roll back when the treatment error rate exceeds this value
    #[arg(long, default_value_t = 0.1)]
    pub rollback_threshold: f64,

    /// Print the Prometheus exposition after the report
    #[arg(long)]
    pub print_metrics: bool,
}

pub fn run(args: SimulateArgs) -> anyhow::Result<()> {
    let mut config = crate::cli::bootstrap()?;

    let metrics = if args.print_metrics {
        init_metrics(&config.metrics)
    } else {
        None
    };

    if args.seed.is_some() {
        config.experiments.assignment_seed = args.seed;
    }

    let collector = Arc::new(InMemoryMetricsCollector::default());
    let service = ExperimentService::new(collector.clone(), &config.experiments);

    let experiment = Experiment::new("Simulated experiment", PRIMARY_METRIC)
        .with_variant(TestVariant::control("control", 100.0 - args.treatment_percentage))
        .with_variant(TestVariant::new("treatment", args.treatment_percentage))
        .with_split_strategy(args.strategy.into())
        .with_rollback_threshold(ERROR_METRIC, args.rollback_threshold)
        .with_rollback_grace_period(Duration::ZERO);

    let id = service.create_experiment(experiment)?;
    service.start_experiment(&id)?;
    info!(experiment_id = %id, requests = args.requests, "Simulating traffic");

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    for request in 0..args.requests {
        let user_id = format!("user_{}", request);
        let context = BTreeMap::from([("user_id".to_string(), user_id.clone())]);

        let Some(assignment) =
            service.get_variant_for_request(&user_id, &generate_session_id(), &context)?
        else {
            continue;
        };

        let is_treatment = assignment.variant_name == "treatment";
        let (mean, error_rate) = if is_treatment {
            (args.treatment_mean, args.treatment_error_rate)
        } else {
            (args.control_mean, 0.0)
        };

        let quality = mean + args.std_dev * standard_normal(&mut rng);
        let failed = rng.gen_bool(error_rate.clamp(0.0, 1.0));

        collector.record_sample(&id, &assignment.variant_name, PRIMARY_METRIC, quality)?;
        collector.record_sample(
            &id,
            &assignment.variant_name,
            ERROR_METRIC,
            if failed { 1.0 } else { 0.0 },
        )?;
    }

    let cycle = service.run_monitoring_cycle();

    let report = json!({
        "cycle": cycle,
        "experiment": service.get_experiment(&id)?,
        "results": service.get_experiment_results(&id)?,
        "diagnostics": service.splitter_diagnostics(&id)?,
        "status": service.get_status()?,
    });

    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(metrics) = metrics {
        println!("{}", metrics.render());
    }

    Ok(())
}

/// Box-Muller draw from N(0, 1)
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen_range(0.0..1.0);
    (-2.0 * u1.ln()).sqrt() * (TAU * u2).cos()
}
