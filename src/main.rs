use clap::Parser;
use pmp_llm_experiments::cli::{self, Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate(args) => cli::simulate::run(args),
        Command::Analyze(args) => cli::analyze::run(args),
        Command::SampleSize(args) => cli::sample_size::run(args),
    }
}
