//! Global tracing subscriber for the CLI

use tracing_subscriber::{
    filter::Directive,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

const FALLBACK_LEVEL: &str = "info";
const MONITOR_TARGET: &str = "pmp_llm_experiments::infrastructure::services::monitoring";

/// Install the global subscriber
///
/// `RUST_LOG` takes precedence over the configured levels. Logs go to stderr
/// so command output on stdout stays machine-readable. Monitoring cycles run
/// inside a `monitor_cycle` span whose close event carries the cycle time.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let (filter, rejected) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, Vec::new()),
        Err(_) => build_filter(config),
    };

    let installed = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_target(true)
                    .with_writer(std::io::stderr)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {}", e))?;

    for level in rejected {
        tracing::warn!(level, fallback = FALLBACK_LEVEL, "Ignoring invalid log level");
    }
    tracing::info!(
        level = %config.level,
        monitor_level = config.monitor_level.as_deref().unwrap_or("inherit"),
        "Logging initialized"
    );

    Ok(())
}

/// Filter from the configured levels, plus any level strings that did not parse
fn build_filter(config: &LoggingConfig) -> (EnvFilter, Vec<String>) {
    let mut rejected = Vec::new();

    let mut filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| {
        rejected.push(config.level.clone());
        EnvFilter::new(FALLBACK_LEVEL)
    });

    if let Some(level) = &config.monitor_level {
        match format!("{}={}", MONITOR_TARGET, level).parse::<Directive>() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(_) => rejected.push(level.clone()),
        }
    }

    (filter, rejected)
}
