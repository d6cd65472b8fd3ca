//! Implementation of the `produce` command
use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, bail};
use iox_time::SystemProvider;
use kiosk_bench_clap_blocks::kafka::KafkaProducerConfig;
use kiosk_bench_load_generator::{
    BackpressurePolicy, EmitSpec, PhasedEmitter,
    emitter::DEFAULT_RETRY_DELAY,
    specification::{built_in_spec_names, built_in_specs},
    transport::kafka::KafkaOutbound,
};
use observability_deps::tracing::info;
use trogging::cli::LoggingConfig;

const DEFAULT_SPEC: &str = "kiosk_default";

#[derive(Debug, clap::Parser)]
pub(crate) struct Config {
    #[clap(flatten)]
    kafka: KafkaProducerConfig,

    /// The name of the builtin spec to run. Defaults to `kiosk_default` when no spec file is
    /// given.
    #[clap(long = "builtin-spec", env = "KIOSK_BENCH_BUILTIN_SPEC")]
    builtin_spec: Option<String>,

    /// Path to a JSON spec file describing the run.
    #[clap(
        long = "spec",
        env = "KIOSK_BENCH_SPEC_PATH",
        conflicts_with = "builtin_spec"
    )]
    spec_path: Option<PathBuf>,

    /// Print the resolved spec as JSON and exit without producing anything.
    ///
    /// Useful as a starting point for a custom spec file.
    #[clap(long = "print-spec", default_value_t = false)]
    print_spec: bool,

    /// Override the number of events in the initial burst.
    #[clap(long = "initial-count", env = "KIOSK_BENCH_INITIAL_COUNT")]
    initial_count: Option<u64>,

    /// Override the number of paced cycles.
    #[clap(long = "cycles", env = "KIOSK_BENCH_CYCLES")]
    cycles: Option<u32>,

    /// Override the number of events per cycle.
    #[clap(long = "cycle-size", env = "KIOSK_BENCH_CYCLE_SIZE")]
    cycle_size: Option<u64>,

    /// Override the start-to-start interval between cycles.
    #[clap(
        long = "cycle-interval",
        env = "KIOSK_BENCH_CYCLE_INTERVAL",
        value_parser = humantime::parse_duration,
    )]
    cycle_interval: Option<Duration>,

    /// What to do with an event refused because the local send queue is full.
    #[clap(
        long = "backpressure-policy",
        env = "KIOSK_BENCH_BACKPRESSURE_POLICY",
        default_value = "drop-and-continue",
        value_enum
    )]
    backpressure_policy: BackpressurePolicy,

    /// How long to wait before continuing after a full send queue.
    #[clap(
        long = "backpressure-retry-delay",
        env = "KIOSK_BENCH_BACKPRESSURE_RETRY_DELAY",
        default_value = "10ms",
        value_parser = humantime::parse_duration,
    )]
    backpressure_retry_delay: Duration,

    /// logging options
    #[clap(flatten)]
    pub(crate) logging_config: LoggingConfig,
}

impl Config {
    /// Pick the spec to run and apply the command line overrides to it
    fn resolve_spec(&self) -> Result<EmitSpec, anyhow::Error> {
        let mut spec = match (&self.spec_path, &self.builtin_spec) {
            (Some(path), _) => EmitSpec::from_path(path)
                .with_context(|| format!("failed to load spec from {}", path.display()))?,
            (None, builtin) => {
                let name = builtin.as_deref().unwrap_or(DEFAULT_SPEC);
                let Some(spec) = built_in_specs().into_iter().find(|s| s.name == name) else {
                    bail!(
                        "unknown builtin spec {name:?}, available: {}",
                        built_in_spec_names().join(", ")
                    );
                };
                spec
            }
        };

        if let Some(n) = self.initial_count {
            spec.initial_count = n;
        }
        if let Some(n) = self.cycles {
            spec.cycles = n;
        }
        if let Some(n) = self.cycle_size {
            spec.cycle_size = n;
        }
        if let Some(d) = self.cycle_interval {
            spec.cycle_interval = d;
        }
        spec.validate()?;
        Ok(spec)
    }
}

pub(crate) async fn command(config: Config) -> Result<(), anyhow::Error> {
    let spec = config.resolve_spec()?;

    if config.print_spec {
        println!("{}", spec.to_json_string_pretty()?);
        return Ok(());
    }

    info!(
        spec = %spec.name,
        brokers = %config.kafka.brokers,
        topic = %config.kafka.topic,
        total_events = spec.total_events(),
        policy = ?config.backpressure_policy,
        "starting producer"
    );

    let transport = KafkaOutbound::new(&config.kafka.client_config())
        .context("failed to create kafka producer")?;
    let mut emitter = PhasedEmitter::new(
        transport,
        config.kafka.topic.clone(),
        Arc::new(SystemProvider::new()),
    )
    .with_backpressure_policy(config.backpressure_policy)
    .with_retry_delay(config.backpressure_retry_delay);

    let report = emitter.run(&spec).await.context("production run failed")?;

    info!(
        allocated = report.allocated,
        accepted = report.accepted,
        dropped = report.dropped,
        backpressure_events = report.backpressure_events,
        last_sequence = report.last_sequence,
        "producer finished"
    );
    Ok(())
}
